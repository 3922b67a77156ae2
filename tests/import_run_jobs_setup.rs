mod test_support;

use rusqlite::Connection;
use serde_json::json;
use std::path::Path;
use test_support::{
    client_row, provider_row, request_err_code, request_ok, roster_row, select_workspace, spawn_sidecar,
};

fn notification_count(workspace: &Path, tenant_id: &str) -> i64 {
    let conn = Connection::open(workspace.join("bulkimport.sqlite3")).expect("open db");
    conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE tenant_id = ?",
        [tenant_id],
        |r| r.get(0),
    )
    .expect("count notifications")
}

fn sheets(tenant_id: &str) -> serde_json::Value {
    json!({
        "tenantId": tenant_id,
        "uploadedBy": "office@district.example",
        "clients": [
            client_row("Amy Lee", "Lincoln", "Jane Doe", "Mon"),
            client_row("Bo Chan", "Lincoln", "Jane Doe", "Monday"),
            client_row("Cy Park", "Lincoln", "Ghost", "Mon"),
        ],
        "providers": [provider_row("Jane Doe")],
        "roster": [roster_row("Lincoln", "Jane Doe", "Mon", json!(1))],
    })
}

#[test]
fn setup_import_section_is_typed() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = select_workspace(&mut stdin, &mut reader, "bulkimport-setup");

    let all = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(
        all,
        json!({
            "import": {
                "enforceCapacityOnApply": true,
                "notificationsEnabled": true,
                "placeholderEmailDomain": "import.local",
                "jobsListLimit": 50
            }
        })
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "import", "patch": { "jobsListLimit": 2, "notificationsEnabled": false } }),
    );
    assert_eq!(updated["jobsListLimit"], 2);
    assert_eq!(updated["notificationsEnabled"], false);
    assert_eq!(updated["enforceCapacityOnApply"], true);

    let (code, message) = request_err_code(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "import", "patch": { "colour": "red" } }),
    );
    assert_eq!(code, "bad_params");
    assert_eq!(message, "unknown import field: colour");

    let (code, _) = request_err_code(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "import", "patch": { "jobsListLimit": 9000 } }),
    );
    assert_eq!(code, "bad_params");

    let (code, _) = request_err_code(&mut stdin, &mut reader, "5", "setup.get", json!({ "section": "grading" }));
    assert_eq!(code, "bad_params");

    let section = request_ok(&mut stdin, &mut reader, "6", "setup.get", json!({ "section": "import" }));
    assert_eq!(section["jobsListLimit"], 2);
    assert_eq!(section["notificationsEnabled"], false);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn run_previews_then_applies_and_merges_errors() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = select_workspace(&mut stdin, &mut reader, "bulkimport-run");

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "setup.update",
        json!({ "section": "import", "patch": { "notificationsEnabled": false } }),
    );
    let run = request_ok(&mut stdin, &mut reader, "2", "import.run", sheets("tenant-a"));
    assert_eq!(run["totals"], json!({ "clients": 3, "providers": 1, "roster": 1 }));
    assert_eq!(run["pendingCount"], 2);
    assert_eq!(run["created"], 1);
    assert_eq!(run["updated"], 0);
    assert_eq!(run["inputDigest"].as_str().map(str::len), Some(64));

    let errors = run["errors"].as_array().expect("errors");
    assert_eq!(errors.len(), 2);
    assert_eq!(
        errors[0],
        json!({ "sheet": "clients", "row": 4, "error": "Provider not found in Providers sheet: Ghost" })
    );
    assert_eq!(errors[1]["sheet"], "clients");
    assert_eq!(errors[1]["row"], 3);
    assert!(errors[1]["rowId"].as_str().is_some());
    assert_eq!(
        errors[1]["error"],
        "No capacity for Jane Doe at Lincoln on Monday (starting 1, current 1)"
    );

    let job = request_ok(&mut stdin, &mut reader, "3", "jobs.get", json!({ "jobId": run["jobId"] }));
    assert_eq!(job["job"]["status"], "COMPLETED");
    assert_eq!(job["job"]["uploadedBy"], "office@district.example");
    assert_eq!(notification_count(&workspace, "tenant-a"), 0);

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "import", "patch": { "notificationsEnabled": true } }),
    );
    request_ok(&mut stdin, &mut reader, "5", "import.run", sheets("tenant-b"));
    assert!(notification_count(&workspace, "tenant-b") > 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn jobs_list_is_tenant_scoped_and_limited() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = select_workspace(&mut stdin, &mut reader, "bulkimport-jobs");

    let mut job_ids = Vec::new();
    for i in 0..3 {
        let preview = request_ok(&mut stdin, &mut reader, &format!("p{i}"), "import.preview", sheets("tenant-a"));
        job_ids.push(preview["jobId"].clone());
    }
    request_ok(&mut stdin, &mut reader, "p-other", "import.preview", sheets("tenant-b"));

    let listed = request_ok(&mut stdin, &mut reader, "1", "jobs.list", json!({ "tenantId": "tenant-a" }));
    let jobs = listed["jobs"].as_array().expect("jobs");
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[0]["id"], job_ids[2]);
    assert!(jobs.iter().all(|j| j["tenantId"] == "tenant-a"));
    assert!(jobs.iter().all(|j| j["kind"] == "CLIENTS_PROVIDERS_ROSTER"));

    let limited = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "jobs.list",
        json!({ "tenantId": "tenant-a", "limit": 1 }),
    );
    assert_eq!(limited["jobs"].as_array().map(|j| j.len()), Some(1));

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "import", "patch": { "jobsListLimit": 2 } }),
    );
    let by_setting = request_ok(&mut stdin, &mut reader, "4", "jobs.list", json!({ "tenantId": "tenant-a" }));
    assert_eq!(by_setting["jobs"].as_array().map(|j| j.len()), Some(2));

    let (code, _) = request_err_code(
        &mut stdin,
        &mut reader,
        "5",
        "jobs.list",
        json!({ "tenantId": "tenant-a", "limit": 0 }),
    );
    assert_eq!(code, "bad_params");

    let errors_only = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "jobs.rows",
        json!({ "jobId": job_ids[0], "sheet": "clients", "status": "ERROR" }),
    );
    assert_eq!(errors_only["rows"].as_array().map(|r| r.len()), Some(1));
    assert_eq!(errors_only["rows"][0]["rowNumber"], 4);

    let (code, _) = request_err_code(
        &mut stdin,
        &mut reader,
        "7",
        "jobs.rows",
        json!({ "jobId": job_ids[0], "sheet": "staff" }),
    );
    assert_eq!(code, "bad_params");

    let (code, _) = request_err_code(&mut stdin, &mut reader, "8", "jobs.get", json!({ "jobId": "missing" }));
    assert_eq!(code, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
