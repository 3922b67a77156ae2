#![allow(dead_code)]

use serde_json::{json, Map, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const CLIENTS_HEADERS: &[&str] = &[
    "Client Name",
    "Status",
    "Referral Date",
    "Skills",
    "Insurance",
    "School",
    "Provider",
    "Day",
    "Paperwork Delivery",
    "Doc Date",
    "Paperwork Status",
    "Notes",
    "Grade",
    "Gender",
    "Identifier Code",
    "District",
    "Primary Client Language",
    "Primary Parent Language",
];

pub const PROVIDERS_HEADERS: &[&str] = &[
    "Status",
    "Clinician Name",
    "Credential",
    "Display Name",
    "Accepts Medicaid",
    "Accepts Commercial",
    "Accepts Tricare",
    "Background Check Date",
    "Bckgrnd Status",
    "Cleared to Start",
    "Bckgrnd Notes",
    "High Behavioral Needs",
    "Suicidal",
    "Substance Use",
    "Trauma",
    "Skills",
    "Clinician Notes",
];

pub const ROSTER_HEADERS: &[&str] = &[
    "School",
    "Provider Name",
    "Day",
    "Openings",
    "Starting Available",
    "Current",
    "Notes",
];

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_bulkimportd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn bulkimportd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Error code of a failed response; panics if the request succeeded.
pub fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> (String, String) {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{} succeeded: {}", method, value);
    (
        value["error"]["code"].as_str().unwrap_or_default().to_string(),
        value["error"]["message"].as_str().unwrap_or_default().to_string(),
    )
}

pub fn select_workspace(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, prefix: &str) -> PathBuf {
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    workspace
}

/// A sheet row with every header present (blank) and the given cells set.
pub fn sheet_row(headers: &[&str], cells: &[(&str, Value)]) -> Value {
    let mut obj = headers
        .iter()
        .map(|h| (h.to_string(), json!("")))
        .collect::<Map<String, Value>>();
    for (k, v) in cells {
        obj.insert(k.to_string(), v.clone());
    }
    Value::Object(obj)
}

pub fn client_row(name: &str, school: &str, provider: &str, day: &str) -> Value {
    sheet_row(
        CLIENTS_HEADERS,
        &[
            ("Client Name", json!(name)),
            ("Status", json!("Pending")),
            ("School", json!(school)),
            ("Provider", json!(provider)),
            ("Day", json!(day)),
        ],
    )
}

pub fn provider_row(name: &str) -> Value {
    sheet_row(
        PROVIDERS_HEADERS,
        &[("Clinician Name", json!(name)), ("Status", json!("Active"))],
    )
}

pub fn roster_row(school: &str, provider: &str, day: &str, starting: Value) -> Value {
    sheet_row(
        ROSTER_HEADERS,
        &[
            ("School", json!(school)),
            ("Provider Name", json!(provider)),
            ("Day", json!(day)),
            ("Starting Available", starting),
        ],
    )
}
