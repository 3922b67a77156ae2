use crate::import::apply::{apply_all, apply_row, ApplyContext};
use crate::import::notify::{NoopNotifier, Notifier, SqliteNotifier};
use crate::import::preview::{create_preview_job, PreviewInput};
use crate::import::rollback::rollback;
use crate::import::settings::ImportSettings;
use crate::ipc::handlers::setup::load_import_settings;
use crate::ipc::helpers::{get_optional_str, get_required_str, get_sheet_rows, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn preview_input(params: &Value) -> Result<PreviewInput, HandlerErr> {
    Ok(PreviewInput {
        tenant_id: get_required_str(params, "tenantId")?,
        uploaded_by: get_optional_str(params, "uploadedBy"),
        clients: get_sheet_rows(params, "clients")?,
        providers: get_sheet_rows(params, "providers")?,
        roster: get_sheet_rows(params, "roster")?,
    })
}

/// Runs `f` with the workspace settings and the notifier they select.
fn with_apply_context<T>(
    conn: &Connection,
    uploaded_by: Option<&str>,
    f: impl FnOnce(&ApplyContext<'_>) -> Result<T, HandlerErr>,
) -> Result<T, HandlerErr> {
    let settings: ImportSettings = load_import_settings(conn)?;
    let sqlite_notifier = SqliteNotifier::new(conn);
    let notifier: &dyn Notifier = if settings.notifications_enabled {
        &sqlite_notifier
    } else {
        &NoopNotifier
    };
    f(&ApplyContext {
        settings: &settings,
        notifier,
        uploaded_by,
    })
}

fn import_preview(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = preview_input(params)?;
    let summary = create_preview_job(conn, &input)?;
    Ok(json!(summary))
}

fn import_apply_row(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let job_id = get_required_str(params, "jobId")?;
    let row_id = get_required_str(params, "rowId")?;
    let uploaded_by = get_optional_str(params, "uploadedBy");
    with_apply_context(conn, uploaded_by.as_deref(), |ctx| {
        let outcome = apply_row(conn, ctx, &job_id, &row_id)?;
        Ok(json!(outcome))
    })
}

fn import_apply_all(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let job_id = get_required_str(params, "jobId")?;
    let uploaded_by = get_optional_str(params, "uploadedBy");
    with_apply_context(conn, uploaded_by.as_deref(), |ctx| {
        let summary = apply_all(conn, ctx, &job_id)?;
        Ok(json!(summary))
    })
}

fn import_rollback(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let job_id = get_required_str(params, "jobId")?;
    let dry_run = match params.get("dryRun") {
        None | Some(Value::Null) => false,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params("dryRun must be boolean"))?,
    };
    let outcome = rollback(conn, &job_id, dry_run)?;
    Ok(json!(outcome))
}

/// Preview followed by apply-all on the same job.
fn import_run(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = preview_input(params)?;
    let preview = create_preview_job(conn, &input)?;
    with_apply_context(conn, input.uploaded_by.as_deref(), |ctx| {
        let applied = apply_all(conn, ctx, &preview.job_id)?;
        let mut errors = preview
            .errors
            .iter()
            .map(|e| json!({ "sheet": e.sheet, "row": e.row, "error": e.error }))
            .collect::<Vec<_>>();
        errors.extend(applied.errors.iter().map(|e| {
            json!({ "sheet": "clients", "row": e.row_number, "rowId": e.row_id, "error": e.error })
        }));
        Ok(json!({
            "jobId": preview.job_id,
            "totals": preview.totals,
            "pendingCount": preview.pending_count,
            "inputDigest": preview.input_digest,
            "created": applied.created,
            "updated": applied.updated,
            "errors": errors
        }))
    })
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "import.preview" => Some(respond(state, req, import_preview)),
        "import.applyRow" => Some(respond(state, req, import_apply_row)),
        "import.applyAll" => Some(respond(state, req, import_apply_all)),
        "import.rollback" => Some(respond(state, req, import_rollback)),
        "import.run" => Some(respond(state, req, import_run)),
        _ => None,
    }
}
