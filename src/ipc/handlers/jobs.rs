use crate::import::jobs::{get_job, list_jobs, list_rows, RowStatus};
use crate::import::sheets::Sheet;
use crate::ipc::handlers::setup::load_import_settings;
use crate::ipc::helpers::{get_optional_str, get_required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn jobs_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let tenant_id = get_required_str(params, "tenantId")?;
    let limit = match params.get("limit") {
        None | Some(Value::Null) => load_import_settings(conn)?.jobs_list_limit,
        Some(v) => match v.as_i64() {
            Some(n) if (1..=500).contains(&n) => n,
            _ => return Err(HandlerErr::bad_params("limit must be integer in 1..=500")),
        },
    };
    let jobs = list_jobs(conn, &tenant_id, limit)?;
    Ok(json!({ "jobs": jobs }))
}

fn jobs_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let job_id = get_required_str(params, "jobId")?;
    let job = get_job(conn, &job_id)?;
    Ok(json!({ "job": job }))
}

fn jobs_rows(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let job_id = get_required_str(params, "jobId")?;
    let sheet = match get_optional_str(params, "sheet") {
        Some(s) => Some(
            Sheet::parse(&s.to_ascii_lowercase())
                .ok_or_else(|| HandlerErr::bad_params("sheet must be one of: clients, providers, roster"))?,
        ),
        None => None,
    };
    let status = match get_optional_str(params, "status") {
        Some(s) => Some(RowStatus::parse(&s.to_ascii_uppercase()).ok_or_else(|| {
            HandlerErr::bad_params("status must be one of: PENDING, SUCCESS, ERROR, SKIPPED")
        })?),
        None => None,
    };
    // Unknown job ids are reported rather than listed as empty.
    get_job(conn, &job_id)?;
    let rows = list_rows(conn, &job_id, sheet, status)?;
    Ok(json!({ "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "jobs.list" => Some(respond(state, req, jobs_list)),
        "jobs.get" => Some(respond(state, req, jobs_get)),
        "jobs.rows" => Some(respond(state, req, jobs_rows)),
        _ => None,
    }
}
