//! Durable record of import jobs and their staged rows.
//!
//! Row status only ever moves `PENDING -> SUCCESS | ERROR` and
//! `SUCCESS -> SKIPPED`; every transition here is a guarded UPDATE so a stale
//! caller cannot regress a row.

use super::error::{ImportError, Result};
use super::sheets::{RawRow, Sheet};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const JOB_KIND: &str = "CLIENTS_PROVIDERS_ROSTER";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Preview,
    Running,
    Completed,
    RolledBack,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "PREVIEW",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PREVIEW" => Some(Self::Preview),
            "RUNNING" => Some(Self::Running),
            "COMPLETED" => Some(Self::Completed),
            "ROLLED_BACK" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    Pending,
    Success,
    Error,
    Skipped,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "SUCCESS" => Some(Self::Success),
            "ERROR" => Some(Self::Error),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// The only status a row must be in to move to `self`.
    fn required_predecessor(self) -> Option<Self> {
        match self {
            Self::Pending => None,
            Self::Success | Self::Error => Some(Self::Pending),
            Self::Skipped => Some(Self::Success),
        }
    }
}

/// Derived values stored next to a clients row at preview time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientComputed {
    pub school_name: String,
    pub provider_name: String,
    pub day: String,
    pub identifier_base: String,
}

/// What a staged row keeps: the uploaded fields, untouched.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StagedPayload {
    pub raw: RawRow,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<ClientComputed>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: String,
    pub tenant_id: String,
    pub uploaded_by: Option<String>,
    pub kind: String,
    pub status: JobStatus,
    pub total_clients_rows: i64,
    pub total_providers_rows: i64,
    pub total_roster_rows: i64,
    pub input_digest: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const JOB_COLUMNS: &str = "id, tenant_id, uploaded_by, kind, status, total_clients_rows, \
     total_providers_rows, total_roster_rows, input_digest, created_at, updated_at";

impl ImportJob {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = r.get(4)?;
        let status = JobStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                rusqlite::types::Type::Text,
                format!("unknown job status {}", status).into(),
            )
        })?;
        Ok(Self {
            id: r.get(0)?,
            tenant_id: r.get(1)?,
            uploaded_by: r.get(2)?,
            kind: r.get(3)?,
            status,
            total_clients_rows: r.get(5)?,
            total_providers_rows: r.get(6)?,
            total_roster_rows: r.get(7)?,
            input_digest: r.get(8)?,
            created_at: r.get(9)?,
            updated_at: r.get(10)?,
        })
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobRow {
    pub id: String,
    pub job_id: String,
    pub sheet: Sheet,
    pub row_number: i64,
    pub identifier: Option<String>,
    pub status: RowStatus,
    pub action: String,
    pub message: Option<String>,
    pub payload: StagedPayload,
    pub created_entity_id: Option<String>,
    pub created_entity_type: Option<String>,
    pub undo: Option<serde_json::Value>,
    pub applied_seq: Option<i64>,
    pub applied_at: Option<String>,
}

const ROW_COLUMNS: &str = "id, job_id, sheet, row_number, identifier, status, action, message, \
     payload_json, created_entity_id, created_entity_type, undo_json, applied_seq, applied_at";

impl ImportJobRow {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        let sheet: String = r.get(2)?;
        let status: String = r.get(5)?;
        let payload_json: String = r.get(8)?;
        let undo_json: Option<String> = r.get(11)?;
        let bad = |col: usize, msg: String| {
            rusqlite::Error::FromSqlConversionFailure(
                col,
                rusqlite::types::Type::Text,
                msg.into(),
            )
        };
        Ok(Self {
            id: r.get(0)?,
            job_id: r.get(1)?,
            sheet: Sheet::parse(&sheet).ok_or_else(|| bad(2, format!("unknown sheet {}", sheet)))?,
            row_number: r.get(3)?,
            identifier: r.get(4)?,
            status: RowStatus::parse(&status)
                .ok_or_else(|| bad(5, format!("unknown row status {}", status)))?,
            action: r.get(6)?,
            message: r.get(7)?,
            payload: serde_json::from_str(&payload_json).map_err(|e| bad(8, e.to_string()))?,
            created_entity_id: r.get(9)?,
            created_entity_type: r.get(10)?,
            undo: match undo_json {
                Some(s) => Some(serde_json::from_str(&s).map_err(|e| bad(11, e.to_string()))?),
                None => None,
            },
            applied_seq: r.get(12)?,
            applied_at: r.get(13)?,
        })
    }
}

pub fn now_string() -> String {
    Utc::now().to_rfc3339()
}

pub struct NewJob<'a> {
    pub tenant_id: &'a str,
    pub uploaded_by: Option<&'a str>,
    pub totals: (usize, usize, usize),
    pub input_digest: &'a str,
}

pub fn insert_job(conn: &Connection, job: &NewJob<'_>) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = now_string();
    conn.execute(
        "INSERT INTO import_jobs(id, tenant_id, uploaded_by, kind, status, total_clients_rows,
            total_providers_rows, total_roster_rows, input_digest, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            job.tenant_id,
            job.uploaded_by,
            JOB_KIND,
            JobStatus::Preview.as_str(),
            job.totals.0 as i64,
            job.totals.1 as i64,
            job.totals.2 as i64,
            job.input_digest,
            &now,
            &now,
        ],
    )?;
    Ok(id)
}

pub struct NewRow<'a> {
    pub sheet: Sheet,
    pub row_number: i64,
    pub identifier: Option<&'a str>,
    pub status: RowStatus,
    pub action: &'a str,
    pub message: Option<&'a str>,
    pub payload: &'a StagedPayload,
}

pub fn insert_row(conn: &Connection, job_id: &str, row: &NewRow<'_>) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO import_job_rows(id, job_id, sheet, row_number, identifier, status, action, message, payload_json)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            job_id,
            row.sheet.as_str(),
            row.row_number,
            row.identifier,
            row.status.as_str(),
            row.action,
            row.message,
            serde_json::to_string(row.payload)?,
        ],
    )?;
    Ok(id)
}

pub fn get_job(conn: &Connection, job_id: &str) -> Result<ImportJob> {
    conn.query_row(
        &format!("SELECT {} FROM import_jobs WHERE id = ?", JOB_COLUMNS),
        [job_id],
        ImportJob::from_row,
    )
    .optional()?
    .ok_or_else(|| ImportError::NotFound(format!("Job not found: {}", job_id)))
}

pub fn list_jobs(conn: &Connection, tenant_id: &str, limit: i64) -> Result<Vec<ImportJob>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM import_jobs WHERE tenant_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        JOB_COLUMNS
    ))?;
    let jobs = stmt
        .query_map((tenant_id, limit), ImportJob::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(jobs)
}

pub fn get_row(conn: &Connection, job_id: &str, row_id: &str) -> Result<ImportJobRow> {
    conn.query_row(
        &format!(
            "SELECT {} FROM import_job_rows WHERE id = ? AND job_id = ?",
            ROW_COLUMNS
        ),
        [row_id, job_id],
        ImportJobRow::from_row,
    )
    .optional()?
    .ok_or_else(|| ImportError::NotFound("Job row not found".into()))
}

pub fn list_rows(
    conn: &Connection,
    job_id: &str,
    sheet: Option<Sheet>,
    status: Option<RowStatus>,
) -> Result<Vec<ImportJobRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM import_job_rows
         WHERE job_id = ?1
           AND (?2 IS NULL OR sheet = ?2)
           AND (?3 IS NULL OR status = ?3)
         ORDER BY CASE sheet WHEN 'clients' THEN 0 WHEN 'providers' THEN 1 ELSE 2 END, row_number",
        ROW_COLUMNS
    ))?;
    let rows = stmt
        .query_map(
            (job_id, sheet.map(Sheet::as_str), status.map(RowStatus::as_str)),
            ImportJobRow::from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// `(id, row_number)` of the clients rows still waiting to be applied, in
/// sheet order.
pub fn pending_client_rows(conn: &Connection, job_id: &str) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, row_number FROM import_job_rows
         WHERE job_id = ? AND sheet = 'clients' AND status = 'PENDING'
         ORDER BY row_number ASC",
    )?;
    let rows = stmt
        .query_map([job_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;
    Ok(rows)
}

/// Staged payloads of one reference sheet, in row order.
pub fn sheet_payloads(conn: &Connection, job_id: &str, sheet: Sheet) -> Result<Vec<StagedPayload>> {
    let mut stmt = conn.prepare(
        "SELECT payload_json FROM import_job_rows
         WHERE job_id = ? AND sheet = ?
         ORDER BY row_number ASC",
    )?;
    let raw = stmt
        .query_map((job_id, sheet.as_str()), |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    raw.iter()
        .map(|s| serde_json::from_str(s).map_err(ImportError::from))
        .collect()
}

fn transition_row(
    conn: &Connection,
    row_id: &str,
    to: RowStatus,
    message: Option<&str>,
) -> Result<()> {
    let from = to.required_predecessor().ok_or_else(|| {
        ImportError::InvalidState(format!("rows cannot move back to {}", to.as_str()))
    })?;
    let changed = conn.execute(
        "UPDATE import_job_rows SET status = ?, message = ? WHERE id = ? AND status = ?",
        (to.as_str(), message, row_id, from.as_str()),
    )?;
    if changed == 0 {
        return Err(ImportError::InvalidState(format!(
            "Only {} rows can become {}",
            from.as_str(),
            to.as_str()
        )));
    }
    Ok(())
}

pub fn mark_row_success(
    conn: &Connection,
    job_id: &str,
    row_id: &str,
    message: &str,
    created_entity_id: &str,
    undo_json: &str,
) -> Result<()> {
    transition_row(conn, row_id, RowStatus::Success, Some(message))?;
    conn.execute(
        "UPDATE import_job_rows
         SET created_entity_id = ?,
             created_entity_type = 'client',
             undo_json = ?,
             applied_at = ?,
             applied_seq = (SELECT COALESCE(MAX(applied_seq), 0) + 1 FROM import_job_rows WHERE job_id = ?)
         WHERE id = ?",
        (created_entity_id, undo_json, now_string(), job_id, row_id),
    )?;
    Ok(())
}

pub fn mark_row_error(conn: &Connection, row_id: &str, message: &str) -> Result<()> {
    transition_row(conn, row_id, RowStatus::Error, Some(message))
}

pub fn mark_row_skipped(conn: &Connection, row_id: &str, message: &str) -> Result<()> {
    transition_row(conn, row_id, RowStatus::Skipped, Some(message))
}

pub fn set_job_status(conn: &Connection, job_id: &str, status: JobStatus) -> Result<()> {
    conn.execute(
        "UPDATE import_jobs SET status = ?, updated_at = ? WHERE id = ?",
        (status.as_str(), now_string(), job_id),
    )?;
    Ok(())
}

/// Moves a running job to `COMPLETED` once no clients row is left pending.
pub fn refresh_job_completion(conn: &Connection, job_id: &str) -> Result<JobStatus> {
    let job = get_job(conn, job_id)?;
    if job.status != JobStatus::Running {
        return Ok(job.status);
    }
    let pending: i64 = conn.query_row(
        "SELECT COUNT(*) FROM import_job_rows WHERE job_id = ? AND sheet = 'clients' AND status = 'PENDING'",
        [job_id],
        |r| r.get(0),
    )?;
    if pending > 0 {
        return Ok(JobStatus::Running);
    }
    set_job_status(conn, job_id, JobStatus::Completed)?;
    Ok(JobStatus::Completed)
}
