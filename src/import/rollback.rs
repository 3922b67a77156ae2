//! Replays undo snapshots, newest application first.

use super::apply::{ClientUndo, UndoSnapshot};
use super::clients::{delete_client, restore_client};
use super::error::Result;
use super::jobs::{get_job, mark_row_skipped, set_job_status, JobStatus};
use super::resolve::{ProviderProfileRow, ScheduleSlotRow};
use super::with_immediate_tx;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub rolled_back: usize,
    pub dry_run: bool,
}

fn reversible_rows(conn: &Connection, job_id: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, undo_json FROM import_job_rows
         WHERE job_id = ? AND sheet = 'clients' AND status = 'SUCCESS' AND undo_json IS NOT NULL
         ORDER BY applied_seq DESC, applied_at DESC",
    )?;
    let rows = stmt
        .query_map([job_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn restore_schedule_slot(conn: &Connection, undo: &UndoSnapshot) -> Result<()> {
    match &undo.schedule_before {
        Some(ScheduleSlotRow {
            id,
            starting_available,
            notes,
            ..
        }) => {
            conn.execute(
                "UPDATE schedule_slots SET starting_available = ?, notes = ? WHERE id = ?",
                (starting_available, notes, id),
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM schedule_slots
                 WHERE tenant_id = ? AND provider_id = ? AND sub_unit_id = ? AND weekday = ?",
                (
                    &undo.tenant_id,
                    &undo.provider_id,
                    &undo.sub_unit_id,
                    undo.weekday.as_str(),
                ),
            )?;
        }
    }
    Ok(())
}

fn restore_provider_profile(conn: &Connection, undo: &UndoSnapshot) -> Result<()> {
    match &undo.profile_before {
        Some(p) => restore_profile_row(conn, p),
        None => {
            conn.execute(
                "DELETE FROM provider_profiles WHERE tenant_id = ? AND provider_id = ?",
                (&undo.tenant_id, &undo.provider_id),
            )?;
            Ok(())
        }
    }
}

fn restore_profile_row(conn: &Connection, p: &ProviderProfileRow) -> Result<()> {
    conn.execute(
        "UPDATE provider_profiles
         SET status = ?, credential_id = ?, display_name = ?,
             accepts_medicaid = ?, accepts_commercial = ?, accepts_tricare = ?,
             background_check_date = ?, background_status = ?, cleared_to_start = ?,
             risk_high_behavior = ?, risk_suicidal = ?, risk_substance_use = ?, risk_trauma = ?,
             risk_skills = ?, staff_notes = ?
         WHERE id = ?",
        rusqlite::params![
            &p.status,
            p.credential_id,
            p.display_name,
            p.accepts_medicaid,
            p.accepts_commercial,
            p.accepts_tricare,
            p.background_check_date,
            p.background_status,
            p.cleared_to_start,
            p.risk_high_behavior,
            p.risk_suicidal,
            p.risk_substance_use,
            p.risk_trauma,
            p.risk_skills,
            p.staff_notes,
            &p.id,
        ],
    )?;
    Ok(())
}

/// Removes identity rows this apply created, as long as nothing else has
/// come to depend on them since.
fn remove_created_identities(conn: &Connection, undo: &UndoSnapshot) -> Result<()> {
    if undo.created_provider_tenant {
        conn.execute(
            "DELETE FROM provider_tenants WHERE provider_id = ? AND tenant_id = ?",
            (&undo.provider_id, &undo.tenant_id),
        )?;
    }
    if undo.created_provider {
        conn.execute(
            "DELETE FROM providers
             WHERE id = ?1
               AND NOT EXISTS (SELECT 1 FROM clients WHERE provider_id = ?1)
               AND NOT EXISTS (SELECT 1 FROM schedule_slots WHERE provider_id = ?1)
               AND NOT EXISTS (SELECT 1 FROM provider_profiles WHERE provider_id = ?1)
               AND NOT EXISTS (SELECT 1 FROM provider_tenants WHERE provider_id = ?1)",
            [&undo.provider_id],
        )?;
    }
    match undo.affiliation_before {
        None => {
            conn.execute(
                "DELETE FROM tenant_affiliations WHERE tenant_id = ? AND sub_unit_id = ?",
                (&undo.tenant_id, &undo.sub_unit_id),
            )?;
        }
        Some(false) => {
            conn.execute(
                "UPDATE tenant_affiliations SET is_active = 0 WHERE tenant_id = ? AND sub_unit_id = ?",
                (&undo.tenant_id, &undo.sub_unit_id),
            )?;
        }
        Some(true) => {}
    }
    if undo.created_sub_unit {
        conn.execute(
            "DELETE FROM sub_units
             WHERE id = ?1
               AND NOT EXISTS (SELECT 1 FROM clients WHERE sub_unit_id = ?1)
               AND NOT EXISTS (SELECT 1 FROM schedule_slots WHERE sub_unit_id = ?1)
               AND NOT EXISTS (SELECT 1 FROM tenant_affiliations WHERE sub_unit_id = ?1)",
            [&undo.sub_unit_id],
        )?;
    }
    Ok(())
}

fn reverse_row(conn: &Connection, row_id: &str, undo: &UndoSnapshot) -> Result<()> {
    match &undo.client {
        ClientUndo::Create { entity_id } => delete_client(conn, entity_id)?,
        ClientUndo::Update { before } => restore_client(conn, before)?,
    }
    restore_schedule_slot(conn, undo)?;
    restore_provider_profile(conn, undo)?;
    remove_created_identities(conn, undo)?;
    mark_row_skipped(conn, row_id, "rolled_back")
}

/// Reverses every successfully applied clients row of the job, each in its
/// own transaction, and marks the job `ROLLED_BACK`. With `dry_run` it only
/// counts what would be reversed.
///
/// A second call finds only `SKIPPED` rows and reverses nothing.
pub fn rollback(conn: &Connection, job_id: &str, dry_run: bool) -> Result<RollbackOutcome> {
    get_job(conn, job_id)?;
    let rows = reversible_rows(conn, job_id)?;
    if dry_run {
        return Ok(RollbackOutcome {
            rolled_back: rows.len(),
            dry_run: true,
        });
    }

    let mut rolled_back = 0;
    for (row_id, undo_json) in rows {
        let undo: UndoSnapshot = serde_json::from_str(&undo_json)?;
        with_immediate_tx(conn, |tx| reverse_row(tx, &row_id, &undo))?;
        rolled_back += 1;
        tracing::debug!(job_id, row_id = %row_id, "import row reversed");
    }
    set_job_status(conn, job_id, JobStatus::RolledBack)?;
    tracing::info!(job_id, rolled_back, "import job rolled back");

    Ok(RollbackOutcome {
        rolled_back,
        dry_run: false,
    })
}
