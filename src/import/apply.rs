//! Applies staged clients rows, one transaction per row.
//!
//! Each row resolves its school, provider and schedule slot from the payloads
//! staged at preview time, passes capacity admission, and creates or updates
//! the client. The undo snapshot written alongside is what rollback replays.

use super::capacity::{admit, AdmissionLabels};
use super::catalog::{ensure_baseline_seeds, ensure_catalog_entry, CatalogCategory};
use super::clients::{
    find_client_by_name, insert_client, unique_identifier_code, unique_identifier_name,
    update_client, ClientFields, ClientRecord, NewClient,
};
use super::error::{ImportError, Result};
use super::jobs::{
    get_job, get_row, mark_row_error, mark_row_success, pending_client_rows,
    refresh_job_completion, set_job_status, sheet_payloads, ImportJob, ImportJobRow, JobStatus,
    RowStatus,
};
use super::notify::{dispatch, ImportEvent, Notifier};
use super::resolve::{
    ensure_provider_identity, ensure_sub_unit, find_provider_identity, find_schedule_slot,
    load_provider_profile, upsert_schedule_slot, ProviderAttributes, ProviderProfileRow,
    ScheduleSlotRow,
};
use super::settings::ImportSettings;
use super::sheets::{
    identifier_base, non_empty, normalize_key, parse_bool, parse_date, schedule_key,
    ClientSheetRow, ProviderSheetRow, RosterSheetRow, Sheet, Weekday,
};
use super::with_immediate_tx;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientUndo {
    #[serde(rename_all = "camelCase")]
    Create { entity_id: String },
    #[serde(rename_all = "camelCase")]
    Update { before: ClientRecord },
}

/// Everything needed to put the database back the way this row found it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UndoSnapshot {
    pub client: ClientUndo,
    pub tenant_id: String,
    pub provider_id: String,
    pub sub_unit_id: String,
    pub weekday: Weekday,
    pub profile_before: Option<ProviderProfileRow>,
    pub schedule_before: Option<ScheduleSlotRow>,
    pub created_sub_unit: bool,
    pub affiliation_before: Option<bool>,
    pub created_provider: bool,
    pub created_provider_tenant: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    Created,
    Updated,
}

impl ApplyAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub success: bool,
    pub created_entity_id: String,
    pub message: ApplyAction,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub row_id: String,
    pub row_number: i64,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ApplyAllSummary {
    pub applied: usize,
    #[serde(skip)]
    pub created: usize,
    #[serde(skip)]
    pub updated: usize,
    pub errors: Vec<RowFailure>,
}

pub struct ApplyContext<'a> {
    pub settings: &'a ImportSettings,
    pub notifier: &'a dyn Notifier,
    pub uploaded_by: Option<&'a str>,
}

/// Rejects rows that cannot be applied at all. These leave the row untouched.
fn check_applicable(conn: &Connection, job_id: &str, row_id: &str) -> Result<(ImportJob, ImportJobRow)> {
    let job = get_job(conn, job_id)?;
    let row = get_row(conn, job_id, row_id)?;
    if job.status == JobStatus::RolledBack {
        return Err(ImportError::InvalidState("Job has been rolled back".into()));
    }
    if row.status != RowStatus::Pending {
        return Err(ImportError::InvalidState("Only PENDING rows can be applied".into()));
    }
    if row.sheet != Sheet::Clients {
        return Err(ImportError::InvalidState(
            "Only clients rows are directly applicable".into(),
        ));
    }
    Ok((job, row))
}

/// First staged providers row whose clinician matches `provider_name`.
fn staged_provider(conn: &Connection, job_id: &str, provider_name: &str) -> Result<ProviderSheetRow> {
    let key = normalize_key(provider_name);
    sheet_payloads(conn, job_id, Sheet::Providers)?
        .iter()
        .map(|p| ProviderSheetRow::from_raw(&p.raw))
        .find(|p| normalize_key(&p.clinician_name) == key)
        .ok_or_else(|| {
            ImportError::Validation(format!("Provider not found in preview job: {}", provider_name))
        })
}

/// First staged roster row for the school/provider/day key.
fn staged_roster(
    conn: &Connection,
    job_id: &str,
    school: &str,
    provider_name: &str,
    day: Weekday,
) -> Result<RosterSheetRow> {
    let key = schedule_key(school, provider_name, day);
    sheet_payloads(conn, job_id, Sheet::Roster)?
        .iter()
        .map(|p| RosterSheetRow::from_raw(&p.raw))
        .find(|r| r.schedule_key().as_deref() == Some(key.as_str()))
        .ok_or_else(|| {
            ImportError::Validation(format!(
                "Roster schedule not found for {} | {} | {}",
                school,
                provider_name,
                day.as_str()
            ))
        })
}

struct AppliedRow {
    outcome: ApplyOutcome,
    events: Vec<ImportEvent>,
}

fn apply_in_tx(
    tx: &Connection,
    ctx: &ApplyContext<'_>,
    job: &ImportJob,
    row: &ImportJobRow,
) -> Result<AppliedRow> {
    let tenant_id = job.tenant_id.as_str();
    let client = ClientSheetRow::from_raw(&row.payload.raw);
    let day = Weekday::parse(&client.day)
        .ok_or_else(|| ImportError::Validation(format!("Invalid Day: {}", client.day)))?;

    ensure_baseline_seeds(tx, tenant_id)?;

    let provider_row = staged_provider(tx, &job.id, &client.provider)?;
    let roster_row = staged_roster(tx, &job.id, &client.school, &client.provider, day)?;

    // Before-states, captured ahead of any write.
    let existing_provider = find_provider_identity(tx, &provider_row.clinician_name)?;
    let profile_before = match &existing_provider {
        Some(id) => load_provider_profile(tx, tenant_id, id)?,
        None => None,
    };

    let school = ensure_sub_unit(tx, tenant_id, &client.school)?;
    let provider = ensure_provider_identity(
        tx,
        tenant_id,
        &provider_row.clinician_name,
        &ProviderAttributes::from_sheet(&provider_row),
        &ctx.settings.placeholder_email_domain,
    )?;
    let schedule_before = find_schedule_slot(tx, tenant_id, &provider.provider_id, &school.id, day)?;
    upsert_schedule_slot(
        tx,
        tenant_id,
        &provider.provider_id,
        &school.id,
        day,
        roster_row.starting_available(),
        non_empty(&roster_row.notes).as_deref(),
    )?;

    let name_key = normalize_key(&client.client_name);
    let existing = find_client_by_name(tx, tenant_id, &school.id, &name_key)?;

    if ctx.settings.enforce_capacity_on_apply {
        admit(
            tx,
            tenant_id,
            &provider.provider_id,
            &school.id,
            day,
            existing.as_ref().map(|c| c.id.as_str()),
            &AdmissionLabels {
                provider: &provider_row.clinician_name,
                school: &school.name,
            },
        )?;
    }

    let insurance_id = ensure_catalog_entry(tx, tenant_id, CatalogCategory::Insurance, &client.insurance)?;
    let requested_status_id =
        ensure_catalog_entry(tx, tenant_id, CatalogCategory::ClientStatus, &client.status)?;
    let current_status_id = ensure_catalog_entry(tx, tenant_id, CatalogCategory::ClientStatus, "Current")?;
    let paperwork_delivery_id =
        ensure_catalog_entry(tx, tenant_id, CatalogCategory::PaperworkDelivery, &client.paperwork_delivery)?;
    let paperwork_status_id =
        ensure_catalog_entry(tx, tenant_id, CatalogCategory::PaperworkStatus, &client.paperwork_status)?;

    // A client with a provider and a day is Current, whatever the sheet said.
    let becomes_current = requested_status_id != current_status_id;

    let fields = ClientFields {
        provider_id: provider.provider_id.clone(),
        weekday: day.as_str().to_string(),
        referral_date: parse_date(&client.referral_date),
        skills: parse_bool(&client.skills),
        insurance_id,
        client_status_id: current_status_id,
        paperwork_delivery_id,
        doc_date: parse_date(&client.doc_date),
        paperwork_status_id,
        grade: non_empty(&client.grade),
        gender: non_empty(&client.gender),
        district: non_empty(&client.district),
        primary_client_language: non_empty(&client.primary_client_language),
        primary_parent_language: non_empty(&client.primary_parent_language),
        internal_notes: non_empty(&client.notes),
    };

    let (client_id, identifier, action, client_undo) = match existing {
        Some(before) => {
            let code = unique_identifier_code(tx, tenant_id, &client.identifier_code)?;
            update_client(tx, &before.id, &before.identifier_name, &code, &fields)?;
            (
                before.id.clone(),
                before.identifier_name.clone(),
                ApplyAction::Updated,
                ClientUndo::Update { before },
            )
        }
        None => {
            let identifier =
                unique_identifier_name(tx, tenant_id, &identifier_base(&client.client_name))?;
            let code = unique_identifier_code(tx, tenant_id, &client.identifier_code)?;
            let id = insert_client(
                tx,
                &NewClient {
                    tenant_id,
                    sub_unit_id: &school.id,
                    identifier_name: &identifier,
                    identifier_code: &code,
                    name_key: &name_key,
                    created_by: ctx.uploaded_by.or(job.uploaded_by.as_deref()),
                    fields: &fields,
                },
            )?;
            (
                id.clone(),
                identifier,
                ApplyAction::Created,
                ClientUndo::Create { entity_id: id },
            )
        }
    };

    let mut events = Vec::new();
    if fields.paperwork_delivery_id.is_some()
        && (fields.doc_date.is_some() || fields.referral_date.is_some())
    {
        events.push(ImportEvent::PaperworkReceived {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.clone(),
            identifier: identifier.clone(),
            school: school.name.clone(),
        });
    }
    if becomes_current {
        events.push(ImportEvent::ClientBecameCurrent {
            tenant_id: tenant_id.to_string(),
            client_id: client_id.clone(),
            identifier,
            provider_id: provider.provider_id.clone(),
            provider_name: provider_row.clinician_name.clone(),
            day: day.as_str().to_string(),
        });
    }

    let undo = UndoSnapshot {
        client: client_undo,
        tenant_id: tenant_id.to_string(),
        provider_id: provider.provider_id.clone(),
        sub_unit_id: school.id.clone(),
        weekday: day,
        profile_before,
        schedule_before,
        created_sub_unit: school.created,
        affiliation_before: school.affiliation_before,
        created_provider: provider.created,
        created_provider_tenant: provider.tenant_link_created,
    };
    mark_row_success(
        tx,
        &job.id,
        &row.id,
        action.as_str(),
        &client_id,
        &serde_json::to_string(&undo)?,
    )?;
    advance_job(tx, job)?;

    Ok(AppliedRow {
        outcome: ApplyOutcome {
            success: true,
            created_entity_id: client_id,
            message: action,
        },
        events,
    })
}

/// `PREVIEW -> RUNNING` on first use, then `COMPLETED` once nothing is pending.
fn advance_job(conn: &Connection, job: &ImportJob) -> Result<()> {
    if job.status == JobStatus::Preview {
        set_job_status(conn, &job.id, JobStatus::Running)?;
    }
    refresh_job_completion(conn, &job.id)?;
    Ok(())
}

pub fn apply_row(
    conn: &Connection,
    ctx: &ApplyContext<'_>,
    job_id: &str,
    row_id: &str,
) -> Result<ApplyOutcome> {
    let (job, row) = check_applicable(conn, job_id, row_id)?;

    match with_immediate_tx(conn, |tx| apply_in_tx(tx, ctx, &job, &row)) {
        Ok(applied) => {
            tracing::info!(
                job_id,
                row_id,
                row_number = row.row_number,
                action = applied.outcome.message.as_str(),
                client_id = %applied.outcome.created_entity_id,
                "import row applied"
            );
            dispatch(ctx.notifier, &applied.events);
            Ok(applied.outcome)
        }
        Err(e) => {
            tracing::warn!(job_id, row_id, row_number = row.row_number, error = %e, "import row failed");
            let message = e.to_string();
            let recorded = with_immediate_tx(conn, |tx| {
                mark_row_error(tx, &row.id, &message)?;
                advance_job(tx, &job)
            });
            if let Err(mark_err) = recorded {
                tracing::warn!(job_id, row_id, error = %mark_err, "could not record row error");
            }
            Err(e)
        }
    }
}

/// Applies every pending clients row in row order, carrying on past failures.
pub fn apply_all(conn: &Connection, ctx: &ApplyContext<'_>, job_id: &str) -> Result<ApplyAllSummary> {
    let job = get_job(conn, job_id)?;
    if job.status == JobStatus::RolledBack {
        return Err(ImportError::InvalidState("Job has been rolled back".into()));
    }
    let mut summary = ApplyAllSummary::default();
    for (row_id, row_number) in pending_client_rows(conn, job_id)? {
        match apply_row(conn, ctx, job_id, &row_id) {
            Ok(outcome) => {
                summary.applied += 1;
                match outcome.message {
                    ApplyAction::Created => summary.created += 1,
                    ApplyAction::Updated => summary.updated += 1,
                }
            }
            Err(e) => summary.errors.push(RowFailure {
                row_id,
                row_number,
                error: e.to_string(),
            }),
        }
    }
    tracing::info!(
        job_id,
        applied = summary.applied,
        errors = summary.errors.len(),
        "import apply-all finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::import::clients::{list_clients, load_client};
    use crate::import::jobs::list_rows;
    use crate::import::notify::{NoopNotifier, SqliteNotifier};
    use crate::import::preview::fixtures::*;
    use crate::import::preview::create_preview_job;

    fn pending_ids(conn: &Connection, job_id: &str) -> Vec<String> {
        list_rows(conn, job_id, Some(Sheet::Clients), Some(RowStatus::Pending))
            .expect("rows")
            .into_iter()
            .map(|r| r.id)
            .collect()
    }

    fn ctx<'a>(settings: &'a ImportSettings, notifier: &'a dyn Notifier) -> ApplyContext<'a> {
        ApplyContext {
            settings,
            notifier,
            uploaded_by: None,
        }
    }

    #[test]
    fn second_client_over_capacity_is_rejected() {
        let conn = db::open_in_memory().expect("db");
        let s = create_preview_job(
            &conn,
            &input(
                vec![
                    client("Amy Lee", "Lincoln", "Jane Doe", "Mon"),
                    client("Bo Chan", "Lincoln", "Jane Doe", "Mon"),
                ],
                vec![provider("Jane Doe")],
                vec![roster("Lincoln", "Jane Doe", "Mon", "1")],
            ),
        )
        .expect("preview");
        let settings = ImportSettings::default();
        let summary = apply_all(&conn, &ctx(&settings, &NoopNotifier), &s.job_id).expect("apply");
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].row_number, 3);
        assert_eq!(
            summary.errors[0].error,
            "No capacity for Jane Doe at Lincoln on Monday (starting 1, current 1)"
        );

        // Nothing from the rejected row survives.
        assert_eq!(list_clients(&conn, "t1").expect("clients").len(), 1);
        let job = get_job(&conn, &s.job_id).expect("job");
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn capacity_can_be_switched_off() {
        let conn = db::open_in_memory().expect("db");
        let s = create_preview_job(
            &conn,
            &input(
                vec![
                    client("Amy Lee", "Lincoln", "Jane Doe", "Mon"),
                    client("Bo Chan", "Lincoln", "Jane Doe", "Mon"),
                ],
                vec![provider("Jane Doe")],
                vec![roster("Lincoln", "Jane Doe", "Mon", "1")],
            ),
        )
        .expect("preview");
        let settings = ImportSettings {
            enforce_capacity_on_apply: false,
            ..Default::default()
        };
        let summary = apply_all(&conn, &ctx(&settings, &NoopNotifier), &s.job_id).expect("apply");
        assert_eq!(summary.applied, 2);
    }

    #[test]
    fn reimport_updates_and_keeps_referral_date() {
        let conn = db::open_in_memory().expect("db");
        let settings = ImportSettings::default();
        let mut first = client("Amy Lee", "Lincoln", "Jane Doe", "Mon");
        first.insert("Referral Date".into(), "2024-09-01".into());
        let a = create_preview_job(
            &conn,
            &input(vec![first], vec![provider("Jane Doe")], vec![roster("Lincoln", "Jane Doe", "Mon", "1")]),
        )
        .expect("preview a");
        let ids = pending_ids(&conn, &a.job_id);
        let created = apply_row(&conn, &ctx(&settings, &NoopNotifier), &a.job_id, &ids[0]).expect("create");
        assert_eq!(created.message, ApplyAction::Created);

        let mut second = client("Amy Lee", "lincoln", "Jane Doe", "Monday");
        second.insert("Referral Date".into(), "2025-02-02".into());
        second.insert("Grade".into(), "4".into());
        let b = create_preview_job(
            &conn,
            &input(vec![second], vec![provider("Jane Doe")], vec![roster("Lincoln", "Jane Doe", "Mon", "1")]),
        )
        .expect("preview b");
        let ids = pending_ids(&conn, &b.job_id);
        // The client already holds the only seat; it does not count against itself.
        let updated = apply_row(&conn, &ctx(&settings, &NoopNotifier), &b.job_id, &ids[0]).expect("update");
        assert_eq!(updated.message, ApplyAction::Updated);
        assert_eq!(updated.created_entity_id, created.created_entity_id);

        let c = load_client(&conn, &created.created_entity_id).expect("load").expect("client");
        assert_eq!(c.referral_date.as_deref(), Some("2024-09-01"));
        assert_eq!(c.grade.as_deref(), Some("4"));
        assert_eq!(c.identifier_name, "AmyLee");
    }

    #[test]
    fn clients_sharing_an_identifier_base_stay_separate() {
        let conn = db::open_in_memory().expect("db");
        let settings = ImportSettings::default();
        let mut amy = client("Amy Lee", "Lincoln", "Jane Doe", "Mon");
        amy.insert("Grade".into(), "2".into());
        let mut leeson = client("Amy Leeson", "Lincoln", "Jane Doe", "Mon");
        leeson.insert("Grade".into(), "5".into());
        let s = create_preview_job(
            &conn,
            &input(vec![amy, leeson], vec![provider("Jane Doe")], vec![roster("Lincoln", "Jane Doe", "Mon", "5")]),
        )
        .expect("preview");
        let ids = pending_ids(&conn, &s.job_id);
        let first = apply_row(&conn, &ctx(&settings, &NoopNotifier), &s.job_id, &ids[0]).expect("amy");
        let second = apply_row(&conn, &ctx(&settings, &NoopNotifier), &s.job_id, &ids[1]).expect("leeson");
        assert_eq!(first.message, ApplyAction::Created);
        assert_eq!(second.message, ApplyAction::Created);
        assert_ne!(first.created_entity_id, second.created_entity_id);

        let amy = load_client(&conn, &first.created_entity_id).expect("load").expect("amy");
        let leeson = load_client(&conn, &second.created_entity_id).expect("load").expect("leeson");
        assert_eq!(amy.identifier_name, "AmyLee");
        assert_eq!(amy.grade.as_deref(), Some("2"));
        assert_eq!(leeson.identifier_name, "AmyLee2");
        assert_eq!(leeson.grade.as_deref(), Some("5"));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM clients", [], |r| r.get(0))
            .expect("count");
        assert_eq!(count, 2);

        // Re-importing "Amy Lee" lands on Amy, not on the suffixed AmyLee2.
        let again = create_preview_job(
            &conn,
            &input(
                vec![client("Amy Lee", "Lincoln", "Jane Doe", "Mon")],
                vec![provider("Jane Doe")],
                vec![roster("Lincoln", "Jane Doe", "Mon", "5")],
            ),
        )
        .expect("preview again");
        let ids = pending_ids(&conn, &again.job_id);
        let updated = apply_row(&conn, &ctx(&settings, &NoopNotifier), &again.job_id, &ids[0]).expect("update");
        assert_eq!(updated.message, ApplyAction::Updated);
        assert_eq!(updated.created_entity_id, amy.id);
    }

    #[test]
    fn applied_rows_cannot_be_applied_again() {
        let conn = db::open_in_memory().expect("db");
        let settings = ImportSettings::default();
        let s = create_preview_job(
            &conn,
            &input(
                vec![client("Amy Lee", "Lincoln", "Jane Doe", "Mon")],
                vec![provider("Jane Doe")],
                vec![roster("Lincoln", "Jane Doe", "Mon", "3")],
            ),
        )
        .expect("preview");
        let ids = pending_ids(&conn, &s.job_id);
        apply_row(&conn, &ctx(&settings, &NoopNotifier), &s.job_id, &ids[0]).expect("apply");
        let e = apply_row(&conn, &ctx(&settings, &NoopNotifier), &s.job_id, &ids[0]).expect_err("again");
        assert_eq!(e.code(), "invalid_state");
        let row = get_row(&conn, &s.job_id, &ids[0]).expect("row");
        assert_eq!(row.status, RowStatus::Success);
        assert_eq!(row.applied_seq, Some(1));
    }

    #[test]
    fn reference_rows_are_not_applicable() {
        let conn = db::open_in_memory().expect("db");
        let settings = ImportSettings::default();
        let s = create_preview_job(
            &conn,
            &input(vec![], vec![provider("Jane Doe")], vec![]),
        )
        .expect("preview");
        let rows = list_rows(&conn, &s.job_id, Some(Sheet::Providers), None).expect("rows");
        let e = apply_row(&conn, &ctx(&settings, &NoopNotifier), &s.job_id, &rows[0].id).expect_err("ref");
        assert_eq!(e.code(), "invalid_state");
        let row = get_row(&conn, &s.job_id, &rows[0].id).expect("row");
        assert_eq!(row.status, RowStatus::Pending);
    }

    #[test]
    fn becoming_current_and_paperwork_notify() {
        let conn = db::open_in_memory().expect("db");
        let settings = ImportSettings::default();
        let mut row = client("Amy Lee", "Lincoln", "Jane Doe", "Mon");
        row.insert("Paperwork Delivery".into(), "Uploaded".into());
        row.insert("Doc Date".into(), "9/3/2024".into());
        let s = create_preview_job(
            &conn,
            &input(vec![row], vec![provider("Jane Doe")], vec![roster("Lincoln", "Jane Doe", "Mon", "1")]),
        )
        .expect("preview");
        let notifier = SqliteNotifier::new(&conn);
        let ids = pending_ids(&conn, &s.job_id);
        let out = apply_row(&conn, &ctx(&settings, &notifier), &s.job_id, &ids[0]).expect("apply");

        let kinds = conn
            .prepare("SELECT kind FROM notifications ORDER BY kind")
            .expect("prepare")
            .query_map([], |r| r.get::<_, String>(0))
            .expect("query")
            .collect::<rusqlite::Result<Vec<_>>>()
            .expect("rows");
        assert_eq!(
            kinds,
            vec!["client_became_current", "client_became_current", "paperwork_received"]
        );

        let c = load_client(&conn, &out.created_entity_id).expect("load").expect("client");
        let status: String = conn
            .query_row(
                "SELECT display_name FROM catalog_entries WHERE id = ?",
                [c.client_status_id.as_deref().unwrap_or_default()],
                |r| r.get(0),
            )
            .expect("status");
        assert_eq!(status, "Current");
        assert_eq!(c.doc_date.as_deref(), Some("2024-09-03"));
    }
}
