//! Preview staging: one job plus one row record per input row, with no
//! writes to domain entities beyond the tenant's baseline vocabulary.

use super::catalog::ensure_baseline_seeds;
use super::error::{ImportError, Result};
use super::jobs::{insert_job, insert_row, ClientComputed, NewJob, NewRow, RowStatus, StagedPayload};
use super::sheets::{
    identifier_base, normalize_key, schedule_key, validate_shape, ClientSheetRow, ProviderSheetRow,
    RawRow, RosterSheetRow, Sheet, Weekday,
};
use super::with_immediate_tx;
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

#[derive(Clone, Debug, Default)]
pub struct PreviewInput {
    pub tenant_id: String,
    pub uploaded_by: Option<String>,
    pub clients: Vec<RawRow>,
    pub providers: Vec<RawRow>,
    pub roster: Vec<RawRow>,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct Totals {
    pub clients: usize,
    pub providers: usize,
    pub roster: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RowIssue {
    pub sheet: Sheet,
    pub row: i64,
    pub error: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSummary {
    pub job_id: String,
    pub totals: Totals,
    pub pending_count: usize,
    pub errors: Vec<RowIssue>,
    pub input_digest: String,
}

/// Spreadsheet row number of the `idx`-th data row; the header is row 1.
fn row_number(idx: usize) -> i64 {
    idx as i64 + 2
}

/// SHA-256 over the three sheets. `RawRow` is ordered by header, so equal
/// inputs hash equally whatever order their columns arrived in.
pub fn input_digest(input: &PreviewInput) -> Result<String> {
    let canonical = serde_json::to_vec(&serde_json::json!({
        "clients": input.clients,
        "providers": input.providers,
        "roster": input.roster,
    }))?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

/// Read-only checks for one clients row against the other two sheets.
fn validate_client_row(
    row: &ClientSheetRow,
    provider_keys: &HashSet<String>,
    roster_keys: &HashSet<String>,
) -> std::result::Result<ClientComputed, String> {
    if row.client_name.is_empty() {
        return Err("Client Name is required".into());
    }
    if row.school.is_empty() {
        return Err("School is required".into());
    }
    if row.provider.is_empty() {
        return Err("Provider is required".into());
    }
    let day = Weekday::parse(&row.day).ok_or_else(|| format!("Invalid Day: {}", row.day))?;
    if !provider_keys.contains(&normalize_key(&row.provider)) {
        return Err(format!("Provider not found in Providers sheet: {}", row.provider));
    }
    if !roster_keys.contains(&schedule_key(&row.school, &row.provider, day)) {
        return Err(format!(
            "Roster missing schedule for {} | {} | {}",
            row.school,
            row.provider,
            day.as_str()
        ));
    }
    Ok(ClientComputed {
        school_name: row.school.clone(),
        provider_name: row.provider.clone(),
        day: day.as_str().to_string(),
        identifier_base: identifier_base(&row.client_name),
    })
}

pub fn create_preview_job(conn: &Connection, input: &PreviewInput) -> Result<PreviewSummary> {
    if input.tenant_id.trim().is_empty() {
        return Err(ImportError::Validation("tenantId is required".into()));
    }
    validate_shape(&input.clients, &input.providers, &input.roster)?;

    let digest = input_digest(input)?;
    let totals = Totals {
        clients: input.clients.len(),
        providers: input.providers.len(),
        roster: input.roster.len(),
    };

    let summary = with_immediate_tx(conn, |tx| {
        let job_id = insert_job(
            tx,
            &NewJob {
                tenant_id: &input.tenant_id,
                uploaded_by: input.uploaded_by.as_deref(),
                totals: (totals.clients, totals.providers, totals.roster),
                input_digest: &digest,
            },
        )?;
        ensure_baseline_seeds(tx, &input.tenant_id)?;

        let mut provider_keys = HashSet::new();
        for (idx, raw) in input.providers.iter().enumerate() {
            let row = ProviderSheetRow::from_raw(raw);
            let key = normalize_key(&row.clinician_name);
            if !key.is_empty() {
                provider_keys.insert(key);
            }
            let identifier = if row.clinician_name.is_empty() {
                format!("row-{}", row_number(idx))
            } else {
                row.clinician_name.clone()
            };
            insert_row(
                tx,
                &job_id,
                &NewRow {
                    sheet: Sheet::Providers,
                    row_number: row_number(idx),
                    identifier: Some(&identifier),
                    status: RowStatus::Pending,
                    action: "preview",
                    message: None,
                    payload: &StagedPayload {
                        raw: raw.clone(),
                        computed: None,
                    },
                },
            )?;
        }

        let mut roster_keys = HashSet::new();
        for (idx, raw) in input.roster.iter().enumerate() {
            let row = RosterSheetRow::from_raw(raw);
            if let Some(key) = row.schedule_key() {
                roster_keys.insert(key);
            }
            let identifier = format!("{} | {} | {}", row.school, row.provider_name, row.day);
            insert_row(
                tx,
                &job_id,
                &NewRow {
                    sheet: Sheet::Roster,
                    row_number: row_number(idx),
                    identifier: Some(identifier.trim()),
                    status: RowStatus::Pending,
                    action: "preview",
                    message: None,
                    payload: &StagedPayload {
                        raw: raw.clone(),
                        computed: None,
                    },
                },
            )?;
        }

        let mut pending_count = 0;
        let mut errors = Vec::new();
        for (idx, raw) in input.clients.iter().enumerate() {
            let row = ClientSheetRow::from_raw(raw);
            let number = row_number(idx);
            match validate_client_row(&row, &provider_keys, &roster_keys) {
                Ok(computed) => {
                    pending_count += 1;
                    let identifier = computed.identifier_base.clone();
                    insert_row(
                        tx,
                        &job_id,
                        &NewRow {
                            sheet: Sheet::Clients,
                            row_number: number,
                            identifier: Some(&identifier),
                            status: RowStatus::Pending,
                            action: "apply",
                            message: None,
                            payload: &StagedPayload {
                                raw: raw.clone(),
                                computed: Some(computed),
                            },
                        },
                    )?;
                }
                Err(message) => {
                    insert_row(
                        tx,
                        &job_id,
                        &NewRow {
                            sheet: Sheet::Clients,
                            row_number: number,
                            identifier: (!row.client_name.is_empty()).then_some(row.client_name.as_str()),
                            status: RowStatus::Error,
                            action: "apply",
                            message: Some(&message),
                            payload: &StagedPayload {
                                raw: raw.clone(),
                                computed: None,
                            },
                        },
                    )?;
                    errors.push(RowIssue {
                        sheet: Sheet::Clients,
                        row: number,
                        error: message,
                    });
                }
            }
        }

        Ok(PreviewSummary {
            job_id,
            totals,
            pending_count,
            errors,
            input_digest: digest.clone(),
        })
    })?;

    tracing::info!(
        job_id = %summary.job_id,
        tenant_id = %input.tenant_id,
        pending = summary.pending_count,
        errors = summary.errors.len(),
        "import preview staged"
    );
    Ok(summary)
}
