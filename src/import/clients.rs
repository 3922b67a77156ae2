//! Client records as the import engine writes them.

use super::error::{ImportError, Result};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A full `clients` row. Update snapshots keep it verbatim so rollback can
/// put every column back.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub id: String,
    pub tenant_id: String,
    pub sub_unit_id: String,
    pub provider_id: Option<String>,
    pub identifier_name: String,
    pub identifier_code: Option<String>,
    pub name_key: Option<String>,
    pub status: String,
    pub source: String,
    pub created_by: Option<String>,
    pub referral_date: Option<String>,
    pub submission_date: Option<String>,
    pub skills: bool,
    pub insurance_id: Option<String>,
    pub client_status_id: Option<String>,
    pub paperwork_delivery_id: Option<String>,
    pub doc_date: Option<String>,
    pub paperwork_status_id: Option<String>,
    pub weekday: Option<String>,
    pub grade: Option<String>,
    pub gender: Option<String>,
    pub district: Option<String>,
    pub primary_client_language: Option<String>,
    pub primary_parent_language: Option<String>,
    pub internal_notes: Option<String>,
}

const CLIENT_COLUMNS: &str = "id, tenant_id, sub_unit_id, provider_id, identifier_name, identifier_code, \
     name_key, status, source, created_by, referral_date, submission_date, skills, insurance_id, client_status_id, \
     paperwork_delivery_id, doc_date, paperwork_status_id, weekday, grade, gender, district, \
     primary_client_language, primary_parent_language, internal_notes";

impl ClientRecord {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            tenant_id: r.get(1)?,
            sub_unit_id: r.get(2)?,
            provider_id: r.get(3)?,
            identifier_name: r.get(4)?,
            identifier_code: r.get(5)?,
            name_key: r.get(6)?,
            status: r.get(7)?,
            source: r.get(8)?,
            created_by: r.get(9)?,
            referral_date: r.get(10)?,
            submission_date: r.get(11)?,
            skills: r.get(12)?,
            insurance_id: r.get(13)?,
            client_status_id: r.get(14)?,
            paperwork_delivery_id: r.get(15)?,
            doc_date: r.get(16)?,
            paperwork_status_id: r.get(17)?,
            weekday: r.get(18)?,
            grade: r.get(19)?,
            gender: r.get(20)?,
            district: r.get(21)?,
            primary_client_language: r.get(22)?,
            primary_parent_language: r.get(23)?,
            internal_notes: r.get(24)?,
        })
    }
}

/// Column values an applied clients row writes.
#[derive(Clone, Debug, Default)]
pub struct ClientFields {
    pub provider_id: String,
    pub weekday: String,
    pub referral_date: Option<String>,
    pub skills: bool,
    pub insurance_id: Option<String>,
    pub client_status_id: Option<String>,
    pub paperwork_delivery_id: Option<String>,
    pub doc_date: Option<String>,
    pub paperwork_status_id: Option<String>,
    pub grade: Option<String>,
    pub gender: Option<String>,
    pub district: Option<String>,
    pub primary_client_language: Option<String>,
    pub primary_parent_language: Option<String>,
    pub internal_notes: Option<String>,
}

pub fn load_client(conn: &Connection, client_id: &str) -> Result<Option<ClientRecord>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM clients WHERE id = ?", CLIENT_COLUMNS),
            [client_id],
            ClientRecord::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_clients(conn: &Connection, tenant_id: &str) -> Result<Vec<ClientRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM clients WHERE tenant_id = ? ORDER BY identifier_name, id",
        CLIENT_COLUMNS
    ))?;
    let rows = stmt
        .query_map([tenant_id], ClientRecord::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Finds the client a re-imported row refers to: same tenant, same school and
/// the same normalised full name. Clients who only share an identifier base
/// are different people.
pub fn find_client_by_name(
    conn: &Connection,
    tenant_id: &str,
    sub_unit_id: &str,
    name_key: &str,
) -> Result<Option<ClientRecord>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM clients
                 WHERE tenant_id = ?1 AND sub_unit_id = ?2 AND name_key = ?3
                 ORDER BY rowid ASC
                 LIMIT 1",
                CLIENT_COLUMNS
            ),
            (tenant_id, sub_unit_id, name_key),
            ClientRecord::from_row,
        )
        .optional()?;
    Ok(row)
}

/// `base`, `base2`, `base3`, ... whichever is free within the tenant.
pub fn unique_identifier_name(conn: &Connection, tenant_id: &str, base: &str) -> Result<String> {
    let taken = |candidate: &str| -> Result<bool> {
        Ok(conn
            .query_row(
                "SELECT 1 FROM clients WHERE tenant_id = ? AND identifier_name = ? LIMIT 1",
                (tenant_id, candidate),
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    };
    if !taken(base)? {
        return Ok(base.to_string());
    }
    for i in 2..10_000 {
        let candidate = format!("{}{}", base, i);
        if !taken(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(ImportError::InvalidState(format!(
        "no free client identifier for {}",
        base
    )))
}

fn code_taken(conn: &Connection, tenant_id: &str, code: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM clients WHERE tenant_id = ? AND identifier_code = ? LIMIT 1",
            (tenant_id, code),
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Six-digit code unique within the tenant. A supplied six-digit code is
/// kept when it is free; otherwise one is drawn at random.
pub fn unique_identifier_code(conn: &Connection, tenant_id: &str, supplied: &str) -> Result<String> {
    let supplied = supplied.trim();
    if supplied.len() == 6
        && supplied.chars().all(|c| c.is_ascii_digit())
        && !code_taken(conn, tenant_id, supplied)?
    {
        return Ok(supplied.to_string());
    }
    let mut rng = rand::rng();
    for _ in 0..100 {
        let candidate = rng.random_range(100_000..1_000_000).to_string();
        if !code_taken(conn, tenant_id, &candidate)? {
            return Ok(candidate);
        }
    }
    Err(ImportError::InvalidState(
        "no free identifier code after 100 attempts".into(),
    ))
}

pub struct NewClient<'a> {
    pub tenant_id: &'a str,
    pub sub_unit_id: &'a str,
    pub identifier_name: &'a str,
    pub identifier_code: &'a str,
    pub name_key: &'a str,
    pub created_by: Option<&'a str>,
    pub fields: &'a ClientFields,
}

pub fn insert_client(conn: &Connection, new: &NewClient<'_>) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let f = new.fields;
    let today = chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string();
    conn.execute(
        "INSERT INTO clients(
            id, tenant_id, sub_unit_id, provider_id, identifier_name, identifier_code, name_key,
            status, source, created_by, referral_date, submission_date, skills,
            insurance_id, client_status_id, paperwork_delivery_id, doc_date, paperwork_status_id,
            weekday, grade, gender, district, primary_client_language, primary_parent_language,
            internal_notes
         ) VALUES(?, ?, ?, ?, ?, ?, ?, 'ACTIVE', 'BULK_IMPORT', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &id,
            new.tenant_id,
            new.sub_unit_id,
            &f.provider_id,
            new.identifier_name,
            new.identifier_code,
            new.name_key,
            new.created_by,
            f.referral_date,
            f.referral_date.clone().unwrap_or(today),
            f.skills,
            f.insurance_id,
            f.client_status_id,
            f.paperwork_delivery_id,
            f.doc_date,
            f.paperwork_status_id,
            &f.weekday,
            f.grade,
            f.gender,
            f.district,
            f.primary_client_language,
            f.primary_parent_language,
            f.internal_notes,
        ],
    )?;
    Ok(id)
}

/// Re-import onto an existing client. The identifier pair and a referral
/// date already on file are only filled, never replaced.
pub fn update_client(
    conn: &Connection,
    client_id: &str,
    identifier_name: &str,
    identifier_code: &str,
    f: &ClientFields,
) -> Result<()> {
    conn.execute(
        "UPDATE clients
         SET provider_id = ?,
             weekday = ?,
             skills = ?,
             insurance_id = ?,
             client_status_id = ?,
             paperwork_delivery_id = ?,
             doc_date = ?,
             paperwork_status_id = ?,
             grade = ?,
             gender = ?,
             district = ?,
             primary_client_language = ?,
             primary_parent_language = ?,
             internal_notes = ?,
             identifier_name = COALESCE(identifier_name, ?),
             identifier_code = COALESCE(identifier_code, ?),
             referral_date = COALESCE(referral_date, ?)
         WHERE id = ?",
        rusqlite::params![
            &f.provider_id,
            &f.weekday,
            f.skills,
            f.insurance_id,
            f.client_status_id,
            f.paperwork_delivery_id,
            f.doc_date,
            f.paperwork_status_id,
            f.grade,
            f.gender,
            f.district,
            f.primary_client_language,
            f.primary_parent_language,
            f.internal_notes,
            identifier_name,
            identifier_code,
            f.referral_date,
            client_id,
        ],
    )?;
    Ok(())
}

/// Writes every column of `before` back onto its row.
pub fn restore_client(conn: &Connection, before: &ClientRecord) -> Result<()> {
    conn.execute(
        "UPDATE clients
         SET tenant_id = ?, sub_unit_id = ?, provider_id = ?, identifier_name = ?, identifier_code = ?,
             name_key = ?, status = ?, source = ?, created_by = ?, referral_date = ?, submission_date = ?,
             skills = ?, insurance_id = ?, client_status_id = ?, paperwork_delivery_id = ?,
             doc_date = ?, paperwork_status_id = ?, weekday = ?, grade = ?, gender = ?,
             district = ?, primary_client_language = ?, primary_parent_language = ?,
             internal_notes = ?
         WHERE id = ?",
        rusqlite::params![
            &before.tenant_id,
            &before.sub_unit_id,
            before.provider_id,
            &before.identifier_name,
            before.identifier_code,
            before.name_key,
            &before.status,
            &before.source,
            before.created_by,
            before.referral_date,
            before.submission_date,
            before.skills,
            before.insurance_id,
            before.client_status_id,
            before.paperwork_delivery_id,
            before.doc_date,
            before.paperwork_status_id,
            before.weekday,
            before.grade,
            before.gender,
            before.district,
            before.primary_client_language,
            before.primary_parent_language,
            before.internal_notes,
            &before.id,
        ],
    )?;
    Ok(())
}

pub fn delete_client(conn: &Connection, client_id: &str) -> Result<()> {
    conn.execute("DELETE FROM clients WHERE id = ?", [client_id])?;
    Ok(())
}
