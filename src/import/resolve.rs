//! Find-or-create for the entities a clients row touches: the school
//! (sub-unit), the provider identity with its tenant profile, and the
//! provider/school/day schedule slot.

use super::catalog::{ensure_catalog_entry, CatalogCategory};
use super::error::{ImportError, Result};
use super::sheets::{non_empty, parse_bool, parse_date, slugify, split_name, ProviderSheetRow, Weekday};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct SubUnitResolution {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub created: bool,
    /// `is_active` of the tenant affiliation before it was upserted.
    pub affiliation_before: Option<bool>,
}

pub fn ensure_sub_unit(conn: &Connection, tenant_id: &str, name: &str) -> Result<SubUnitResolution> {
    let clean = name.trim();
    if clean.is_empty() {
        return Err(ImportError::Validation("School is required".into()));
    }

    let existing = conn
        .query_row(
            "SELECT id, name, slug FROM sub_units
             WHERE kind = 'school' AND LOWER(name) = LOWER(?)
             LIMIT 1",
            [clean],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?)),
        )
        .optional()?;

    let (id, name, slug, created) = match existing {
        Some((id, name, slug)) => (id, name, slug, false),
        None => {
            let mut base = slugify(clean);
            if base.is_empty() {
                base = format!("school-{}", &Uuid::new_v4().simple().to_string()[..8]);
            }
            let slug = unique_value(conn, "SELECT 1 FROM sub_units WHERE slug = ?", &base, |i| {
                format!("{}-{}", base, i)
            })?;
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO sub_units(id, name, slug, kind, is_active) VALUES(?, ?, ?, 'school', 1)",
                (&id, clean, &slug),
            )?;
            (id, clean.to_string(), slug, true)
        }
    };

    let affiliation_before = ensure_affiliation(conn, tenant_id, &id)?;
    Ok(SubUnitResolution {
        id,
        name,
        slug,
        created,
        affiliation_before,
    })
}

/// Upserts the tenant <-> sub-unit link and returns its previous state.
fn ensure_affiliation(conn: &Connection, tenant_id: &str, sub_unit_id: &str) -> Result<Option<bool>> {
    let before: Option<i64> = conn
        .query_row(
            "SELECT is_active FROM tenant_affiliations WHERE tenant_id = ? AND sub_unit_id = ?",
            (tenant_id, sub_unit_id),
            |r| r.get(0),
        )
        .optional()?;
    conn.execute(
        "INSERT INTO tenant_affiliations(tenant_id, sub_unit_id, is_active) VALUES(?, ?, 1)
         ON CONFLICT(tenant_id, sub_unit_id) DO UPDATE SET is_active = 1",
        (tenant_id, sub_unit_id),
    )?;
    Ok(before.map(|v| v != 0))
}

/// Tries `base`, then `next(2)`, `next(3)`, ... until `exists_sql` finds no row.
fn unique_value(
    conn: &Connection,
    exists_sql: &str,
    base: &str,
    next: impl Fn(usize) -> String,
) -> Result<String> {
    let mut candidate = base.to_string();
    for i in 2..500 {
        let taken = conn
            .query_row(exists_sql, [&candidate], |_| Ok(()))
            .optional()?
            .is_some();
        if !taken {
            return Ok(candidate);
        }
        candidate = next(i);
    }
    Err(ImportError::InvalidState(format!(
        "unable to find a free value for {}",
        base
    )))
}

/// Tenant-scoped provider attributes, as read from a providers sheet row.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderAttributes {
    pub status: &'static str,
    pub credential: String,
    pub display_name: Option<String>,
    pub accepts_medicaid: bool,
    pub accepts_commercial: bool,
    pub accepts_tricare: bool,
    pub background_check_date: Option<String>,
    pub background_status: Option<String>,
    pub cleared_to_start: bool,
    pub risk_high_behavior: bool,
    pub risk_suicidal: bool,
    pub risk_substance_use: bool,
    pub risk_trauma: bool,
    pub risk_skills: bool,
    pub staff_notes: Option<String>,
}

impl ProviderAttributes {
    pub fn from_sheet(row: &ProviderSheetRow) -> Self {
        Self {
            status: if row.status.trim().eq_ignore_ascii_case("inactive") {
                "INACTIVE"
            } else {
                "ACTIVE"
            },
            credential: non_empty(&row.credential).unwrap_or_else(|| "Unknown".to_string()),
            display_name: non_empty(&row.display_name),
            accepts_medicaid: parse_bool(&row.accepts_medicaid),
            accepts_commercial: parse_bool(&row.accepts_commercial),
            accepts_tricare: parse_bool(&row.accepts_tricare),
            background_check_date: parse_date(&row.background_check_date),
            background_status: non_empty(&row.background_status),
            cleared_to_start: parse_bool(&row.cleared_to_start),
            risk_high_behavior: parse_bool(&row.high_behavioral_needs),
            risk_suicidal: parse_bool(&row.suicidal),
            risk_substance_use: parse_bool(&row.substance_use),
            risk_trauma: parse_bool(&row.trauma),
            risk_skills: parse_bool(&row.skills),
            staff_notes: non_empty(&row.clinician_notes).or_else(|| non_empty(&row.background_notes)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProviderResolution {
    pub provider_id: String,
    pub created: bool,
    pub tenant_link_created: bool,
}

pub fn find_provider_identity(conn: &Connection, clinician_name: &str) -> Result<Option<String>> {
    let (first, last) = split_name(clinician_name);
    let Some(first) = first else {
        return Ok(None);
    };
    let id = conn
        .query_row(
            "SELECT id FROM providers
             WHERE LOWER(first_name) = LOWER(?) AND LOWER(COALESCE(last_name, '')) = LOWER(?)
             ORDER BY rowid
             LIMIT 1",
            (&first, last.unwrap_or_default()),
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

pub fn ensure_provider_identity(
    conn: &Connection,
    tenant_id: &str,
    clinician_name: &str,
    attrs: &ProviderAttributes,
    email_domain: &str,
) -> Result<ProviderResolution> {
    let clean = clinician_name.trim();
    if clean.is_empty() {
        return Err(ImportError::Validation("Clinician Name is required".into()));
    }
    let (first, last) = split_name(clean);
    let Some(first) = first else {
        return Err(ImportError::Validation("Clinician Name is invalid".into()));
    };

    let (provider_id, created) = match find_provider_identity(conn, clean)? {
        Some(id) => (id, false),
        None => {
            let local = {
                let s = slugify(&format!("{}.{}", first, last.as_deref().unwrap_or("provider")));
                if s.is_empty() {
                    format!("provider-{}", &Uuid::new_v4().simple().to_string()[..8])
                } else {
                    s
                }
            };
            let email = unique_value(
                conn,
                "SELECT 1 FROM providers WHERE email = ?",
                &format!("{}@{}", local, email_domain),
                |i| format!("{}-{}@{}", local, i, email_domain),
            )?;
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO providers(id, email, first_name, last_name, role, is_active)
                 VALUES(?, ?, ?, ?, 'clinician', 1)",
                (&id, &email, &first, &last),
            )?;
            (id, true)
        }
    };

    let tenant_link_created = conn.execute(
        "INSERT OR IGNORE INTO provider_tenants(provider_id, tenant_id) VALUES(?, ?)",
        (&provider_id, tenant_id),
    )? > 0;

    let credential_id =
        ensure_catalog_entry(conn, tenant_id, CatalogCategory::ProviderCredential, &attrs.credential)?;
    conn.execute(
        "INSERT INTO provider_profiles(
            id, tenant_id, provider_id, status, credential_id, display_name,
            accepts_medicaid, accepts_commercial, accepts_tricare,
            background_check_date, background_status, cleared_to_start,
            risk_high_behavior, risk_suicidal, risk_substance_use, risk_trauma, risk_skills,
            staff_notes
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(tenant_id, provider_id) DO UPDATE SET
            status = excluded.status,
            credential_id = excluded.credential_id,
            display_name = excluded.display_name,
            accepts_medicaid = excluded.accepts_medicaid,
            accepts_commercial = excluded.accepts_commercial,
            accepts_tricare = excluded.accepts_tricare,
            background_check_date = excluded.background_check_date,
            background_status = excluded.background_status,
            cleared_to_start = excluded.cleared_to_start,
            risk_high_behavior = excluded.risk_high_behavior,
            risk_suicidal = excluded.risk_suicidal,
            risk_substance_use = excluded.risk_substance_use,
            risk_trauma = excluded.risk_trauma,
            risk_skills = excluded.risk_skills,
            staff_notes = excluded.staff_notes",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            tenant_id,
            &provider_id,
            attrs.status,
            credential_id,
            attrs.display_name,
            attrs.accepts_medicaid,
            attrs.accepts_commercial,
            attrs.accepts_tricare,
            attrs.background_check_date,
            attrs.background_status,
            attrs.cleared_to_start,
            attrs.risk_high_behavior,
            attrs.risk_suicidal,
            attrs.risk_substance_use,
            attrs.risk_trauma,
            attrs.risk_skills,
            attrs.staff_notes,
        ],
    )?;

    Ok(ProviderResolution {
        provider_id,
        created,
        tenant_link_created,
    })
}

/// Full `provider_profiles` row, kept verbatim in undo snapshots.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfileRow {
    pub id: String,
    pub tenant_id: String,
    pub provider_id: String,
    pub status: String,
    pub credential_id: Option<String>,
    pub display_name: Option<String>,
    pub accepts_medicaid: bool,
    pub accepts_commercial: bool,
    pub accepts_tricare: bool,
    pub background_check_date: Option<String>,
    pub background_status: Option<String>,
    pub cleared_to_start: bool,
    pub risk_high_behavior: bool,
    pub risk_suicidal: bool,
    pub risk_substance_use: bool,
    pub risk_trauma: bool,
    pub risk_skills: bool,
    pub staff_notes: Option<String>,
}

impl ProviderProfileRow {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            tenant_id: r.get(1)?,
            provider_id: r.get(2)?,
            status: r.get(3)?,
            credential_id: r.get(4)?,
            display_name: r.get(5)?,
            accepts_medicaid: r.get(6)?,
            accepts_commercial: r.get(7)?,
            accepts_tricare: r.get(8)?,
            background_check_date: r.get(9)?,
            background_status: r.get(10)?,
            cleared_to_start: r.get(11)?,
            risk_high_behavior: r.get(12)?,
            risk_suicidal: r.get(13)?,
            risk_substance_use: r.get(14)?,
            risk_trauma: r.get(15)?,
            risk_skills: r.get(16)?,
            staff_notes: r.get(17)?,
        })
    }
}

pub fn load_provider_profile(
    conn: &Connection,
    tenant_id: &str,
    provider_id: &str,
) -> Result<Option<ProviderProfileRow>> {
    let row = conn
        .query_row(
            "SELECT id, tenant_id, provider_id, status, credential_id, display_name,
                    accepts_medicaid, accepts_commercial, accepts_tricare,
                    background_check_date, background_status, cleared_to_start,
                    risk_high_behavior, risk_suicidal, risk_substance_use, risk_trauma, risk_skills,
                    staff_notes
             FROM provider_profiles WHERE tenant_id = ? AND provider_id = ?",
            (tenant_id, provider_id),
            ProviderProfileRow::from_row,
        )
        .optional()?;
    Ok(row)
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSlotRow {
    pub id: String,
    pub tenant_id: String,
    pub provider_id: String,
    pub sub_unit_id: String,
    pub weekday: String,
    pub starting_available: i64,
    pub notes: Option<String>,
}

pub fn find_schedule_slot(
    conn: &Connection,
    tenant_id: &str,
    provider_id: &str,
    sub_unit_id: &str,
    weekday: Weekday,
) -> Result<Option<ScheduleSlotRow>> {
    let row = conn
        .query_row(
            "SELECT id, tenant_id, provider_id, sub_unit_id, weekday, starting_available, notes
             FROM schedule_slots
             WHERE tenant_id = ? AND provider_id = ? AND sub_unit_id = ? AND weekday = ?",
            (tenant_id, provider_id, sub_unit_id, weekday.as_str()),
            |r| {
                Ok(ScheduleSlotRow {
                    id: r.get(0)?,
                    tenant_id: r.get(1)?,
                    provider_id: r.get(2)?,
                    sub_unit_id: r.get(3)?,
                    weekday: r.get(4)?,
                    starting_available: r.get(5)?,
                    notes: r.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Capacity and notes are overwritten on every upsert, never accumulated.
pub fn upsert_schedule_slot(
    conn: &Connection,
    tenant_id: &str,
    provider_id: &str,
    sub_unit_id: &str,
    weekday: Weekday,
    starting_available: i64,
    notes: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO schedule_slots(id, tenant_id, provider_id, sub_unit_id, weekday, starting_available, notes)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(tenant_id, provider_id, sub_unit_id, weekday) DO UPDATE SET
            starting_available = excluded.starting_available,
            notes = excluded.notes",
        (
            Uuid::new_v4().to_string(),
            tenant_id,
            provider_id,
            sub_unit_id,
            weekday.as_str(),
            starting_available.max(0),
            notes,
        ),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn attrs(status: &str, credential: &str) -> ProviderAttributes {
        ProviderAttributes::from_sheet(&ProviderSheetRow {
            status: status.into(),
            credential: credential.into(),
            accepts_medicaid: "yes".into(),
            clinician_notes: String::new(),
            background_notes: "cleared in May".into(),
            ..Default::default()
        })
    }

    #[test]
    fn sub_unit_matches_case_insensitively_and_relinks() {
        let conn = db::open_in_memory().expect("db");
        let a = ensure_sub_unit(&conn, "t1", "Lincoln Elementary").expect("create");
        assert!(a.created);
        assert_eq!(a.slug, "lincoln-elementary");
        assert_eq!(a.affiliation_before, None);

        let b = ensure_sub_unit(&conn, "t1", "  lincoln elementary ").expect("hit");
        assert!(!b.created);
        assert_eq!(a.id, b.id);
        assert_eq!(b.affiliation_before, Some(true));

        let c = ensure_sub_unit(&conn, "t2", "LINCOLN ELEMENTARY").expect("other tenant");
        assert_eq!(c.id, a.id);
        assert_eq!(c.affiliation_before, None);
    }

    #[test]
    fn sub_unit_slugs_are_unique() {
        let conn = db::open_in_memory().expect("db");
        conn.execute(
            "INSERT INTO sub_units(id, name, slug) VALUES('x', 'Other Name', 'lincoln')",
            [],
        )
        .expect("seed");
        let s = ensure_sub_unit(&conn, "t1", "Lincoln").expect("create");
        assert_eq!(s.slug, "lincoln-2");
    }

    #[test]
    fn blank_school_is_a_validation_error() {
        let conn = db::open_in_memory().expect("db");
        let e = ensure_sub_unit(&conn, "t1", "  ").expect_err("blank");
        assert!(matches!(e, ImportError::Validation(_)));
    }

    #[test]
    fn provider_identity_created_once_and_profile_last_write_wins() {
        let conn = db::open_in_memory().expect("db");
        let first = ensure_provider_identity(&conn, "t1", "Jane Doe", &attrs("Active", "LPC"), "import.local")
            .expect("create");
        assert!(first.created);
        assert!(first.tenant_link_created);

        let second =
            ensure_provider_identity(&conn, "t1", "jane doe", &attrs("Inactive", ""), "import.local")
                .expect("update");
        assert!(!second.created);
        assert!(!second.tenant_link_created);
        assert_eq!(first.provider_id, second.provider_id);

        let email: String = conn
            .query_row("SELECT email FROM providers WHERE id = ?", [&first.provider_id], |r| r.get(0))
            .expect("email");
        assert_eq!(email, "jane-doe@import.local");

        let profile = load_provider_profile(&conn, "t1", &first.provider_id)
            .expect("load")
            .expect("profile");
        assert_eq!(profile.status, "INACTIVE");
        assert!(profile.accepts_medicaid);
        assert_eq!(profile.staff_notes.as_deref(), Some("cleared in May"));
        let profiles: i64 = conn
            .query_row("SELECT COUNT(*) FROM provider_profiles", [], |r| r.get(0))
            .expect("count");
        assert_eq!(profiles, 1);
    }

    #[test]
    fn placeholder_emails_do_not_collide() {
        let conn = db::open_in_memory().expect("db");
        conn.execute(
            "INSERT INTO providers(id, email, first_name, last_name) VALUES('p0', 'jane-doe@import.local', 'Janet', 'Doe')",
            [],
        )
        .expect("seed");
        let p = ensure_provider_identity(&conn, "t1", "Jane Doe", &attrs("", ""), "import.local")
            .expect("create");
        let email: String = conn
            .query_row("SELECT email FROM providers WHERE id = ?", [&p.provider_id], |r| r.get(0))
            .expect("email");
        assert_eq!(email, "jane-doe-2@import.local");
    }

    #[test]
    fn schedule_slot_upsert_overwrites() {
        let conn = db::open_in_memory().expect("db");
        let school = ensure_sub_unit(&conn, "t1", "Lincoln").expect("school");
        let p = ensure_provider_identity(&conn, "t1", "Jane Doe", &attrs("", ""), "import.local")
            .expect("provider");
        upsert_schedule_slot(&conn, "t1", &p.provider_id, &school.id, Weekday::Monday, 3, Some("am"))
            .expect("insert");
        upsert_schedule_slot(&conn, "t1", &p.provider_id, &school.id, Weekday::Monday, 1, None)
            .expect("update");
        let slot = find_schedule_slot(&conn, "t1", &p.provider_id, &school.id, Weekday::Monday)
            .expect("find")
            .expect("slot");
        assert_eq!(slot.starting_available, 1);
        assert_eq!(slot.notes, None);
        assert!(find_schedule_slot(&conn, "t1", &p.provider_id, &school.id, Weekday::Tuesday)
            .expect("find")
            .is_none());
    }
}
