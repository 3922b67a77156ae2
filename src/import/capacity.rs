use super::error::{ImportError, Result};
use super::sheets::Weekday;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capacity {
    pub starting_available: i64,
    pub current_assigned: i64,
}

impl Capacity {
    pub fn has_opening(&self) -> bool {
        self.current_assigned < self.starting_available
    }
}

/// Reads the slot ceiling and the tenant's live assignment count for a key.
///
/// `None` means no slot exists. `exclude_client` leaves one client out of the
/// count, so re-importing a client already holding the seat does not count
/// against itself.
pub fn check_capacity(
    conn: &Connection,
    tenant_id: &str,
    provider_id: &str,
    sub_unit_id: &str,
    weekday: Weekday,
    exclude_client: Option<&str>,
) -> Result<Option<Capacity>> {
    let starting: Option<i64> = conn
        .query_row(
            "SELECT starting_available FROM schedule_slots
             WHERE tenant_id = ? AND provider_id = ? AND sub_unit_id = ? AND weekday = ?",
            (tenant_id, provider_id, sub_unit_id, weekday.as_str()),
            |r| r.get(0),
        )
        .optional()?;
    let Some(starting_available) = starting else {
        return Ok(None);
    };
    let current_assigned: i64 = conn.query_row(
        "SELECT COUNT(*) FROM clients
         WHERE tenant_id = ?1 AND provider_id = ?2 AND sub_unit_id = ?3 AND weekday = ?4
           AND (?5 IS NULL OR id <> ?5)",
        (tenant_id, provider_id, sub_unit_id, weekday.as_str(), exclude_client),
        |r| r.get(0),
    )?;
    Ok(Some(Capacity {
        starting_available,
        current_assigned,
    }))
}

/// Names used in admission messages.
pub struct AdmissionLabels<'a> {
    pub provider: &'a str,
    pub school: &'a str,
}

/// Fails with `Admission` when the slot is missing or already full.
#[allow(clippy::too_many_arguments)]
pub fn admit(
    conn: &Connection,
    tenant_id: &str,
    provider_id: &str,
    sub_unit_id: &str,
    weekday: Weekday,
    exclude_client: Option<&str>,
    labels: &AdmissionLabels<'_>,
) -> Result<Capacity> {
    let cap = check_capacity(conn, tenant_id, provider_id, sub_unit_id, weekday, exclude_client)?
        .ok_or_else(|| {
            ImportError::Admission(format!(
                "Provider is not scheduled for {} on {}",
                labels.school,
                weekday.as_str()
            ))
        })?;
    if !cap.has_opening() {
        return Err(ImportError::Admission(format!(
            "No capacity for {} at {} on {} (starting {}, current {})",
            labels.provider,
            labels.school,
            weekday.as_str(),
            cap.starting_available,
            cap.current_assigned
        )));
    }
    Ok(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seed(conn: &Connection, starting: i64) {
        conn.execute_batch(&format!(
            "INSERT INTO sub_units(id, name, slug) VALUES('s1', 'Lincoln', 'lincoln');
             INSERT INTO providers(id, email, first_name, last_name) VALUES('p1', 'p1@x', 'Jane', 'Doe');
             INSERT INTO schedule_slots(id, tenant_id, provider_id, sub_unit_id, weekday, starting_available)
                VALUES('slot1', 't1', 'p1', 's1', 'Monday', {starting});"
        ))
        .expect("seed");
    }

    fn assign(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO clients(id, tenant_id, sub_unit_id, provider_id, identifier_name, weekday)
             VALUES(?, 't1', 's1', 'p1', ?, 'Monday')",
            (id, id),
        )
        .expect("assign");
    }

    const LABELS: AdmissionLabels<'static> = AdmissionLabels {
        provider: "Jane Doe",
        school: "Lincoln",
    };

    #[test]
    fn missing_slot_is_rejected() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn, 1);
        let e = admit(&conn, "t1", "p1", "s1", Weekday::Tuesday, None, &LABELS).expect_err("no slot");
        assert_eq!(e.to_string(), "Provider is not scheduled for Lincoln on Tuesday");
        assert_eq!(e.code(), "admission_error");
    }

    #[test]
    fn full_slot_is_rejected_with_counts() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn, 1);
        admit(&conn, "t1", "p1", "s1", Weekday::Monday, None, &LABELS).expect("first seat");
        assign(&conn, "c1");
        let e = admit(&conn, "t1", "p1", "s1", Weekday::Monday, None, &LABELS).expect_err("full");
        assert_eq!(
            e.to_string(),
            "No capacity for Jane Doe at Lincoln on Monday (starting 1, current 1)"
        );
    }

    #[test]
    fn excluded_client_does_not_count_against_itself() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn, 1);
        assign(&conn, "c1");
        let cap = admit(&conn, "t1", "p1", "s1", Weekday::Monday, Some("c1"), &LABELS).expect("re-seat");
        assert_eq!(cap.current_assigned, 0);
    }

    #[test]
    fn other_tenants_clients_do_not_take_seats() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn, 1);
        conn.execute(
            "INSERT INTO clients(id, tenant_id, sub_unit_id, provider_id, identifier_name, weekday)
             VALUES('c9', 't2', 's1', 'p1', 'c9', 'Monday')",
            [],
        )
        .expect("other tenant");
        let cap = admit(&conn, "t1", "p1", "s1", Weekday::Monday, None, &LABELS).expect("seat");
        assert_eq!(cap.current_assigned, 0);
    }

    #[test]
    fn zero_capacity_slot_admits_nobody() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn, 0);
        let cap = check_capacity(&conn, "t1", "p1", "s1", Weekday::Monday, None)
            .expect("check")
            .expect("slot");
        assert!(!cap.has_opening());
    }
}
