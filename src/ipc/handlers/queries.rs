use crate::import::clients::list_clients;
use crate::import::error::ImportError;
use crate::ipc::helpers::{get_required_str, respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};

fn clients_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let tenant_id = get_required_str(params, "tenantId")?;
    let clients = list_clients(conn, &tenant_id)?;
    Ok(json!({ "clients": clients }))
}

fn schedules_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let tenant_id = get_required_str(params, "tenantId")?;
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.provider_id, p.first_name, p.last_name, s.sub_unit_id, u.name,
                    s.weekday, s.starting_available, s.notes,
                    (SELECT COUNT(*) FROM clients c
                     WHERE c.tenant_id = s.tenant_id
                       AND c.provider_id = s.provider_id
                       AND c.sub_unit_id = s.sub_unit_id
                       AND c.weekday = s.weekday)
             FROM schedule_slots s
             JOIN providers p ON p.id = s.provider_id
             JOIN sub_units u ON u.id = s.sub_unit_id
             WHERE s.tenant_id = ?
             ORDER BY u.name, p.first_name, p.last_name,
                      CASE s.weekday WHEN 'Monday' THEN 1 WHEN 'Tuesday' THEN 2
                        WHEN 'Wednesday' THEN 3 WHEN 'Thursday' THEN 4 ELSE 5 END",
        )
        .map_err(ImportError::from)?;
    let slots = stmt
        .query_map([&tenant_id], |r| {
            let first: String = r.get(2)?;
            let last: Option<String> = r.get(3)?;
            let provider_name = match last {
                Some(l) if !l.is_empty() => format!("{} {}", first, l),
                _ => first,
            };
            let starting: i64 = r.get(7)?;
            let current: i64 = r.get(9)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "providerId": r.get::<_, String>(1)?,
                "providerName": provider_name,
                "subUnitId": r.get::<_, String>(4)?,
                "subUnitName": r.get::<_, String>(5)?,
                "weekday": r.get::<_, String>(6)?,
                "startingAvailable": starting,
                "notes": r.get::<_, Option<String>>(8)?,
                "currentAssigned": current,
                "remaining": (starting - current).max(0)
            }))
        })
        .map_err(ImportError::from)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ImportError::from)?;
    Ok(json!({ "slots": slots }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "clients.list" => Some(respond(state, req, clients_list)),
        "schedules.list" => Some(respond(state, req, schedules_list)),
        _ => None,
    }
}
