use crate::db;
use crate::import::settings::{ImportSettings, SETTINGS_KEY};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Import,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Import => SETTINGS_KEY,
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Import => json!({
            "enforceCapacityOnApply": true,
            "notificationsEnabled": true,
            "placeholderEmailDomain": "import.local",
            "jobsListLimit": 50
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_domain(v: &Value, key: &str) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string", key))?
        .trim()
        .to_ascii_lowercase();
    let valid = !s.is_empty()
        && s.len() <= 120
        && s.contains('.')
        && !s.starts_with('.')
        && !s.ends_with('.')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if !valid {
        return Err(format!("{} must be a domain name like import.local", key));
    }
    Ok(s)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Import => match k.as_str() {
                "enforceCapacityOnApply" | "notificationsEnabled" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "placeholderEmailDomain" => {
                    obj.insert(k.clone(), Value::String(parse_domain(v, k)?));
                }
                "jobsListLimit" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 500)?));
                }
                _ => return Err(format!("unknown import field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults rather than block setup.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.key(), error = %e, "ignoring saved setup values");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

/// Typed view of `setup.import` for the engine.
pub fn load_import_settings(conn: &rusqlite::Connection) -> anyhow::Result<ImportSettings> {
    let value = load_section(conn, SetupSection::Import)?;
    Ok(serde_json::from_value(value)?)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let import = match load_section(conn, SetupSection::Import) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match req.params.get("section").and_then(|v| v.as_str()) {
        None => ok(&req.id, json!({ "import": import })),
        Some(raw) => match SetupSection::parse(raw) {
            Some(SetupSection::Import) => ok(&req.id, import),
            None => err(&req.id, "bad_params", "unknown section", None),
        },
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    ok(&req.id, current)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_defaults() {
        let conn = db::open_in_memory().expect("db");
        assert_eq!(load_import_settings(&conn).expect("load"), ImportSettings::default());
    }

    #[test]
    fn patch_is_typed_and_range_checked() {
        let mut current = default_section(SetupSection::Import);
        let patch = json!({ "jobsListLimit": 10, "placeholderEmailDomain": " Example.ORG " });
        merge_section_patch(SetupSection::Import, &mut current, patch.as_object().expect("obj"))
            .expect("merge");
        assert_eq!(current["jobsListLimit"], 10);
        assert_eq!(current["placeholderEmailDomain"], "example.org");

        for bad in [
            json!({ "jobsListLimit": 0 }),
            json!({ "notificationsEnabled": "yes" }),
            json!({ "placeholderEmailDomain": "no spaces.com" }),
            json!({ "colour": "red" }),
        ] {
            let mut c = default_section(SetupSection::Import);
            assert!(merge_section_patch(SetupSection::Import, &mut c, bad.as_object().expect("obj")).is_err());
        }
    }

    #[test]
    fn malformed_saved_values_fall_back_to_defaults() {
        let conn = db::open_in_memory().expect("db");
        db::settings_set_json(&conn, SETTINGS_KEY, &json!({ "jobsListLimit": "many" })).expect("seed");
        assert_eq!(load_import_settings(&conn).expect("load"), ImportSettings::default());
    }
}
