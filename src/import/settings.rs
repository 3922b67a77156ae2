use serde::{Deserialize, Serialize};

pub const SETTINGS_KEY: &str = "setup.import";

/// Workspace-level knobs for the import engine (`setup.import`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSettings {
    pub enforce_capacity_on_apply: bool,
    pub notifications_enabled: bool,
    pub placeholder_email_domain: String,
    pub jobs_list_limit: i64,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            enforce_capacity_on_apply: true,
            notifications_enabled: true,
            placeholder_email_domain: "import.local".to_string(),
            jobs_list_limit: 50,
        }
    }
}
