//! Sheet shapes and the normalisation rules shared by preview and apply.
//!
//! Rows arrive as header -> value maps. They are checked for shape once
//! (`validate_shape`) and then read through the typed `*SheetRow` records,
//! which look fields up case/whitespace-insensitively.

use super::error::{ImportError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub type RawRow = BTreeMap<String, String>;

pub const CLIENTS_HEADERS: &[&str] = &[
    "Client Name",
    "Status",
    "Referral Date",
    "Skills",
    "Insurance",
    "School",
    "Provider",
    "Day",
    "Paperwork Delivery",
    "Doc Date",
    "Paperwork Status",
    "Notes",
    "Grade",
    "Gender",
    "Identifier Code",
    "District",
    "Primary Client Language",
    "Primary Parent Language",
];

pub const PROVIDERS_HEADERS: &[&str] = &[
    "Status",
    "Clinician Name",
    "Credential",
    "Display Name",
    "Accepts Medicaid",
    "Accepts Commercial",
    "Accepts Tricare",
    "Background Check Date",
    "Bckgrnd Status",
    "Cleared to Start",
    "Bckgrnd Notes",
    "High Behavioral Needs",
    "Suicidal",
    "Substance Use",
    "Trauma",
    "Skills",
    "Clinician Notes",
];

pub const ROSTER_HEADERS: &[&str] = &[
    "School",
    "Provider Name",
    "Day",
    "Openings",
    "Starting Available",
    "Current",
    "Notes",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sheet {
    Clients,
    Providers,
    Roster,
}

impl Sheet {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::Providers => "providers",
            Self::Roster => "roster",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clients" => Some(Self::Clients),
            "providers" => Some(Self::Providers),
            "roster" => Some(Self::Roster),
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Clients => "Clients",
            Self::Providers => "Providers",
            Self::Roster => "Roster",
        }
    }

    pub fn expected_headers(self) -> &'static [&'static str] {
        match self {
            Self::Clients => CLIENTS_HEADERS,
            Self::Providers => PROVIDERS_HEADERS,
            Self::Roster => ROSTER_HEADERS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl Weekday {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mon" | "monday" => Some(Self::Monday),
            "tue" | "tues" | "tuesday" => Some(Self::Tuesday),
            "wed" | "weds" | "wednesday" => Some(Self::Wednesday),
            "thu" | "thur" | "thurs" | "thursday" => Some(Self::Thursday),
            "fri" | "friday" => Some(Self::Friday),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
        }
    }
}

pub fn normalize_header(h: &str) -> String {
    h.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Returns the missing-headers message for one sheet, if any.
///
/// An empty sheet has no header row to check and always passes.
fn missing_headers_message(sheet: Sheet, rows: &[RawRow]) -> Option<String> {
    let first = rows.first()?;
    let actual = first
        .keys()
        .map(|h| normalize_header(h))
        .collect::<std::collections::HashSet<_>>();
    let missing = sheet
        .expected_headers()
        .iter()
        .filter(|h| !actual.contains(&normalize_header(h)))
        .copied()
        .collect::<Vec<_>>();
    if missing.is_empty() {
        None
    } else {
        Some(format!(
            "{} sheet missing required headers: {}",
            sheet.label(),
            missing.join(", ")
        ))
    }
}

pub fn validate_shape(clients: &[RawRow], providers: &[RawRow], roster: &[RawRow]) -> Result<()> {
    let problems = [
        missing_headers_message(Sheet::Clients, clients),
        missing_headers_message(Sheet::Providers, providers),
        missing_headers_message(Sheet::Roster, roster),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ImportError::Shape(problems))
    }
}

/// Header-insensitive view over a raw row.
struct Fields(HashMap<String, String>);

impl Fields {
    fn new(raw: &RawRow) -> Self {
        Self(
            raw.iter()
                .map(|(k, v)| (normalize_header(k), v.trim().to_string()))
                .collect(),
        )
    }

    fn get(&self, header: &str) -> String {
        self.0
            .get(&normalize_header(header))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientSheetRow {
    pub client_name: String,
    pub status: String,
    pub referral_date: String,
    pub skills: String,
    pub insurance: String,
    pub school: String,
    pub provider: String,
    pub day: String,
    pub paperwork_delivery: String,
    pub doc_date: String,
    pub paperwork_status: String,
    pub notes: String,
    pub grade: String,
    pub gender: String,
    pub identifier_code: String,
    pub district: String,
    pub primary_client_language: String,
    pub primary_parent_language: String,
}

impl ClientSheetRow {
    pub fn from_raw(raw: &RawRow) -> Self {
        let f = Fields::new(raw);
        Self {
            client_name: f.get("Client Name"),
            status: f.get("Status"),
            referral_date: f.get("Referral Date"),
            skills: f.get("Skills"),
            insurance: f.get("Insurance"),
            school: f.get("School"),
            provider: f.get("Provider"),
            day: f.get("Day"),
            paperwork_delivery: f.get("Paperwork Delivery"),
            doc_date: f.get("Doc Date"),
            paperwork_status: f.get("Paperwork Status"),
            notes: f.get("Notes"),
            grade: f.get("Grade"),
            gender: f.get("Gender"),
            identifier_code: f.get("Identifier Code"),
            district: f.get("District"),
            primary_client_language: f.get("Primary Client Language"),
            primary_parent_language: f.get("Primary Parent Language"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSheetRow {
    pub status: String,
    pub clinician_name: String,
    pub credential: String,
    pub display_name: String,
    pub accepts_medicaid: String,
    pub accepts_commercial: String,
    pub accepts_tricare: String,
    pub background_check_date: String,
    pub background_status: String,
    pub cleared_to_start: String,
    pub background_notes: String,
    pub high_behavioral_needs: String,
    pub suicidal: String,
    pub substance_use: String,
    pub trauma: String,
    pub skills: String,
    pub clinician_notes: String,
}

impl ProviderSheetRow {
    pub fn from_raw(raw: &RawRow) -> Self {
        let f = Fields::new(raw);
        Self {
            status: f.get("Status"),
            clinician_name: f.get("Clinician Name"),
            credential: f.get("Credential"),
            display_name: f.get("Display Name"),
            accepts_medicaid: f.get("Accepts Medicaid"),
            accepts_commercial: f.get("Accepts Commercial"),
            accepts_tricare: f.get("Accepts Tricare"),
            background_check_date: f.get("Background Check Date"),
            background_status: f.get("Bckgrnd Status"),
            cleared_to_start: f.get("Cleared to Start"),
            background_notes: f.get("Bckgrnd Notes"),
            high_behavioral_needs: f.get("High Behavioral Needs"),
            suicidal: f.get("Suicidal"),
            substance_use: f.get("Substance Use"),
            trauma: f.get("Trauma"),
            skills: f.get("Skills"),
            clinician_notes: f.get("Clinician Notes"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RosterSheetRow {
    pub school: String,
    pub provider_name: String,
    pub day: String,
    pub openings: String,
    pub starting_available: String,
    pub current: String,
    pub notes: String,
}

impl RosterSheetRow {
    pub fn from_raw(raw: &RawRow) -> Self {
        let f = Fields::new(raw);
        Self {
            school: f.get("School"),
            provider_name: f.get("Provider Name"),
            day: f.get("Day"),
            openings: f.get("Openings"),
            starting_available: f.get("Starting Available"),
            current: f.get("Current"),
            notes: f.get("Notes"),
        }
    }

    /// Cross-sheet key: normalised school, provider and weekday.
    pub fn schedule_key(&self) -> Option<String> {
        let day = Weekday::parse(&self.day)?;
        Some(schedule_key(&self.school, &self.provider_name, day))
    }

    /// Leading integer of the cell, so `"2.0"` and `"3 seats"` count; negatives clamp to 0.
    pub fn starting_available(&self) -> i64 {
        leading_int(&self.starting_available).map(|n| n.max(0)).unwrap_or(0)
    }
}

fn leading_int(s: &str) -> Option<i64> {
    let t = s.trim();
    let (negative, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let n = digits[..end].parse::<i64>().ok()?;
    Some(if negative { -n } else { n })
}

pub fn schedule_key(school: &str, provider: &str, day: Weekday) -> String {
    format!(
        "{}|{}|{}",
        normalize_key(school),
        normalize_key(provider),
        day.as_str()
    )
}

/// Reference-matching key: lowercase, single spaces, punctuation stripped.
pub fn normalize_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '/' | '.' | '-')
        })
        .collect()
}

pub fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

pub fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "checked" | "x"
    )
}

/// Parses the date spellings found in uploaded sheets into `YYYY-MM-DD`.
pub fn parse_date(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(t) {
        return Some(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    ["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(t, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
}

pub fn split_name(full: &str) -> (Option<String>, Option<String>) {
    let parts = full.split_whitespace().collect::<Vec<_>>();
    match parts.as_slice() {
        [] => (None, None),
        [first] => (Some(first.to_string()), None),
        [first, rest @ ..] => (Some(first.to_string()), Some(rest.join(" "))),
    }
}

/// Six-character de-identified handle built from the client's name.
pub fn identifier_base(client_name: &str) -> String {
    let parts = client_name.split_whitespace().collect::<Vec<_>>();
    let letters = |s: &str| s.chars().filter(|c| c.is_ascii_alphabetic()).collect::<String>();
    let first = parts.first().copied().map(letters).unwrap_or_default();
    let last = if parts.len() > 1 {
        parts.last().copied().map(letters).unwrap_or_default()
    } else {
        String::new()
    };
    let chunk = |s: &str, fallback: &str| {
        let mut c = s.chars().take(3).collect::<String>();
        if c.is_empty() {
            c = fallback.to_string();
        }
        while c.chars().count() < 3 {
            c.push('x');
        }
        let mut chars = c.chars();
        match chars.next() {
            Some(h) => h.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
            None => String::new(),
        }
    };
    format!("{}{}", chunk(&first, "Cli"), chunk(&last, "Ent"))
}

pub fn slugify(value: &str) -> String {
    let lowered = value.trim().to_lowercase().replace('&', "and");
    let mut out = String::new();
    let mut pending_dash = false;
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out.chars().take(64).collect::<String>().trim_end_matches('-').to_string()
}

pub fn catalog_key_name(label: &str) -> String {
    let key = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(64)
        .collect::<String>();
    if key.is_empty() {
        "Unknown".to_string()
    } else {
        key
    }
}
