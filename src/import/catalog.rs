use super::error::Result;
use super::sheets::catalog_key_name;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CatalogCategory {
    ClientStatus,
    Insurance,
    PaperworkDelivery,
    PaperworkStatus,
    ProviderCredential,
}

impl CatalogCategory {
    pub const ALL: [CatalogCategory; 5] = [
        Self::ClientStatus,
        Self::Insurance,
        Self::PaperworkDelivery,
        Self::PaperworkStatus,
        Self::ProviderCredential,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ClientStatus => "client_status",
            Self::Insurance => "insurance",
            Self::PaperworkDelivery => "paperwork_delivery",
            Self::PaperworkStatus => "paperwork_status",
            Self::ProviderCredential => "provider_credential",
        }
    }

    fn baseline(self) -> &'static [&'static str] {
        match self {
            Self::ClientStatus => &[
                "Current",
                "Pending",
                "Terminated",
                "Inactive",
                "Waitlist",
                "Screener",
                "Packet",
            ],
            Self::Insurance => &[
                "Medicaid",
                "Tricare",
                "Commercial / Other",
                "Unknown",
                "None",
                "Self Pay",
            ],
            Self::PaperworkDelivery => &["Uploaded", "School Emailed", "Set Home", "Unknown"],
            Self::PaperworkStatus => &[
                "Completed",
                "Re-Auth",
                "New Insurance",
                "Insurance / Payment Auth",
                "Emailed Packet",
                "ROI",
                "Renewal",
                "New Docs",
                "Disclosure and Consent",
                "BALANCE",
            ],
            Self::ProviderCredential => &[
                "Bachelors",
                "Intern",
                "LPC",
                "LPCC",
                "MFT",
                "MFTC",
                "Peer Professional",
                "SWC",
                "LCSW",
                "LMFT",
                "Unknown",
            ],
        }
    }
}

/// Finds or creates the tenant's catalog entry for `label`.
///
/// Matching is case-insensitive on either the display label or the derived
/// key. An empty label resolves to `None`.
pub fn ensure_catalog_entry(
    conn: &Connection,
    tenant_id: &str,
    category: CatalogCategory,
    label: &str,
) -> Result<Option<String>> {
    let clean = label.trim();
    if clean.is_empty() {
        return Ok(None);
    }
    let key_name = catalog_key_name(clean);

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM catalog_entries
             WHERE tenant_id = ? AND category = ?
               AND (LOWER(display_name) = LOWER(?) OR LOWER(key_name) = LOWER(?))
             LIMIT 1",
            (tenant_id, category.as_str(), clean, &key_name),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(Some(id));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO catalog_entries(id, tenant_id, category, key_name, display_name, is_active)
         VALUES(?, ?, ?, ?, ?, 1)",
        (&id, tenant_id, category.as_str(), &key_name, clean),
    )?;
    Ok(Some(id))
}

/// Seeds the baseline vocabulary for every category the tenant has no
/// entries in yet. Categories with any entry are left alone.
pub fn ensure_baseline_seeds(conn: &Connection, tenant_id: &str) -> Result<()> {
    for category in CatalogCategory::ALL {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM catalog_entries WHERE tenant_id = ? AND category = ?",
            (tenant_id, category.as_str()),
            |r| r.get(0),
        )?;
        if count > 0 {
            continue;
        }
        for label in category.baseline() {
            ensure_catalog_entry(conn, tenant_id, category, label)?;
        }
    }
    Ok(())
}
