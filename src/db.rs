use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "bulkimport.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS catalog_entries(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            category TEXT NOT NULL,
            key_name TEXT NOT NULL,
            display_name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            UNIQUE(tenant_id, category, key_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_catalog_entries_tenant ON catalog_entries(tenant_id, category)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sub_units(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL DEFAULT 'school',
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tenant_affiliations(
            tenant_id TEXT NOT NULL,
            sub_unit_id TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY(tenant_id, sub_unit_id),
            FOREIGN KEY(sub_unit_id) REFERENCES sub_units(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS providers(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT,
            role TEXT NOT NULL DEFAULT 'clinician',
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS provider_tenants(
            provider_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            PRIMARY KEY(provider_id, tenant_id),
            FOREIGN KEY(provider_id) REFERENCES providers(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS provider_profiles(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            status TEXT NOT NULL,
            credential_id TEXT,
            display_name TEXT,
            accepts_medicaid INTEGER NOT NULL DEFAULT 0,
            accepts_commercial INTEGER NOT NULL DEFAULT 0,
            accepts_tricare INTEGER NOT NULL DEFAULT 0,
            background_check_date TEXT,
            background_status TEXT,
            cleared_to_start INTEGER NOT NULL DEFAULT 0,
            risk_high_behavior INTEGER NOT NULL DEFAULT 0,
            risk_suicidal INTEGER NOT NULL DEFAULT 0,
            risk_substance_use INTEGER NOT NULL DEFAULT 0,
            risk_trauma INTEGER NOT NULL DEFAULT 0,
            risk_skills INTEGER NOT NULL DEFAULT 0,
            staff_notes TEXT,
            UNIQUE(tenant_id, provider_id),
            FOREIGN KEY(provider_id) REFERENCES providers(id),
            FOREIGN KEY(credential_id) REFERENCES catalog_entries(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_slots(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            sub_unit_id TEXT NOT NULL,
            weekday TEXT NOT NULL,
            starting_available INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            UNIQUE(tenant_id, provider_id, sub_unit_id, weekday),
            FOREIGN KEY(provider_id) REFERENCES providers(id),
            FOREIGN KEY(sub_unit_id) REFERENCES sub_units(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS clients(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            sub_unit_id TEXT NOT NULL,
            provider_id TEXT,
            identifier_name TEXT NOT NULL,
            identifier_code TEXT,
            name_key TEXT,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            source TEXT NOT NULL DEFAULT 'BULK_IMPORT',
            created_by TEXT,
            referral_date TEXT,
            submission_date TEXT,
            skills INTEGER NOT NULL DEFAULT 0,
            insurance_id TEXT,
            client_status_id TEXT,
            paperwork_delivery_id TEXT,
            doc_date TEXT,
            paperwork_status_id TEXT,
            weekday TEXT,
            grade TEXT,
            gender TEXT,
            primary_client_language TEXT,
            primary_parent_language TEXT,
            internal_notes TEXT,
            FOREIGN KEY(sub_unit_id) REFERENCES sub_units(id),
            FOREIGN KEY(provider_id) REFERENCES providers(id)
        )",
        [],
    )?;
    // Workspaces created before districts were imported lack the column.
    ensure_clients_district(conn)?;
    ensure_clients_name_key(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_clients_tenant_sub_unit ON clients(tenant_id, sub_unit_id, name_key)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_clients_assignment ON clients(provider_id, sub_unit_id, weekday)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            severity TEXT NOT NULL,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            provider_id TEXT,
            tenant_id TEXT NOT NULL,
            related_entity_type TEXT,
            related_entity_id TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_jobs(
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            uploaded_by TEXT,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            total_clients_rows INTEGER NOT NULL,
            total_providers_rows INTEGER NOT NULL,
            total_roster_rows INTEGER NOT NULL,
            input_digest TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_import_jobs_tenant ON import_jobs(tenant_id, created_at)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_job_rows(
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            sheet TEXT NOT NULL,
            row_number INTEGER NOT NULL,
            identifier TEXT,
            status TEXT NOT NULL,
            action TEXT NOT NULL,
            message TEXT,
            payload_json TEXT NOT NULL,
            created_entity_id TEXT,
            created_entity_type TEXT,
            undo_json TEXT,
            applied_at TEXT,
            FOREIGN KEY(job_id) REFERENCES import_jobs(id)
        )",
        [],
    )?;
    ensure_job_rows_applied_seq(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_import_job_rows_job ON import_job_rows(job_id, sheet, row_number)",
        [],
    )?;

    Ok(())
}

fn ensure_clients_district(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "clients", "district")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE clients ADD COLUMN district TEXT", [])?;
    Ok(())
}

fn ensure_clients_name_key(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "clients", "name_key")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE clients ADD COLUMN name_key TEXT", [])?;
    Ok(())
}

fn ensure_job_rows_applied_seq(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "import_job_rows", "applied_seq")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE import_job_rows ADD COLUMN applied_seq INTEGER",
        [],
    )?;
    // Older rows only carried a timestamp; derive a sequence from it.
    conn.execute(
        "UPDATE import_job_rows
         SET applied_seq = (
            SELECT COUNT(*) FROM import_job_rows r2
            WHERE r2.job_id = import_job_rows.job_id
              AND r2.applied_at IS NOT NULL
              AND (r2.applied_at < import_job_rows.applied_at
                   OR (r2.applied_at = import_job_rows.applied_at AND r2.rowid <= import_job_rows.rowid))
         )
         WHERE applied_at IS NOT NULL",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
