//! Fire-and-forget notifications raised by applied rows.
//!
//! Events are collected while a row's transaction runs and handed to a
//! [`Notifier`] only after it commits. They are not part of the row's unit of
//! work: a failed emission is logged and dropped, and rollback does not
//! retract notifications already sent.

use super::jobs::now_string;
use rusqlite::Connection;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportEvent {
    PaperworkReceived {
        tenant_id: String,
        client_id: String,
        identifier: String,
        school: String,
    },
    ClientBecameCurrent {
        tenant_id: String,
        client_id: String,
        identifier: String,
        provider_id: String,
        provider_name: String,
        day: String,
    },
}

impl ImportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PaperworkReceived { .. } => "paperwork_received",
            Self::ClientBecameCurrent { .. } => "client_became_current",
        }
    }
}

pub trait Notifier {
    fn emit(&self, event: &ImportEvent) -> anyhow::Result<()>;
}

/// Discards everything; used when notifications are disabled.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn emit(&self, _event: &ImportEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes events into the workspace `notifications` table.
pub struct SqliteNotifier<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteNotifier<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &self,
        kind: &str,
        severity: &str,
        title: &str,
        message: &str,
        provider_id: Option<&str>,
        tenant_id: &str,
        client_id: &str,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO notifications(id, kind, severity, title, message, provider_id, tenant_id,
                related_entity_type, related_entity_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, 'client', ?, ?)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                kind,
                severity,
                title,
                message,
                provider_id,
                tenant_id,
                client_id,
                now_string(),
            ],
        )?;
        Ok(())
    }
}

impl Notifier for SqliteNotifier<'_> {
    fn emit(&self, event: &ImportEvent) -> anyhow::Result<()> {
        match event {
            ImportEvent::PaperworkReceived {
                tenant_id,
                client_id,
                identifier,
                school,
            } => self.insert(
                event.kind(),
                "warning",
                "Paperwork Received",
                &format!("Paperwork received for client {} ({}).", identifier, school),
                None,
                tenant_id,
                client_id,
            ),
            ImportEvent::ClientBecameCurrent {
                tenant_id,
                client_id,
                identifier,
                provider_id,
                provider_name,
                day,
            } => {
                let message = format!(
                    "Client {} is now Current (assigned {} on {}).",
                    identifier, provider_name, day
                );
                // One tenant-wide copy, one addressed to the provider.
                self.insert(event.kind(), "info", "Client Became Current", &message, None, tenant_id, client_id)?;
                self.insert(
                    event.kind(),
                    "info",
                    "Client Became Current",
                    &message,
                    Some(provider_id),
                    tenant_id,
                    client_id,
                )
            }
        }
    }
}

pub fn dispatch(notifier: &dyn Notifier, events: &[ImportEvent]) {
    for event in events {
        if let Err(e) = notifier.emit(event) {
            tracing::warn!(kind = event.kind(), error = %e, "notification dropped");
        }
    }
}
