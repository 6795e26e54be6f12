//! Append-only audit trail for administrative actions.
//!
//! Every record is derived from a committed event and carries that event's
//! id, so the trail can be replayed from the event store after a restart
//! without duplicating entries.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use bookwell_auth::{Capability, ChangedBy, GrantsChanged};
use bookwell_core::UserId;
use bookwell_scheduling::{AppointmentId, AppointmentPurged, AppointmentTransitioned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AuditSubject {
    Appointment(AppointmentId),
    /// The user whose grants changed.
    Grants(UserId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub subject: AuditSubject,
    pub old_value: String,
    pub new_value: String,
    pub changed_by: ChangedBy,
    pub changed_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn grants_changed(event_id: Uuid, event: &GrantsChanged) -> Self {
        Self {
            id: event_id,
            subject: AuditSubject::Grants(event.user_id),
            old_value: join_tags(&event.previous),
            new_value: join_tags(&event.current),
            changed_by: event.changed_by,
            changed_at: event.occurred_at,
        }
    }

    pub fn appointment_transitioned(event_id: Uuid, event: &AppointmentTransitioned) -> Self {
        Self {
            id: event_id,
            subject: AuditSubject::Appointment(event.appointment_id),
            old_value: event.from.to_string(),
            new_value: event.to.to_string(),
            changed_by: ChangedBy::User(event.actor_id),
            changed_at: event.occurred_at,
        }
    }

    pub fn appointment_purged(event_id: Uuid, event: &AppointmentPurged) -> Self {
        let new_value = match &event.reason {
            Some(reason) => format!("purged: {reason}"),
            None => "purged".to_string(),
        };
        Self {
            id: event_id,
            subject: AuditSubject::Appointment(event.appointment_id),
            old_value: event.status_at_purge.to_string(),
            new_value,
            changed_by: ChangedBy::User(event.purged_by),
            changed_at: event.occurred_at,
        }
    }
}

fn join_tags(caps: &[Capability]) -> String {
    caps.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(",")
}

#[derive(Debug, Error)]
#[error("audit log unavailable: {0}")]
pub struct AuditError(pub String);

pub trait AuditLog: Send + Sync {
    /// Appending a record whose id is already present is a no-op.
    fn append(&self, record: AuditRecord) -> Result<(), AuditError>;

    /// Records ordered by `changed_at`, optionally restricted to one subject.
    fn list(&self, subject: Option<AuditSubject>) -> Result<Vec<AuditRecord>, AuditError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| AuditError("lock poisoned".to_string()))?;
        if !records.iter().any(|r| r.id == record.id) {
            records.push(record);
        }
        Ok(())
    }

    fn list(&self, subject: Option<AuditSubject>) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<_> = records
            .iter()
            .filter(|r| subject.is_none_or(|s| r.subject == s))
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.changed_at, r.id));
        Ok(matching)
    }
}

/// Write a record, logging instead of failing: the audited change is
/// already committed.
pub(crate) fn record(log: &dyn AuditLog, record: AuditRecord) {
    let subject = record.subject;
    if let Err(e) = log.append(record) {
        tracing::warn!(?subject, error = %e, "failed to write audit record");
    }
}
