use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use bookwell_core::UserId;
use bookwell_events::EventEnvelope;
use bookwell_scheduling::{AppointmentEvent, AppointmentId, AppointmentKind, AppointmentStatus};

use crate::projections::cursor::{CursorError, CursorStep, StreamCursors};
use crate::read_model::KeyedStore;

pub const APPOINTMENT_AGGREGATE: &str = "scheduling.appointment";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppointmentReadModel {
    pub appointment_id: AppointmentId,
    pub requester_id: UserId,
    pub provider_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub kind: AppointmentKind,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Stream version this view reflects.
    pub version: u64,
}

impl AppointmentReadModel {
    pub fn involves(&self, user_id: UserId) -> bool {
        self.requester_id == user_id || self.provider_id == user_id
    }
}

#[derive(Debug, Error)]
pub enum AppointmentProjectionError {
    #[error("failed to deserialize appointment event: {0}")]
    Deserialize(String),
    #[error("event appointment_id does not match envelope aggregate_id")]
    StreamMismatch,
    #[error("transition for unknown appointment {0}")]
    MissingAppointment(AppointmentId),
    #[error(transparent)]
    Cursor(#[from] CursorError),
}

/// Query view over all appointments, fed by committed appointment events.
#[derive(Debug)]
pub struct AppointmentsProjection<S>
where
    S: KeyedStore<AppointmentId, AppointmentReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> AppointmentsProjection<S>
where
    S: KeyedStore<AppointmentId, AppointmentReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, appointment_id: &AppointmentId) -> Option<AppointmentReadModel> {
        self.store.get(appointment_id)
    }

    /// Every appointment, ordered by `scheduled_at`.
    pub fn list(&self) -> Vec<AppointmentReadModel> {
        let mut all = self.store.list();
        all.sort_by_key(|a| (a.scheduled_at, a.appointment_id));
        all
    }

    /// Appointments where `user_id` is requester or provider, ordered by `scheduled_at`.
    pub fn list_for_user(&self, user_id: UserId) -> Vec<AppointmentReadModel> {
        let mut mine: Vec<_> = self.store.list().into_iter().filter(|a| a.involves(user_id)).collect();
        mine.sort_by_key(|a| (a.scheduled_at, a.appointment_id));
        mine
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), AppointmentProjectionError> {
        if envelope.aggregate_type() != APPOINTMENT_AGGREGATE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if self.cursors.check(aggregate_id, seq)? == CursorStep::Skip {
            return Ok(());
        }

        let ev: AppointmentEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| AppointmentProjectionError::Deserialize(e.to_string()))?;

        let appointment_id = match &ev {
            AppointmentEvent::Requested(e) => e.appointment_id,
            AppointmentEvent::Transitioned(e) => e.appointment_id,
            AppointmentEvent::Purged(e) => e.appointment_id,
        };
        if appointment_id.0 != aggregate_id {
            return Err(AppointmentProjectionError::StreamMismatch);
        }

        match ev {
            AppointmentEvent::Requested(e) => {
                self.store.upsert(
                    e.appointment_id,
                    AppointmentReadModel {
                        appointment_id: e.appointment_id,
                        requester_id: e.requester_id,
                        provider_id: e.provider_id,
                        scheduled_at: e.scheduled_at,
                        duration_minutes: e.duration_minutes,
                        kind: e.kind,
                        status: AppointmentStatus::Pending,
                        notes: e.notes,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                        version: seq,
                    },
                );
            }
            AppointmentEvent::Transitioned(e) => {
                let mut rm = self
                    .store
                    .get(&e.appointment_id)
                    .ok_or(AppointmentProjectionError::MissingAppointment(e.appointment_id))?;
                rm.status = e.to;
                rm.updated_at = e.occurred_at;
                rm.version = seq;
                self.store.upsert(e.appointment_id, rm);
            }
            AppointmentEvent::Purged(e) => {
                self.store.remove(&e.appointment_id);
            }
        }

        self.cursors.advance(aggregate_id, seq);
        Ok(())
    }

    /// Drop everything and replay `envelopes` (stream order within each aggregate).
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), AppointmentProjectionError> {
        self.store.clear();
        self.cursors.clear();

        for env in envelopes {
            self.apply_envelope(&env)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookwell_scheduling::{AppointmentPurged, AppointmentRequested, AppointmentTransitioned, TransitionActor};
    use chrono::TimeZone;
    use uuid::Uuid;

    use crate::read_model::InMemoryKeyedStore;

    type Projection = AppointmentsProjection<InMemoryKeyedStore<AppointmentId, AppointmentReadModel>>;

    fn envelope(id: AppointmentId, seq: u64, ev: AppointmentEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            id.0,
            APPOINTMENT_AGGREGATE,
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    fn requested(id: AppointmentId, requester: UserId, provider: UserId, hour: u32) -> AppointmentEvent {
        AppointmentEvent::Requested(AppointmentRequested {
            appointment_id: id,
            requester_id: requester,
            provider_id: provider,
            scheduled_at: Utc.with_ymd_and_hms(2030, 5, 6, hour, 0, 0).unwrap(),
            duration_minutes: 60,
            kind: AppointmentKind::Remote,
            notes: None,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn redelivered_events_are_ignored() {
        let projection = Projection::new(InMemoryKeyedStore::new());
        let id = AppointmentId::generate();
        let (requester, provider) = (UserId::new(), UserId::new());

        let first = envelope(id, 1, requested(id, requester, provider, 10));
        projection.apply_envelope(&first).unwrap();

        let confirm = envelope(
            id,
            2,
            AppointmentEvent::Transitioned(AppointmentTransitioned {
                appointment_id: id,
                from: AppointmentStatus::Pending,
                to: AppointmentStatus::Confirmed,
                actor_role: TransitionActor::Provider,
                actor_id: provider,
                occurred_at: Utc::now(),
            }),
        );
        projection.apply_envelope(&confirm).unwrap();
        projection.apply_envelope(&first).unwrap();

        let rm = projection.get(&id).unwrap();
        assert_eq!(rm.status, AppointmentStatus::Confirmed);
        assert_eq!(rm.version, 2);
    }

    #[test]
    fn list_for_user_is_ordered_and_scoped() {
        let projection = Projection::new(InMemoryKeyedStore::new());
        let (requester, provider, stranger) = (UserId::new(), UserId::new(), UserId::new());
        let (late, early) = (AppointmentId::generate(), AppointmentId::generate());

        projection.apply_envelope(&envelope(late, 1, requested(late, requester, provider, 15))).unwrap();
        projection.apply_envelope(&envelope(early, 1, requested(early, requester, provider, 9))).unwrap();

        let ids: Vec<_> = projection.list_for_user(provider).iter().map(|a| a.appointment_id).collect();
        assert_eq!(ids, vec![early, late]);
        assert!(projection.list_for_user(stranger).is_empty());
    }

    #[test]
    fn purge_removes_the_view() {
        let projection = Projection::new(InMemoryKeyedStore::new());
        let id = AppointmentId::generate();
        let operator = UserId::new();
        projection.apply_envelope(&envelope(id, 1, requested(id, UserId::new(), UserId::new(), 10))).unwrap();

        projection
            .apply_envelope(&envelope(
                id,
                2,
                AppointmentEvent::Purged(AppointmentPurged {
                    appointment_id: id,
                    status_at_purge: AppointmentStatus::Pending,
                    purged_by: operator,
                    reason: None,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();
        assert!(projection.get(&id).is_none());
    }

    #[test]
    fn sequence_gap_is_an_error() {
        let projection = Projection::new(InMemoryKeyedStore::new());
        let id = AppointmentId::generate();
        projection.apply_envelope(&envelope(id, 1, requested(id, UserId::new(), UserId::new(), 10))).unwrap();

        let err = projection
            .apply_envelope(&envelope(id, 3, requested(id, UserId::new(), UserId::new(), 11)))
            .unwrap_err();
        assert!(matches!(err, AppointmentProjectionError::Cursor(_)));
    }
}
