//! Outbound notifications for appointment activity.
//!
//! Sinks are fed by a bus worker after events are committed. Delivery is
//! best-effort: a failing sink is logged and the remaining sinks still run.

#[cfg(feature = "redis")]
pub mod redis;

use std::io;
use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

use bookwell_events::{EventBus, EventEnvelope};
use bookwell_scheduling::{AppointmentEvent, AppointmentPurged, AppointmentRequested, AppointmentTransitioned};

use crate::projections::APPOINTMENT_AGGREGATE;
use crate::workers::{BusWorker, WorkerHandle};

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotificationError(pub String);

/// Receiver of appointment notifications (email, push, chat bridge, ...).
pub trait NotificationSink: Send + Sync {
    fn appointment_requested(&self, event: &AppointmentRequested) -> Result<(), NotificationError>;

    fn appointment_transitioned(&self, event: &AppointmentTransitioned) -> Result<(), NotificationError>;

    fn appointment_purged(&self, _event: &AppointmentPurged) -> Result<(), NotificationError> {
        Ok(())
    }
}

/// Sink that only logs; the default in development.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn appointment_requested(&self, event: &AppointmentRequested) -> Result<(), NotificationError> {
        info!(
            appointment_id = %event.appointment_id,
            provider_id = %event.provider_id,
            scheduled_at = %event.scheduled_at,
            "notify provider: new appointment request"
        );
        Ok(())
    }

    fn appointment_transitioned(&self, event: &AppointmentTransitioned) -> Result<(), NotificationError> {
        info!(
            appointment_id = %event.appointment_id,
            from = %event.from,
            to = %event.to,
            "notify participants: appointment status changed"
        );
        Ok(())
    }

    fn appointment_purged(&self, event: &AppointmentPurged) -> Result<(), NotificationError> {
        info!(appointment_id = %event.appointment_id, "notify participants: appointment removed");
        Ok(())
    }
}

/// Fans committed appointment events out to every sink.
pub struct NotificationWorker;

impl NotificationWorker {
    pub fn spawn<B>(bus: B, sinks: Vec<Arc<dyn NotificationSink>>) -> io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope<JsonValue>> + Send + Sync + 'static,
    {
        BusWorker::spawn("notifications", bus, Some(APPOINTMENT_AGGREGATE), move |envelope| {
            deliver(&sinks, &envelope)
        })
    }
}

fn deliver(sinks: &[Arc<dyn NotificationSink>], envelope: &EventEnvelope<JsonValue>) -> anyhow::Result<()> {
    let event: AppointmentEvent = serde_json::from_value(envelope.payload().clone())
        .with_context(|| format!("decoding appointment event {}", envelope.event_id()))?;

    for sink in sinks {
        let outcome = match &event {
            AppointmentEvent::Requested(e) => sink.appointment_requested(e),
            AppointmentEvent::Transitioned(e) => sink.appointment_transitioned(e),
            AppointmentEvent::Purged(e) => sink.appointment_purged(e),
        };
        if let Err(err) = outcome {
            warn!(event_id = %envelope.event_id(), error = %err, "notification sink failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use bookwell_core::UserId;
    use bookwell_scheduling::{AppointmentId, AppointmentKind};
    use chrono::Utc;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<AppointmentId>>,
    }

    impl NotificationSink for Recording {
        fn appointment_requested(&self, event: &AppointmentRequested) -> Result<(), NotificationError> {
            self.seen.lock().unwrap().push(event.appointment_id);
            Ok(())
        }

        fn appointment_transitioned(&self, _event: &AppointmentTransitioned) -> Result<(), NotificationError> {
            Ok(())
        }
    }

    struct Failing;

    impl NotificationSink for Failing {
        fn appointment_requested(&self, _event: &AppointmentRequested) -> Result<(), NotificationError> {
            Err(NotificationError("smtp down".into()))
        }

        fn appointment_transitioned(&self, _event: &AppointmentTransitioned) -> Result<(), NotificationError> {
            Err(NotificationError("smtp down".into()))
        }
    }

    #[test]
    fn a_failing_sink_does_not_starve_the_others() {
        let id = AppointmentId::generate();
        let event = AppointmentEvent::Requested(AppointmentRequested {
            appointment_id: id,
            requester_id: UserId::new(),
            provider_id: UserId::new(),
            scheduled_at: Utc::now(),
            duration_minutes: 30,
            kind: AppointmentKind::InPerson,
            notes: None,
            occurred_at: Utc::now(),
        });
        let envelope = EventEnvelope::new(Uuid::now_v7(), id.0, APPOINTMENT_AGGREGATE, 1, serde_json::to_value(event).unwrap());

        let recording = Arc::new(Recording::default());
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(Failing), recording.clone()];
        deliver(&sinks, &envelope).unwrap();

        assert_eq!(*recording.seen.lock().unwrap(), vec![id]);
    }

    #[test]
    fn undecodable_payload_is_an_error() {
        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            bookwell_core::AggregateId::new(),
            APPOINTMENT_AGGREGATE,
            1,
            serde_json::json!({"type": "nonsense"}),
        );
        assert!(deliver(&[], &envelope).is_err());
    }
}
