use std::{convert::Infallible, sync::Arc, time::Duration};

use anyhow::Context;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

use bookwell_core::UserId;
use bookwell_events::{EventEnvelope, InMemoryEventBus};
use bookwell_infra::{
    AppointmentService, AuditLog, CommandDispatcher, GrantService, InMemoryAuditLog, InMemoryPaymentStatus,
    NotificationError, NotificationSink, NotificationWorker, PaymentStatusSource, TracingNotificationSink,
    WorkerHandle,
    event_store::{EventStore, InMemoryEventStore},
    projections::AppointmentReadModel,
};
use bookwell_scheduling::{AppointmentPurged, AppointmentRequested, AppointmentTransitioned};

#[cfg(feature = "postgres")]
use bookwell_infra::event_store::PostgresEventStore;
#[cfg(feature = "redis")]
use bookwell_infra::notifications::redis::RedisNotificationSink;

use crate::app::dto::AppointmentView;
use crate::config::Settings;

pub type Store = Arc<dyn EventStore>;
pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Appointments = AppointmentService<Store, Bus>;
pub type Grants = GrantService<Store, Bus>;

/// Realtime message broadcasted via SSE to the listed users.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeMessage {
    pub audience: Vec<UserId>,
    pub topic: String,
    pub payload: JsonValue,
}

/// Notification sink feeding the per-user SSE stream.
pub struct RealtimeNotificationSink {
    appointments: Arc<Appointments>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

impl RealtimeNotificationSink {
    pub fn new(appointments: Arc<Appointments>, realtime_tx: broadcast::Sender<RealtimeMessage>) -> Self {
        Self {
            appointments,
            realtime_tx,
        }
    }

    fn broadcast(&self, audience: Vec<UserId>, topic: &str, payload: JsonValue) {
        // Lossy: no subscribers is not an error.
        let _ = self.realtime_tx.send(RealtimeMessage {
            audience,
            topic: topic.to_string(),
            payload,
        });
    }
}

impl NotificationSink for RealtimeNotificationSink {
    fn appointment_requested(&self, event: &AppointmentRequested) -> Result<(), NotificationError> {
        self.broadcast(
            vec![event.requester_id, event.provider_id],
            "appointment.requested",
            json!({
                "appointment_id": event.appointment_id,
                "scheduled_at": event.scheduled_at,
                "duration_minutes": event.duration_minutes,
            }),
        );
        Ok(())
    }

    fn appointment_transitioned(&self, event: &AppointmentTransitioned) -> Result<(), NotificationError> {
        // Purged since; nobody left to tell.
        let Some((requester_id, provider_id)) = self.appointments.participants(event.appointment_id) else {
            return Ok(());
        };
        self.broadcast(
            vec![requester_id, provider_id],
            "appointment.transitioned",
            json!({
                "appointment_id": event.appointment_id,
                "from": event.from,
                "to": event.to,
            }),
        );
        Ok(())
    }

    fn appointment_purged(&self, _event: &AppointmentPurged) -> Result<(), NotificationError> {
        Ok(())
    }
}

pub struct AppServices {
    pub appointments: Arc<Appointments>,
    pub grants: Arc<Grants>,
    pub audit: Arc<dyn AuditLog>,
    pub payments: Arc<dyn PaymentStatusSource>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
    _notifications: WorkerHandle,
}

impl AppServices {
    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    pub fn view(&self, appointment: AppointmentReadModel) -> AppointmentView {
        AppointmentView {
            payment_status: self.payments.payment_status(appointment.appointment_id),
            appointment,
        }
    }
}

pub async fn build_services(settings: &Settings) -> anyhow::Result<AppServices> {
    let store = open_store(settings).await?;
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let dispatcher = Arc::new(CommandDispatcher::new(store, bus.clone()));
    let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());

    let appointments = Arc::new(AppointmentService::new(dispatcher.clone(), audit.clone()));
    let grants = Arc::new(GrantService::new(dispatcher, audit.clone(), settings.permission_cache_ttl));

    // Read models are disposable: replay the store before serving.
    let appointment_events = appointments.rebuild().context("replaying appointment streams")?;
    let grant_events = grants.rebuild().context("replaying operator access streams")?;
    tracing::info!(appointment_events, grant_events, "read models rebuilt");

    if let Some(operator_id) = settings.bootstrap_operator_id {
        grants
            .bootstrap(operator_id)
            .context("seeding bootstrap operator")?;
    }

    // Realtime channel (SSE): lossy broadcast, user-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    #[allow(unused_mut)]
    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![
        Arc::new(TracingNotificationSink),
        Arc::new(RealtimeNotificationSink::new(appointments.clone(), realtime_tx.clone())),
    ];
    #[cfg(feature = "redis")]
    if let Some(redis_url) = &settings.redis_url {
        sinks.push(Arc::new(RedisNotificationSink::new(redis_url, settings.notify_channel.clone())?));
    }

    let notifications = NotificationWorker::spawn(bus, sinks).context("failed to start notification worker")?;

    Ok(AppServices {
        appointments,
        grants,
        audit,
        payments: Arc::new(InMemoryPaymentStatus::new()),
        realtime_tx,
        _notifications: notifications,
    })
}

async fn open_store(settings: &Settings) -> anyhow::Result<Store> {
    if settings.use_persistent_stores {
        #[cfg(feature = "postgres")]
        {
            let database_url = settings
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")?;
            let store = PostgresEventStore::connect(database_url).await?;
            store.ensure_schema().await?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "postgres"))]
        {
            tracing::warn!("USE_PERSISTENT_STORES=true but postgres feature not enabled, falling back to in-memory");
        }
    }

    Ok(Arc::new(InMemoryEventStore::new()))
}

pub fn user_sse_stream(
    services: &AppServices,
    user_id: UserId,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>> + use<>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(m) if m.audience.contains(&user_id) => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        _ => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
