//! Redis pub/sub notification sink (feature `redis`).
//!
//! Publishes one JSON message per notification on a single channel. Pub/sub
//! is not durable: offline consumers miss messages.

use redis::Commands;
use serde::Serialize;

use bookwell_scheduling::{AppointmentPurged, AppointmentRequested, AppointmentTransitioned};

use super::{NotificationError, NotificationSink};

#[derive(Debug, Clone)]
pub struct RedisNotificationSink {
    client: redis::Client,
    channel: String,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Notification<'a> {
    Requested(&'a AppointmentRequested),
    Transitioned(&'a AppointmentTransitioned),
    Purged(&'a AppointmentPurged),
}

impl RedisNotificationSink {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, NotificationError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| NotificationError(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }

    fn publish(&self, notification: Notification<'_>) -> Result<(), NotificationError> {
        let payload = serde_json::to_string(&notification).map_err(|e| NotificationError(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| NotificationError(e.to_string()))?;

        let _: i64 = conn
            .publish(&self.channel, payload)
            .map_err(|e| NotificationError(e.to_string()))?;
        Ok(())
    }
}

impl NotificationSink for RedisNotificationSink {
    fn appointment_requested(&self, event: &AppointmentRequested) -> Result<(), NotificationError> {
        self.publish(Notification::Requested(event))
    }

    fn appointment_transitioned(&self, event: &AppointmentTransitioned) -> Result<(), NotificationError> {
        self.publish(Notification::Transitioned(event))
    }

    fn appointment_purged(&self, event: &AppointmentPurged) -> Result<(), NotificationError> {
        self.publish(Notification::Purged(event))
    }
}
