use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bookwell_auth::Capability;
use bookwell_core::UserId;
use bookwell_infra::projections::AppointmentReadModel;
use bookwell_scheduling::{AppointmentKind, AppointmentStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub provider_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub kind: AppointmentKind,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckSlotRequest {
    pub provider_id: UserId,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub to: AppointmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetGrantsRequest {
    /// Raw tags; validated as a whole.
    pub capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub capability: String,
    /// Explain for another operator (requires `manage-team`).
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub appointment_id: Option<String>,
    pub user_id: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

/// Appointment as served over HTTP, with the payment flag merged in.
#[derive(Debug, Serialize)]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: AppointmentReadModel,
    pub payment_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub appointment: AppointmentView,
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: UserId,
    pub role: &'static str,
    pub capabilities: Vec<Capability>,
}
