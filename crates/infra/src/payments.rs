//! Payment status lookup.
//!
//! Payment execution happens elsewhere; the scheduling core only carries an
//! opaque status string per appointment for display.

use std::collections::HashMap;
use std::sync::RwLock;

use bookwell_scheduling::AppointmentId;

pub trait PaymentStatusSource: Send + Sync {
    /// `None` when the payment system knows nothing about the appointment.
    fn payment_status(&self, appointment_id: AppointmentId) -> Option<String>;
}

/// Status table fed by whatever integrates with the payment provider.
#[derive(Debug, Default)]
pub struct InMemoryPaymentStatus {
    statuses: RwLock<HashMap<AppointmentId, String>>,
}

impl InMemoryPaymentStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, appointment_id: AppointmentId, status: impl Into<String>) {
        let mut statuses = self.statuses.write().unwrap_or_else(|e| e.into_inner());
        statuses.insert(appointment_id, status.into());
    }
}

impl PaymentStatusSource for InMemoryPaymentStatus {
    fn payment_status(&self, appointment_id: AppointmentId) -> Option<String> {
        let statuses = self.statuses.read().unwrap_or_else(|e| e.into_inner());
        statuses.get(&appointment_id).cloned()
    }
}
