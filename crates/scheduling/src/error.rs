use thiserror::Error;

use bookwell_core::DomainError;

use crate::{AppointmentId, AppointmentStatus, TransitionActor};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppointmentError {
    #[error("invalid transition: {actor} cannot move an appointment from {from} to {to}")]
    InvalidTransition {
        actor: TransitionActor,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    /// The actor is not a participant (or lacks the role) for this appointment.
    #[error("not authorized")]
    NotAuthorized,

    #[error("slot conflicts with appointment {conflicting}")]
    SlotConflict { conflicting: AppointmentId },

    #[error("{0}")]
    Domain(#[from] DomainError),
}
