use thiserror::Error;

use bookwell_auth::{AuthzError, GrantError, UnknownCapability};
use bookwell_core::DomainError;
use bookwell_scheduling::{AppointmentError, AppointmentId, AppointmentStatus, BookingError, TransitionActor};

use crate::command_dispatcher::DispatchError;
use crate::event_store::EventStoreError;

/// Error surface of the application services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid transition: {actor} cannot move an appointment from {from} to {to}")]
    InvalidTransition {
        actor: TransitionActor,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("not authorized")]
    NotAuthorized,

    #[error("slot conflicts with appointment {appointment_id}")]
    SlotConflict { appointment_id: AppointmentId },

    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Only ever returned to operators.
    #[error("not found")]
    NotFound,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
}

impl From<DomainError> for CoreError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => CoreError::Validation(msg),
            DomainError::InvariantViolation(msg) => CoreError::Validation(msg),
            DomainError::Conflict(msg) => CoreError::ConcurrentModification(msg),
            DomainError::NotFound => CoreError::NotFound,
        }
    }
}

impl From<AppointmentError> for CoreError {
    fn from(value: AppointmentError) -> Self {
        match value {
            AppointmentError::InvalidTransition { actor, from, to } => CoreError::InvalidTransition { actor, from, to },
            AppointmentError::NotAuthorized => CoreError::NotAuthorized,
            AppointmentError::SlotConflict { conflicting } => CoreError::SlotConflict {
                appointment_id: conflicting,
            },
            AppointmentError::Domain(e) => e.into(),
        }
    }
}

impl From<GrantError> for CoreError {
    fn from(value: GrantError) -> Self {
        match value {
            GrantError::UnknownCapability(UnknownCapability(tag)) => CoreError::UnknownCapability(tag),
            GrantError::SelfEscalation => CoreError::NotAuthorized,
            GrantError::Domain(e) => e.into(),
        }
    }
}

impl From<AuthzError> for CoreError {
    fn from(_: AuthzError) -> Self {
        CoreError::NotAuthorized
    }
}

impl From<UnknownCapability> for CoreError {
    fn from(value: UnknownCapability) -> Self {
        CoreError::UnknownCapability(value.0)
    }
}

impl From<EventStoreError> for CoreError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => CoreError::ConcurrentModification(msg),
            other => CoreError::Infrastructure(other.to_string()),
        }
    }
}

impl<E> From<DispatchError<E>> for CoreError
where
    E: Into<CoreError>,
{
    fn from(value: DispatchError<E>) -> Self {
        match value {
            DispatchError::Rejected(e) => e.into(),
            DispatchError::Concurrency(msg) => CoreError::ConcurrentModification(msg),
            DispatchError::StreamIntegrity(msg) | DispatchError::Deserialize(msg) => CoreError::Infrastructure(msg),
            DispatchError::Store(e) => e.into(),
        }
    }
}

impl From<CoreError> for BookingError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::SlotConflict { appointment_id } => BookingError::SlotConflict {
                conflicting: appointment_id,
            },
            other => BookingError::Rejected(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_rejections_keep_their_kind() {
        let err: CoreError = DispatchError::Rejected(AppointmentError::NotAuthorized).into();
        assert_eq!(err, CoreError::NotAuthorized);

        let id = AppointmentId::generate();
        let err: CoreError = DispatchError::Rejected(AppointmentError::SlotConflict { conflicting: id }).into();
        assert_eq!(err, CoreError::SlotConflict { appointment_id: id });
    }

    #[test]
    fn lost_append_race_is_a_concurrent_modification() {
        let err: CoreError = DispatchError::<GrantError>::Concurrency("expected 1, found 2".into()).into();
        assert!(matches!(err, CoreError::ConcurrentModification(_)));
    }

    #[test]
    fn unknown_tag_in_grant_assignment_is_reported_verbatim() {
        let err: CoreError = GrantError::UnknownCapability(UnknownCapability("manage-moon".into())).into();
        assert_eq!(err, CoreError::UnknownCapability("manage-moon".into()));
    }
}
