//! Domain error model.
//!
//! Aggregates (appointments, operator access) only ever fail with one of
//! these. Authorization and storage failures are typed by their own crates
//! and meet this one at the service boundary.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input rejected before any state was consulted (bad duration, oversize notes).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Command is well-formed but the current state forbids it.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The stream has no events, or was purged.
    #[error("not found")]
    NotFound,

    /// Stream revision moved underneath the caller.
    #[error("concurrent modification: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Worth retrying after reloading the stream.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(DomainError::conflict("appointment at revision 3").is_retryable());
        assert!(!DomainError::validation("duration must be 30, 45, 60 or 90").is_retryable());
        assert!(!DomainError::not_found().is_retryable());
    }

    #[test]
    fn messages_carry_context() {
        let err = DomainError::invariant("appointment already completed");
        assert_eq!(err.to_string(), "invariant violated: appointment already completed");
    }
}
