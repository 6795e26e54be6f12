//! Projection implementations (read model builders).
//!
//! Projections consume committed events and build query-optimized read
//! models. All projections are:
//! - **Rebuildable**: reconstructed from the event store on startup
//! - **Idempotent**: per-stream cursors make redelivery a no-op

pub mod appointments;
pub mod cursor;
pub mod operator_grants;

pub use appointments::{
    APPOINTMENT_AGGREGATE, AppointmentProjectionError, AppointmentReadModel, AppointmentsProjection,
};
pub use cursor::{CursorError, CursorStep, StreamCursors};
pub use operator_grants::{
    OPERATOR_ACCESS_AGGREGATE, OperatorGrantsProjection, OperatorGrantsProjectionError, OperatorGrantsReadModel,
};
