//! Infrastructure layer: event storage, command dispatch, read models and
//! the application services built on them.

pub mod audit;
pub mod command_dispatcher;
pub mod error;
pub mod event_store;
pub mod grants;
pub mod locks;
pub mod notifications;
pub mod payments;
pub mod permission_cache;
pub mod projections;
pub mod read_model;
pub mod scheduler;
pub mod workers;


pub use audit::{AuditLog, AuditRecord, AuditSubject, InMemoryAuditLog};
pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use error::CoreError;
pub use grants::{GrantService, GrantsView, Resolver};
pub use notifications::{NotificationError, NotificationSink, NotificationWorker, TracingNotificationSink};
pub use payments::{InMemoryPaymentStatus, PaymentStatusSource};
pub use scheduler::{ActorBooking, AppointmentService, NewAppointment, TransitionOutcome};
pub use workers::WorkerHandle;
