//! Append-only event store boundary.
//!
//! Infrastructure-facing abstraction for storing and loading aggregate
//! streams, with an in-memory backend and an optional Postgres backend.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
