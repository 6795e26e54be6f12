//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. Persist events to store (append-only, optimistic concurrency check)
//!   ↓
//! 5. Publish events to bus (notifications, realtime stream)
//! ```
//!
//! This module contains no IO itself; it composes infrastructure traits.

use core::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use bookwell_core::{Aggregate, AggregateId, ExpectedVersion};
use bookwell_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// Failure of a dispatched command.
///
/// `E` is the aggregate's own error type; domain rejections pass through
/// untouched as `Rejected(E)`.
#[derive(Debug)]
pub enum DispatchError<E> {
    /// The aggregate refused the command.
    Rejected(E),
    /// Optimistic concurrency failure (the stream moved since it was loaded).
    Concurrency(String),
    /// Loaded stream is out of order or belongs to another aggregate.
    StreamIntegrity(String),
    /// Failed to deserialize historical event payloads into the aggregate event type.
    Deserialize(String),
    /// Persisting to the event store failed.
    Store(EventStoreError),
}

impl<E> From<EventStoreError> for DispatchError<E> {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl<E: fmt::Display> fmt::Display for DispatchError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Rejected(e) => write!(f, "command rejected: {e}"),
            DispatchError::Concurrency(msg) => write!(f, "optimistic concurrency check failed: {msg}"),
            DispatchError::StreamIntegrity(msg) => write!(f, "stream integrity violation: {msg}"),
            DispatchError::Deserialize(msg) => write!(f, "failed to deserialize stream: {msg}"),
            DispatchError::Store(e) => write!(f, "event store failure: {e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for DispatchError<E> {}

/// Reusable command execution engine for event-sourced aggregates.
///
/// ## Execution guarantees
///
/// - Events are persisted before publication; a failed append publishes nothing.
/// - Each command operates on a single aggregate instance.
/// - The append expects the exact version that was loaded, so two writers
///   racing on one stream cannot both commit.
///
/// ## Publication
///
/// The store is the source of truth and the bus is best-effort. A publish
/// failure after a successful append is logged and the committed events are
/// still returned, so callers keep their read models in step with the store.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Rehydrate an aggregate from its stream without handling a command.
    ///
    /// A stream that was never written yields the fresh aggregate from
    /// `make_aggregate`.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch a command through the full event-sourcing pipeline.
    ///
    /// Returns the committed events (with assigned sequence numbers). An
    /// empty vector means the aggregate decided the command was a no-op.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError<A::Error>>
    where
        A: Aggregate,
        A::Event: bookwell_events::Event + Serialize + DeserializeOwned,
    {
        // 1) Load history
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        // 2) Rehydrate aggregate
        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        // 3) Decide events (no mutation)
        let decided = aggregate.handle(&command).map_err(DispatchError::Rejected)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        // 4) Persist (append-only, optimistic)
        let aggregate_type = aggregate_type.into();
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type.clone(), Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        // 5) Publish committed events (after append)
        for stored in &committed {
            if let Err(e) = self.bus.publish(stored.to_envelope()) {
                tracing::warn!(
                    event_id = %stored.event_id,
                    event_type = %stored.event_type,
                    error = ?e,
                    "event committed but publication failed"
                );
            }
        }

        Ok(committed)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream<E>(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError<E>> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::StreamIntegrity(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::StreamIntegrity(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError<A::Error>>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event =
            serde_json::from_value(stored.payload.clone()).map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bookwell_core::{AggregateRoot, DomainError};
    use bookwell_events::InMemoryEventBus;
    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    use crate::event_store::InMemoryEventStore;

    #[derive(Debug, Clone)]
    struct Counter {
        id: AggregateId,
        value: u32,
        version: u64,
    }

    #[derive(Debug, Clone)]
    enum CounterCommand {
        Set(u32),
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct CounterSet {
        value: u32,
        occurred_at: DateTime<Utc>,
    }

    impl bookwell_events::Event for CounterSet {
        fn event_type(&self) -> &'static str {
            "test.counter.set"
        }
        fn version(&self) -> u32 {
            1
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            self.occurred_at
        }
    }

    impl AggregateRoot for Counter {
        type Id = AggregateId;
        fn id(&self) -> &AggregateId {
            &self.id
        }
        fn version(&self) -> u64 {
            self.version
        }
    }

    impl Aggregate for Counter {
        type Command = CounterCommand;
        type Event = CounterSet;
        type Error = DomainError;

        fn apply(&mut self, event: &CounterSet) {
            self.value = event.value;
            self.version += 1;
        }

        fn handle(&self, command: &CounterCommand) -> Result<Vec<CounterSet>, DomainError> {
            let CounterCommand::Set(value) = command;
            if *value > 100 {
                return Err(DomainError::validation("too large"));
            }
            if *value == self.value && self.version > 0 {
                return Ok(vec![]);
            }
            Ok(vec![CounterSet { value: *value, occurred_at: Utc::now() }])
        }
    }

    fn counter(id: AggregateId) -> Counter {
        Counter { id, value: 0, version: 0 }
    }

    type TestDispatcher = CommandDispatcher<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn dispatcher() -> (TestDispatcher, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>) {
        let bus = Arc::new(InMemoryEventBus::new());
        (CommandDispatcher::new(InMemoryEventStore::new(), bus.clone()), bus)
    }

    #[test]
    fn dispatch_persists_and_publishes() {
        let (dispatcher, bus) = dispatcher();
        let sub = bus.subscribe();
        let id = AggregateId::new();

        let committed = dispatcher
            .dispatch(id, "test.counter", CounterCommand::Set(7), counter)
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].sequence_number, 1);

        let envelope = sub.try_recv().unwrap();
        assert_eq!(envelope.aggregate_id(), id);
        assert_eq!(envelope.sequence_number(), 1);

        let loaded: Counter = dispatcher.load(id, counter).unwrap();
        assert_eq!(loaded.value, 7);
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn no_op_commands_append_nothing() {
        let (dispatcher, _bus) = dispatcher();
        let id = AggregateId::new();
        dispatcher.dispatch(id, "test.counter", CounterCommand::Set(3), counter).unwrap();

        let again = dispatcher.dispatch(id, "test.counter", CounterCommand::Set(3), counter).unwrap();
        assert!(again.is_empty());
        assert_eq!(dispatcher.store().load_stream(id).unwrap().len(), 1);
    }

    #[test]
    fn domain_rejections_pass_through() {
        let (dispatcher, _bus) = dispatcher();
        match dispatcher.dispatch(AggregateId::new(), "test.counter", CounterCommand::Set(500), counter) {
            Err(DispatchError::Rejected(DomainError::Validation(_))) => {}
            other => panic!("Expected rejection, got {other:?}"),
        }
    }
}
