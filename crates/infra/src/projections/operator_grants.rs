use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use bookwell_auth::{Capability, ChangedBy, GrantStore, GrantStoreError, OperatorAccessEvent};
use bookwell_core::{AggregateId, UserId};
use bookwell_events::EventEnvelope;

use crate::projections::cursor::{CursorError, CursorStep, StreamCursors};
use crate::read_model::KeyedStore;

pub const OPERATOR_ACCESS_AGGREGATE: &str = "auth.operator_access";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperatorGrantsReadModel {
    pub user_id: UserId,
    pub capabilities: Vec<Capability>,
    pub changed_by: ChangedBy,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum OperatorGrantsProjectionError {
    #[error("failed to deserialize operator access event: {0}")]
    Deserialize(String),
    #[error("event user_id does not match envelope aggregate_id")]
    StreamMismatch,
    #[error(transparent)]
    Cursor(#[from] CursorError),
}

/// Current grants per user; the persisted grant store behind the resolver.
#[derive(Debug)]
pub struct OperatorGrantsProjection<S>
where
    S: KeyedStore<UserId, OperatorGrantsReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> OperatorGrantsProjection<S>
where
    S: KeyedStore<UserId, OperatorGrantsReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, user_id: &UserId) -> Option<OperatorGrantsReadModel> {
        self.store.get(user_id)
    }

    pub fn list(&self) -> Vec<OperatorGrantsReadModel> {
        let mut all = self.store.list();
        all.sort_by_key(|g| g.user_id);
        all
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), OperatorGrantsProjectionError> {
        if envelope.aggregate_type() != OPERATOR_ACCESS_AGGREGATE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if self.cursors.check(aggregate_id, seq)? == CursorStep::Skip {
            return Ok(());
        }

        let ev: OperatorAccessEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| OperatorGrantsProjectionError::Deserialize(e.to_string()))?;

        match ev {
            OperatorAccessEvent::GrantsChanged(e) => {
                if AggregateId::from(e.user_id) != aggregate_id {
                    return Err(OperatorGrantsProjectionError::StreamMismatch);
                }
                self.store.upsert(
                    e.user_id,
                    OperatorGrantsReadModel {
                        user_id: e.user_id,
                        capabilities: e.current,
                        changed_by: e.changed_by,
                        updated_at: e.occurred_at,
                    },
                );
            }
        }

        self.cursors.advance(aggregate_id, seq);
        Ok(())
    }

    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), OperatorGrantsProjectionError> {
        self.store.clear();
        self.cursors.clear();

        for env in envelopes {
            self.apply_envelope(&env)?;
        }
        Ok(())
    }
}

impl<S> GrantStore for OperatorGrantsProjection<S>
where
    S: KeyedStore<UserId, OperatorGrantsReadModel>,
{
    fn grants_for(&self, user_id: UserId) -> Result<Vec<String>, GrantStoreError> {
        Ok(self
            .store
            .get(&user_id)
            .map(|g| g.capabilities.iter().map(|c| c.as_str().to_string()).collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookwell_auth::GrantsChanged;
    use uuid::Uuid;

    use crate::read_model::InMemoryKeyedStore;

    fn changed(user: UserId, seq: u64, current: Vec<Capability>) -> EventEnvelope<JsonValue> {
        let ev = OperatorAccessEvent::GrantsChanged(GrantsChanged {
            user_id: user,
            previous: vec![],
            current,
            changed_by: ChangedBy::System,
            occurred_at: Utc::now(),
        });
        EventEnvelope::new(
            Uuid::now_v7(),
            user.into(),
            OPERATOR_ACCESS_AGGREGATE,
            seq,
            serde_json::to_value(ev).unwrap(),
        )
    }

    #[test]
    fn serves_latest_grants_as_tags() {
        let projection = OperatorGrantsProjection::new(InMemoryKeyedStore::new());
        let user = UserId::new();

        projection.apply_envelope(&changed(user, 1, vec![Capability::ViewMetrics])).unwrap();
        projection
            .apply_envelope(&changed(user, 2, vec![Capability::ManageTeam, Capability::ManageSettings]))
            .unwrap();

        assert_eq!(projection.grants_for(user).unwrap(), vec!["manage-team", "manage-settings"]);
        assert!(projection.grants_for(UserId::new()).unwrap().is_empty());
    }

    #[test]
    fn rebuild_replaces_state() {
        let projection = OperatorGrantsProjection::new(InMemoryKeyedStore::new());
        let user = UserId::new();
        projection.apply_envelope(&changed(user, 1, vec![Capability::ViewMetrics])).unwrap();

        projection.rebuild_from_scratch(vec![changed(user, 1, vec![Capability::ManageArticles])]).unwrap();
        assert_eq!(projection.grants_for(user).unwrap(), vec!["manage-articles"]);
    }
}
