//! Grant service: operator capability assignments.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::instrument;

use bookwell_auth::{
    Actor, Capability, ChangedBy, GrantCapability, OperatorAccess, OperatorAccessCommand, OperatorAccessEvent,
    PermissionResolver, RevokeCapability, SetGrants,
};
use bookwell_core::UserId;
use bookwell_events::{EventBus, EventEnvelope};

use crate::audit::{self, AuditLog, AuditRecord};
use crate::command_dispatcher::CommandDispatcher;
use crate::error::CoreError;
use crate::event_store::{EventStore, StoredEvent};
use crate::permission_cache::CachingGrantStore;
use crate::projections::{OPERATOR_ACCESS_AGGREGATE, OperatorGrantsProjection, OperatorGrantsReadModel};
use crate::read_model::InMemoryKeyedStore;

pub type GrantsProjection = OperatorGrantsProjection<InMemoryKeyedStore<UserId, OperatorGrantsReadModel>>;
pub type CachedGrantStore = CachingGrantStore<Arc<GrantsProjection>>;
pub type Resolver = PermissionResolver<Arc<CachedGrantStore>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantsView {
    pub user_id: UserId,
    pub capabilities: Vec<Capability>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct GrantService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    grants: Arc<GrantsProjection>,
    cache: Arc<CachedGrantStore>,
    resolver: Resolver,
    audit: Arc<dyn AuditLog>,
}

impl<S, B> GrantService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, audit: Arc<dyn AuditLog>, cache_ttl: Duration) -> Self {
        let grants = Arc::new(OperatorGrantsProjection::new(InMemoryKeyedStore::new()));
        let cache = Arc::new(CachingGrantStore::new(grants.clone(), cache_ttl));
        Self {
            dispatcher,
            grants,
            resolver: PermissionResolver::new(cache.clone()),
            cache,
            audit,
        }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Replace `user_id`'s grants. Requires `manage-team`; nobody changes
    /// their own grants; one unknown tag rejects the whole assignment.
    #[instrument(skip(self, capabilities), fields(actor_id = %actor.user_id), err)]
    pub fn set_grants(&self, actor: &Actor, user_id: UserId, capabilities: Vec<String>) -> Result<GrantsView, CoreError> {
        self.resolver.require(actor, Capability::ManageTeam)?;
        self.execute(OperatorAccessCommand::SetGrants(SetGrants {
            user_id,
            capabilities,
            changed_by: ChangedBy::User(actor.user_id),
            occurred_at: Utc::now(),
        }))
    }

    #[instrument(skip(self), fields(actor_id = %actor.user_id), err)]
    pub fn grant(&self, actor: &Actor, user_id: UserId, capability: &str) -> Result<GrantsView, CoreError> {
        self.resolver.require(actor, Capability::ManageTeam)?;
        self.execute(OperatorAccessCommand::Grant(GrantCapability {
            user_id,
            capability: capability.to_string(),
            changed_by: ChangedBy::User(actor.user_id),
            occurred_at: Utc::now(),
        }))
    }

    #[instrument(skip(self), fields(actor_id = %actor.user_id), err)]
    pub fn revoke(&self, actor: &Actor, user_id: UserId, capability: &str) -> Result<GrantsView, CoreError> {
        self.resolver.require(actor, Capability::ManageTeam)?;
        self.execute(OperatorAccessCommand::Revoke(RevokeCapability {
            user_id,
            capability: capability.to_string(),
            changed_by: ChangedBy::User(actor.user_id),
            occurred_at: Utc::now(),
        }))
    }

    /// Seed `user_id` with the full catalog on behalf of the system.
    pub fn bootstrap(&self, user_id: UserId) -> Result<GrantsView, CoreError> {
        let view = self.execute(OperatorAccessCommand::SetGrants(SetGrants {
            user_id,
            capabilities: Capability::ALL.iter().map(|c| c.as_str().to_string()).collect(),
            changed_by: ChangedBy::System,
            occurred_at: Utc::now(),
        }))?;
        tracing::info!(%user_id, "bootstrap operator seeded with full catalog");
        Ok(view)
    }

    /// Operators may read their own grants; anyone else's needs `manage-team`.
    pub fn grants_of(&self, actor: &Actor, user_id: UserId) -> Result<GrantsView, CoreError> {
        if !(actor.is_operator() && actor.user_id == user_id) {
            self.resolver.require(actor, Capability::ManageTeam)?;
        }
        Ok(self.view(user_id))
    }

    pub fn list(&self, actor: &Actor) -> Result<Vec<OperatorGrantsReadModel>, CoreError> {
        self.resolver.require(actor, Capability::ManageTeam)?;
        Ok(self.grants.list())
    }

    /// Rebuild the grants view and its audit trail from the event store.
    pub fn rebuild(&self) -> Result<usize, CoreError> {
        let history = self.dispatcher.store().load_all(OPERATOR_ACCESS_AGGREGATE)?;
        self.grants
            .rebuild_from_scratch(history.iter().map(StoredEvent::to_envelope))
            .map_err(|e| CoreError::Infrastructure(e.to_string()))?;
        for stored in &history {
            if let Some(OperatorAccessEvent::GrantsChanged(e)) = decode(stored) {
                audit::record(&*self.audit, AuditRecord::grants_changed(stored.event_id, &e));
            }
        }
        self.cache.invalidate_all();
        Ok(history.len())
    }

    fn execute(&self, command: OperatorAccessCommand) -> Result<GrantsView, CoreError> {
        let user_id = match &command {
            OperatorAccessCommand::SetGrants(c) => c.user_id,
            OperatorAccessCommand::Grant(c) => c.user_id,
            OperatorAccessCommand::Revoke(c) => c.user_id,
        };

        let committed = self
            .dispatcher
            .dispatch(user_id.into(), OPERATOR_ACCESS_AGGREGATE, command, |id| {
                OperatorAccess::empty(UserId::from_uuid(*id.as_uuid()))
            })?;

        for stored in &committed {
            if let Err(e) = self.grants.apply_envelope(&stored.to_envelope()) {
                tracing::warn!(event_id = %stored.event_id, error = %e, "grants read model update failed");
            }
            if let Some(OperatorAccessEvent::GrantsChanged(e)) = decode(stored) {
                tracing::info!(%user_id, changed_by = %e.changed_by, current = ?e.current, "grants changed");
                audit::record(&*self.audit, AuditRecord::grants_changed(stored.event_id, &e));
            }
        }
        self.cache.invalidate(user_id);

        Ok(self.view(user_id))
    }

    fn view(&self, user_id: UserId) -> GrantsView {
        match self.grants.get(&user_id) {
            Some(rm) => GrantsView {
                user_id,
                capabilities: rm.capabilities,
                updated_at: Some(rm.updated_at),
            },
            None => GrantsView {
                user_id,
                capabilities: vec![],
                updated_at: None,
            },
        }
    }
}

fn decode(stored: &StoredEvent) -> Option<OperatorAccessEvent> {
    match serde_json::from_value(stored.payload.clone()) {
        Ok(ev) => Some(ev),
        Err(e) => {
            tracing::warn!(event_id = %stored.event_id, error = %e, "undecodable grants event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookwell_auth::Role;
    use bookwell_events::InMemoryEventBus;

    use crate::audit::{AuditSubject, InMemoryAuditLog};
    use crate::event_store::InMemoryEventStore;

    type Service = GrantService<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn service() -> (Service, Arc<InMemoryAuditLog>) {
        let dispatcher = Arc::new(CommandDispatcher::new(InMemoryEventStore::new(), Arc::new(InMemoryEventBus::new())));
        let audit = Arc::new(InMemoryAuditLog::new());
        (GrantService::new(dispatcher, audit.clone(), Duration::from_secs(300)), audit)
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn manage_team_holder_assigns_grants_and_cache_follows() {
        let (service, audit) = service();
        let admin = Actor::new(UserId::new(), Role::Operator);
        let staff = Actor::new(UserId::new(), Role::Operator);
        service.bootstrap(admin.user_id).unwrap();

        // Prime the cache with the empty set.
        assert!(!service.resolver().authorize(&staff, Capability::ViewMetrics));

        let view = service.set_grants(&admin, staff.user_id, tags(&["view-metrics"])).unwrap();
        assert_eq!(view.capabilities, vec![Capability::ViewMetrics]);
        assert!(service.resolver().authorize(&staff, Capability::ViewMetrics));

        let records = audit.list(Some(AuditSubject::Grants(staff.user_id))).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].new_value, "view-metrics");
        assert_eq!(records[0].changed_by, ChangedBy::User(admin.user_id));
    }

    #[test]
    fn unknown_tag_applies_nothing() {
        let (service, _audit) = service();
        let admin = Actor::new(UserId::new(), Role::Operator);
        let staff = UserId::new();
        service.bootstrap(admin.user_id).unwrap();

        let err = service
            .set_grants(&admin, staff, tags(&["view-metrics", "manage-moon"]))
            .unwrap_err();
        assert_eq!(err, CoreError::UnknownCapability("manage-moon".into()));
        assert!(service.grants_of(&admin, staff).unwrap().capabilities.is_empty());
    }

    #[test]
    fn operators_cannot_change_their_own_grants() {
        let (service, _audit) = service();
        let admin = Actor::new(UserId::new(), Role::Operator);
        service.bootstrap(admin.user_id).unwrap();

        let err = service.set_grants(&admin, admin.user_id, tags(&[])).unwrap_err();
        assert_eq!(err, CoreError::NotAuthorized);
        assert_eq!(service.grants_of(&admin, admin.user_id).unwrap().capabilities.len(), Capability::ALL.len());
    }

    #[test]
    fn missing_manage_team_is_not_authorized() {
        let (service, _audit) = service();
        let admin = Actor::new(UserId::new(), Role::Operator);
        let viewer = Actor::new(UserId::new(), Role::Operator);
        service.bootstrap(admin.user_id).unwrap();
        service.set_grants(&admin, viewer.user_id, tags(&["view-metrics"])).unwrap();

        assert_eq!(
            service.set_grants(&viewer, UserId::new(), tags(&["view-metrics"])).unwrap_err(),
            CoreError::NotAuthorized
        );
        let requester = Actor::new(UserId::new(), Role::Requester);
        assert_eq!(service.grants_of(&requester, admin.user_id).unwrap_err(), CoreError::NotAuthorized);
    }

    #[test]
    fn identical_assignment_is_a_no_op() {
        let (service, audit) = service();
        let admin = Actor::new(UserId::new(), Role::Operator);
        let staff = UserId::new();
        service.bootstrap(admin.user_id).unwrap();
        service.set_grants(&admin, staff, tags(&["manage-articles"])).unwrap();
        service.set_grants(&admin, staff, tags(&["manage-articles"])).unwrap();

        assert_eq!(audit.list(Some(AuditSubject::Grants(staff))).unwrap().len(), 1);
    }

    #[test]
    fn rebuild_restores_grants_from_the_store() {
        let (service, _audit) = service();
        let admin = Actor::new(UserId::new(), Role::Operator);
        service.bootstrap(admin.user_id).unwrap();

        assert_eq!(service.rebuild().unwrap(), 1);
        assert!(service.resolver().authorize(&admin, Capability::ManageSettings));
    }

    #[test]
    fn restarted_service_replays_the_grant_audit_trail() {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
        let start = |audit: Arc<InMemoryAuditLog>| {
            let dispatcher = Arc::new(CommandDispatcher::new(store.clone(), bus.clone()));
            GrantService::new(dispatcher, audit, Duration::from_secs(300))
        };

        let admin = Actor::new(UserId::new(), Role::Operator);
        let staff = UserId::new();
        let before = start(Arc::new(InMemoryAuditLog::new()));
        before.bootstrap(admin.user_id).unwrap();
        before.set_grants(&admin, staff, tags(&["view-metrics"])).unwrap();

        let audit = Arc::new(InMemoryAuditLog::new());
        let after = start(audit.clone());
        assert_eq!(after.rebuild().unwrap(), 2);
        after.rebuild().unwrap();

        let all = audit.list(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].changed_by, ChangedBy::System);
        let staff_records = audit.list(Some(AuditSubject::Grants(staff))).unwrap();
        assert_eq!(staff_records.len(), 1);
        assert_eq!(staff_records[0].changed_by, ChangedBy::User(admin.user_id));
    }
}
