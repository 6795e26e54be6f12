//! Operator access aggregate (event-sourced grant assignments).
//!
//! One stream per user. Every applied change emits a single `GrantsChanged`
//! event carrying the full before/after sets, which doubles as the audit
//! payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bookwell_core::{Aggregate, AggregateRoot, DomainError, UserId};
use bookwell_events::Event;

use crate::{Capability, CapabilitySet, UnknownCapability};

/// Who performed a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangedBy {
    User(UserId),
    /// Bootstrap seeding from configuration.
    System,
}

impl core::fmt::Display for ChangedBy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ChangedBy::User(id) => core::fmt::Display::fmt(id, f),
            ChangedBy::System => f.write_str("system"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate
// ─────────────────────────────────────────────────────────────────────────────

/// Grants held by a single user.
///
/// # Invariants
/// - Only catalog capabilities are ever stored.
/// - An assignment containing any unknown tag is rejected as a whole.
/// - Nobody changes their own grants.
#[derive(Debug, Clone)]
pub struct OperatorAccess {
    user_id: UserId,
    grants: CapabilitySet,
    version: u64,
}

impl OperatorAccess {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            grants: CapabilitySet::empty(),
            version: 0,
        }
    }

    pub fn grants(&self) -> &CapabilitySet {
        &self.grants
    }
}

impl AggregateRoot for OperatorAccess {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.user_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Replace the whole grant set (permissions dialog submit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetGrants {
    pub user_id: UserId,
    pub capabilities: Vec<String>,
    pub changed_by: ChangedBy,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantCapability {
    pub user_id: UserId,
    pub capability: String,
    pub changed_by: ChangedBy,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeCapability {
    pub user_id: UserId,
    pub capability: String,
    pub changed_by: ChangedBy,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperatorAccessCommand {
    SetGrants(SetGrants),
    Grant(GrantCapability),
    Revoke(RevokeCapability),
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantsChanged {
    pub user_id: UserId,
    pub previous: Vec<Capability>,
    pub current: Vec<Capability>,
    pub changed_by: ChangedBy,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorAccessEvent {
    GrantsChanged(GrantsChanged),
}

impl Event for OperatorAccessEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OperatorAccessEvent::GrantsChanged(_) => "auth.operator_access.grants_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OperatorAccessEvent::GrantsChanged(e) => e.occurred_at,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantError {
    #[error(transparent)]
    UnknownCapability(#[from] UnknownCapability),

    #[error("operators cannot change their own grants")]
    SelfEscalation,

    #[error("{0}")]
    Domain(#[from] DomainError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Aggregate Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Aggregate for OperatorAccess {
    type Command = OperatorAccessCommand;
    type Event = OperatorAccessEvent;
    type Error = GrantError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OperatorAccessEvent::GrantsChanged(e) => {
                self.user_id = e.user_id;
                self.grants = e.current.iter().copied().collect();
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        let (user_id, changed_by, occurred_at, next) = match command {
            OperatorAccessCommand::SetGrants(cmd) => {
                let next: CapabilitySet = Capability::parse_all(&cmd.capabilities)?.into_iter().collect();
                (cmd.user_id, cmd.changed_by, cmd.occurred_at, next)
            }
            OperatorAccessCommand::Grant(cmd) => {
                let cap: Capability = cmd.capability.parse()?;
                let mut next = self.grants.clone();
                next.insert(cap);
                (cmd.user_id, cmd.changed_by, cmd.occurred_at, next)
            }
            OperatorAccessCommand::Revoke(cmd) => {
                let cap: Capability = cmd.capability.parse()?;
                let next: CapabilitySet = self.grants.iter().filter(|c| *c != cap).collect();
                (cmd.user_id, cmd.changed_by, cmd.occurred_at, next)
            }
        };

        if user_id != self.user_id {
            return Err(DomainError::invariant("command targets a different user stream").into());
        }
        if changed_by == ChangedBy::User(self.user_id) {
            return Err(GrantError::SelfEscalation);
        }
        if next == self.grants {
            return Ok(vec![]);
        }

        Ok(vec![OperatorAccessEvent::GrantsChanged(GrantsChanged {
            user_id,
            previous: self.grants.iter().collect(),
            current: next.iter().collect(),
            changed_by,
            occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use bookwell_events::execute;

    use super::*;

    fn set(user_id: UserId, by: ChangedBy, tags: &[&str]) -> OperatorAccessCommand {
        OperatorAccessCommand::SetGrants(SetGrants {
            user_id,
            capabilities: tags.iter().map(|t| t.to_string()).collect(),
            changed_by: by,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn set_grants_records_previous_and_current() {
        let user = UserId::new();
        let admin = ChangedBy::User(UserId::new());
        let mut access = OperatorAccess::empty(user);

        execute(&mut access, &set(user, admin, &["view-metrics"])).unwrap();
        let events = access.handle(&set(user, admin, &["view-metrics", "manage-team"])).unwrap();

        let OperatorAccessEvent::GrantsChanged(e) = &events[0];
        assert_eq!(e.previous, vec![Capability::ViewMetrics]);
        assert_eq!(e.current, vec![Capability::ViewMetrics, Capability::ManageTeam]);
    }

    #[test]
    fn unknown_tag_rejects_whole_assignment() {
        let user = UserId::new();
        let mut access = OperatorAccess::empty(user);

        let err = execute(
            &mut access,
            &set(user, ChangedBy::System, &["view-metrics", "manage-moon"]),
        )
        .unwrap_err();

        assert_eq!(err, GrantError::UnknownCapability(UnknownCapability("manage-moon".into())));
        assert!(access.grants().is_empty());
        assert_eq!(access.version(), 0);
    }

    #[test]
    fn identical_set_is_a_no_op() {
        let user = UserId::new();
        let mut access = OperatorAccess::empty(user);
        execute(&mut access, &set(user, ChangedBy::System, &["manage-team"])).unwrap();

        let events = access.handle(&set(user, ChangedBy::System, &["manage-team"])).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn self_escalation_blocked() {
        let user = UserId::new();
        let access = OperatorAccess::empty(user);
        let err = access
            .handle(&set(user, ChangedBy::User(user), &["manage-settings"]))
            .unwrap_err();
        assert_eq!(err, GrantError::SelfEscalation);
    }

    #[test]
    fn grant_and_revoke_single_capability() {
        let user = UserId::new();
        let by = ChangedBy::User(UserId::new());
        let mut access = OperatorAccess::empty(user);

        execute(
            &mut access,
            &OperatorAccessCommand::Grant(GrantCapability {
                user_id: user,
                capability: "manage-events".into(),
                changed_by: by,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(access.grants().contains(Capability::ManageEvents));

        execute(
            &mut access,
            &OperatorAccessCommand::Revoke(RevokeCapability {
                user_id: user,
                capability: "manage-events".into(),
                changed_by: by,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(access.grants().is_empty());
        assert_eq!(access.version(), 2);
    }
}
