//! Role & permission resolution.
//!
//! Authorization is fail-closed: a non-operator, an unresolvable role or an
//! unreachable grant store all answer "no".

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use bookwell_core::UserId;

use crate::menu::{VisibleGroup, visible_menu};
use crate::{Actor, Capability, CapabilityMetadata, Role};

/// Set of capabilities, ordered by catalog position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn is_subset(&self, other: &CapabilitySet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn tags(&self) -> Vec<String> {
        self.iter().map(|c| c.as_str().to_string()).collect()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing capability '{0}'")]
    Forbidden(Capability),

    #[error("forbidden: operator role required")]
    NotOperator,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("grant store unavailable: {0}")]
pub struct GrantStoreError(pub String);

/// Source of persisted per-user grant tags.
///
/// Tags are returned raw; stale tags that are no longer part of the catalog
/// are tolerated here and dropped during resolution.
pub trait GrantStore: Send + Sync {
    fn grants_for(&self, user_id: UserId) -> Result<Vec<String>, GrantStoreError>;
}

impl<G> GrantStore for Arc<G>
where
    G: GrantStore + ?Sized,
{
    fn grants_for(&self, user_id: UserId) -> Result<Vec<String>, GrantStoreError> {
        (**self).grants_for(user_id)
    }
}

/// Effective capability set for a role and its raw grants.
///
/// Non-operators always resolve to the empty set, whatever is stored for them.
pub fn effective_permissions<S: AsRef<str>>(role: Role, grants: &[S]) -> CapabilitySet {
    if !role.is_operator() {
        return CapabilitySet::empty();
    }

    grants
        .iter()
        .filter_map(|tag| match tag.as_ref().parse::<Capability>() {
            Ok(cap) => Some(cap),
            Err(e) => {
                tracing::warn!(tag = tag.as_ref(), error = %e, "ignoring unrecognized grant");
                None
            }
        })
        .collect()
}

/// Pure capability check against an already-resolved set.
pub fn authorize(role: Role, capabilities: &CapabilitySet, required: Capability) -> Result<(), AuthzError> {
    if !role.is_operator() {
        return Err(AuthzError::NotOperator);
    }
    if capabilities.contains(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required))
    }
}

/// Resolver bound to a grant store.
#[derive(Debug, Clone)]
pub struct PermissionResolver<G> {
    grants: G,
}

impl<G: GrantStore> PermissionResolver<G> {
    pub fn new(grants: G) -> Self {
        Self { grants }
    }

    pub fn grant_store(&self) -> &G {
        &self.grants
    }

    /// Non-operators never hit the store.
    pub fn effective_for(&self, actor: &Actor) -> Result<CapabilitySet, GrantStoreError> {
        if !actor.is_operator() {
            return Ok(CapabilitySet::empty());
        }
        let raw = self.grants.grants_for(actor.user_id)?;
        Ok(effective_permissions(actor.role, &raw))
    }

    /// Fail-closed boolean check.
    pub fn authorize(&self, actor: &Actor, required: Capability) -> bool {
        self.require(actor, required).is_ok()
    }

    /// Same as [`authorize`](Self::authorize) for identities whose role arrives as a raw string.
    pub fn authorize_claimed(&self, user_id: UserId, role: &str, required: Capability) -> bool {
        match role.parse::<Role>() {
            Ok(role) => self.authorize(&Actor::new(user_id, role), required),
            Err(e) => {
                tracing::warn!(%user_id, error = %e, "denying unresolvable role");
                false
            }
        }
    }

    pub fn require(&self, actor: &Actor, required: Capability) -> Result<(), AuthzError> {
        if !actor.is_operator() {
            return Err(AuthzError::NotOperator);
        }
        let caps = match self.effective_for(actor) {
            Ok(caps) => caps,
            Err(e) => {
                tracing::warn!(user_id = %actor.user_id, error = %e, "grant lookup failed; denying");
                return Err(AuthzError::Forbidden(required));
            }
        };
        authorize(actor.role, &caps, required)
    }

    /// Menu for the actor. A failed grant lookup degrades to the baseline.
    pub fn visible_menu_for(&self, actor: &Actor) -> Vec<VisibleGroup> {
        let caps = self.effective_for(actor).unwrap_or_else(|e| {
            tracing::warn!(user_id = %actor.user_id, error = %e, "grant lookup failed; rendering baseline menu");
            CapabilitySet::empty()
        });
        visible_menu(actor.role, &caps)
    }

    pub fn explain(&self, actor: &Actor, required: Capability) -> AuthorizationExplanation {
        let grants = if actor.is_operator() {
            self.grants.grants_for(actor.user_id)
        } else {
            Ok(Vec::new())
        };
        explain_authorization(actor, required, grants)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation
// ─────────────────────────────────────────────────────────────────────────────

/// Why a capability check was allowed or denied.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_capability: Capability,
    pub granted: bool,
    pub reason: String,
    pub actor: ActorState,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActorState {
    pub user_id: UserId,
    pub role: Role,
    pub effective_capabilities: Vec<String>,
    /// Stored tags that are no longer in the catalog.
    pub ignored_grants: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NotOperator,
    MissingCapability,
    GrantStoreUnavailable,
}

/// Explain the decision `authorize` makes for `actor` and `required`.
pub fn explain_authorization(
    actor: &Actor,
    required: Capability,
    grants: Result<Vec<String>, GrantStoreError>,
) -> AuthorizationExplanation {
    let state = |effective: &CapabilitySet, ignored: Vec<String>| ActorState {
        user_id: actor.user_id,
        role: actor.role,
        effective_capabilities: effective.tags(),
        ignored_grants: ignored,
    };
    let denied = |kind: DenialKind,
                  reason: String,
                  message: String,
                  suggestions: Vec<String>,
                  st: ActorState| {
        AuthorizationExplanation {
            required_capability: required,
            granted: false,
            reason,
            actor: st,
            denial_reason: Some(DenialReason {
                kind,
                message,
                suggestions,
            }),
        }
    };

    if !actor.is_operator() {
        return denied(
            DenialKind::NotOperator,
            format!("Role '{}' never holds administrative capabilities", actor.role),
            "Administrative capabilities are only granted to operators".to_string(),
            vec!["Sign in with an operator account".to_string()],
            state(&CapabilitySet::empty(), Vec::new()),
        );
    }

    let raw = match grants {
        Ok(raw) => raw,
        Err(e) => {
            return denied(
                DenialKind::GrantStoreUnavailable,
                format!("Grants could not be loaded: {e}"),
                "Authorization fails closed while grants are unavailable".to_string(),
                vec!["Retry once the grant store is reachable".to_string()],
                state(&CapabilitySet::empty(), Vec::new()),
            );
        }
    };

    let ignored: Vec<String> = raw
        .iter()
        .filter(|t| t.parse::<Capability>().is_err())
        .cloned()
        .collect();
    let effective = effective_permissions(actor.role, &raw);

    if effective.contains(required) {
        AuthorizationExplanation {
            required_capability: required,
            granted: true,
            reason: format!("Operator holds '{required}'"),
            actor: state(&effective, ignored),
            denial_reason: None,
        }
    } else {
        denied(
            DenialKind::MissingCapability,
            format!(
                "Operator does not hold '{required}'. Current capabilities: {:?}",
                effective.tags()
            ),
            format!("Missing required capability: '{required}'"),
            vec![format!(
                "Ask an operator with '{}' to grant '{required}'",
                Capability::ManageTeam
            )],
            state(&effective, ignored),
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry (audit / display)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RoleDefinition {
    pub name: Role,
    pub description: &'static str,
    pub may_hold_capabilities: bool,
}

/// Complete view of roles and the capability catalog.
#[derive(Debug, Clone, Serialize)]
pub struct RbacRegistry {
    pub roles: Vec<RoleDefinition>,
    pub capabilities: Vec<CapabilityMetadata>,
}

impl RbacRegistry {
    pub fn catalog() -> Self {
        Self {
            roles: Role::ALL
                .into_iter()
                .map(|role| RoleDefinition {
                    name: role,
                    description: role_description(role),
                    may_hold_capabilities: role.is_operator(),
                })
                .collect(),
            capabilities: Capability::ALL.into_iter().map(|c| *c.metadata()).collect(),
        }
    }
}

fn role_description(role: Role) -> &'static str {
    match role {
        Role::Requester => "Books appointments with providers",
        Role::TraineeProvider => "Provider in training; may propose offerings and book as a requester",
        Role::Provider => "Offers services and manages incoming appointments",
        Role::Operator => "Platform staff; administrative access through explicit grants",
    }
}
