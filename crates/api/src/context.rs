use bookwell_auth::{Actor, Role};
use bookwell_core::UserId;

/// Authenticated identity for a request, taken from the bearer token.
///
/// Immutable; present on every protected route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor: Actor,
}

impl ActorContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    pub fn user_id(&self) -> UserId {
        self.actor.user_id
    }

    pub fn role(&self) -> Role {
        self.actor.role
    }
}
