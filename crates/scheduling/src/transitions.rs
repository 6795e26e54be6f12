//! Actor-gated transition table for appointments.

use serde::{Deserialize, Serialize};

use bookwell_auth::{Actor, Role};
use bookwell_core::UserId;

use crate::{AppointmentError, AppointmentStatus};

/// The capacity in which an identity acts on a specific appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionActor {
    Requester,
    Provider,
    Operator,
}

impl core::fmt::Display for TransitionActor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            TransitionActor::Requester => "requester",
            TransitionActor::Provider => "provider",
            TransitionActor::Operator => "operator",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub actor: TransitionActor,
    pub from: AppointmentStatus,
    pub to: AppointmentStatus,
}

const fn rule(actor: TransitionActor, from: AppointmentStatus, to: AppointmentStatus) -> TransitionRule {
    TransitionRule { actor, from, to }
}

use AppointmentStatus::{Cancelled, Completed, Confirmed, Pending};
use TransitionActor::{Operator, Provider, Requester};

/// Every permitted transition. Anything absent is rejected.
pub static TRANSITIONS: &[TransitionRule] = &[
    rule(Provider, Pending, Confirmed),
    rule(Provider, Pending, Cancelled),
    rule(Provider, Confirmed, Completed),
    rule(Provider, Confirmed, Cancelled),
    rule(Requester, Pending, Cancelled),
    rule(Requester, Confirmed, Cancelled),
    // administrative override: any non-terminal state
    rule(Operator, Pending, Cancelled),
    rule(Operator, Confirmed, Cancelled),
];

/// Decide in which capacity `actor` may act on an appointment.
///
/// Trainee providers never act as providers; they are treated like any other
/// identity and only match as the requester.
pub fn resolve_actor(actor: &Actor, requester_id: UserId, provider_id: UserId) -> Option<TransitionActor> {
    if actor.role == Role::Operator {
        Some(TransitionActor::Operator)
    } else if actor.role == Role::Provider && actor.user_id == provider_id {
        Some(TransitionActor::Provider)
    } else if actor.user_id == requester_id {
        Some(TransitionActor::Requester)
    } else {
        None
    }
}

pub fn is_allowed(actor: TransitionActor, from: AppointmentStatus, to: AppointmentStatus) -> bool {
    TRANSITIONS
        .iter()
        .any(|r| r.actor == actor && r.from == from && r.to == to)
}

fn can_reach(actor: TransitionActor, to: AppointmentStatus) -> bool {
    TRANSITIONS.iter().any(|r| r.actor == actor && r.to == to)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    Apply,
    /// The appointment already sits in the target state this actor could have
    /// moved it to; nothing to do.
    AlreadyApplied,
}

pub fn check_transition(
    actor: TransitionActor,
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<TransitionDecision, AppointmentError> {
    if from == to && can_reach(actor, to) {
        return Ok(TransitionDecision::AlreadyApplied);
    }
    if is_allowed(actor, from, to) {
        Ok(TransitionDecision::Apply)
    } else {
        Err(AppointmentError::InvalidTransition { actor, from, to })
    }
}

/// What a given identity may do next with an appointment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentCapabilities {
    pub can_confirm: bool,
    pub can_cancel: bool,
    pub can_complete: bool,
}

impl AppointmentCapabilities {
    pub fn compute(actor: Option<TransitionActor>, status: AppointmentStatus) -> Self {
        let Some(actor) = actor else {
            return Self::default();
        };
        Self {
            can_confirm: is_allowed(actor, status, Confirmed),
            can_cancel: is_allowed(actor, status, Cancelled),
            can_complete: is_allowed(actor, status, Completed),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn any_actor() -> impl Strategy<Value = TransitionActor> {
        prop_oneof![Just(Requester), Just(Provider), Just(Operator)]
    }

    fn any_status() -> impl Strategy<Value = AppointmentStatus> {
        prop_oneof![Just(Pending), Just(Confirmed), Just(Completed), Just(Cancelled)]
    }

    #[test]
    fn provider_can_confirm_pending() {
        assert_eq!(
            check_transition(Provider, Pending, Confirmed),
            Ok(TransitionDecision::Apply)
        );
    }

    #[test]
    fn requester_cannot_confirm() {
        assert_eq!(
            check_transition(Requester, Pending, Confirmed),
            Err(AppointmentError::InvalidTransition {
                actor: Requester,
                from: Pending,
                to: Confirmed
            })
        );
    }

    #[test]
    fn reissued_cancel_is_already_applied() {
        for actor in [Requester, Provider, Operator] {
            assert_eq!(
                check_transition(actor, Cancelled, Cancelled),
                Ok(TransitionDecision::AlreadyApplied)
            );
        }
    }

    #[test]
    fn operator_cannot_complete() {
        assert!(check_transition(Operator, Confirmed, Completed).is_err());
        assert!(check_transition(Operator, Completed, Completed).is_err());
    }

    #[test]
    fn trainee_provider_never_acts_as_provider() {
        let trainee = Actor::new(UserId::new(), Role::TraineeProvider);
        let requester = UserId::new();
        assert_eq!(resolve_actor(&trainee, requester, trainee.user_id), None);

        let as_requester = resolve_actor(&trainee, trainee.user_id, UserId::new());
        assert_eq!(as_requester, Some(Requester));
    }

    #[test]
    fn outsider_resolves_to_none() {
        let provider = Actor::new(UserId::new(), Role::Provider);
        assert_eq!(resolve_actor(&provider, UserId::new(), UserId::new()), None);
    }

    #[test]
    fn capabilities_follow_the_table() {
        let caps = AppointmentCapabilities::compute(Some(Provider), Confirmed);
        assert_eq!(
            caps,
            AppointmentCapabilities {
                can_confirm: false,
                can_cancel: true,
                can_complete: true
            }
        );
        assert_eq!(
            AppointmentCapabilities::compute(None, Pending),
            AppointmentCapabilities::default()
        );
        assert_eq!(
            AppointmentCapabilities::compute(Some(Operator), Completed),
            AppointmentCapabilities::default()
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 1000, .. ProptestConfig::default() })]

        #[test]
        fn transitions_outside_table_are_rejected(actor in any_actor(), from in any_status(), to in any_status()) {
            let listed = is_allowed(actor, from, to);
            let reissue = from == to && can_reach(actor, to);
            let result = check_transition(actor, from, to);

            if listed {
                prop_assert_eq!(result, Ok(TransitionDecision::Apply));
            } else if reissue {
                prop_assert_eq!(result, Ok(TransitionDecision::AlreadyApplied));
            } else {
                prop_assert_eq!(result, Err(AppointmentError::InvalidTransition { actor, from, to }));
            }
        }

        #[test]
        fn terminal_states_never_move(actor in any_actor(), from in prop_oneof![Just(Completed), Just(Cancelled)], to in any_status()) {
            prop_assume!(from != to);
            prop_assert!(check_transition(actor, from, to).is_err());
        }
    }
}
