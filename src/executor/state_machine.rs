//! Pure per-resource remediation state machine
//!
//! ```text
//! Pending -> PreconditionCheck -> Mutating -> Verifying -> Succeeded
//!    |              |                |            |
//!    +--------------+----------------+------------+--> Failed(reason)
//! ```
//!
//! Which failure reasons a state may take is fixed: a precondition check can
//! only fail with `PreconditionNotMet`, a mutation with `MutationFailed`, a
//! verification with `VerificationMismatch`. `Timeout` and `Cancelled` are
//! allowed from every non-terminal state. Terminal states accept nothing.

use serde::{Deserialize, Serialize};

use crate::model::{FailureReason, ResourceOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    Pending,
    PreconditionCheck,
    Mutating,
    Verifying,
    Succeeded,
    Failed(FailureReason),
}

impl ResourceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResourceState::Succeeded | ResourceState::Failed(_))
    }

    /// Failure reason attributed to the phase this state represents
    pub fn phase_failure(&self) -> Option<FailureReason> {
        match self {
            ResourceState::PreconditionCheck => Some(FailureReason::PreconditionNotMet),
            ResourceState::Mutating => Some(FailureReason::MutationFailed),
            ResourceState::Verifying => Some(FailureReason::VerificationMismatch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Begin,
    PreconditionPassed,
    MutationApplied,
    Verified,
    Fail(FailureReason),
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Invalid transition from {from:?} with {transition:?}")]
    InvalidTransition {
        from: ResourceState,
        transition: Transition,
    },
}

pub fn apply_transition(
    state: ResourceState,
    transition: Transition,
) -> Result<ResourceState, StateError> {
    use ResourceState as S;
    use Transition as T;

    match (state, transition) {
        (S::Pending, T::Begin) => Ok(S::PreconditionCheck),
        (S::PreconditionCheck, T::PreconditionPassed) => Ok(S::Mutating),
        (S::Mutating, T::MutationApplied) => Ok(S::Verifying),
        (S::Verifying, T::Verified) => Ok(S::Succeeded),

        (from, T::Fail(reason))
            if !from.is_terminal()
                && (is_interruption(reason) || from.phase_failure() == Some(reason)) =>
        {
            Ok(S::Failed(reason))
        }

        (from, transition) => Err(StateError::InvalidTransition { from, transition }),
    }
}

fn is_interruption(reason: FailureReason) -> bool {
    matches!(reason, FailureReason::Timeout | FailureReason::Cancelled)
}

/// Outcome of a terminal state; `None` while the resource is still in flight
pub fn state_to_outcome(state: ResourceState) -> Option<ResourceOutcome> {
    match state {
        ResourceState::Succeeded => Some(ResourceOutcome::Succeeded),
        ResourceState::Failed(reason) => Some(ResourceOutcome::Failed(reason)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut state = ResourceState::Pending;
        for transition in [
            Transition::Begin,
            Transition::PreconditionPassed,
            Transition::MutationApplied,
            Transition::Verified,
        ] {
            state = apply_transition(state, transition).unwrap();
        }
        assert_eq!(state, ResourceState::Succeeded);
        assert_eq!(state_to_outcome(state), Some(ResourceOutcome::Succeeded));
    }

    #[test]
    fn test_precondition_failure_skips_mutation() {
        let state = apply_transition(ResourceState::Pending, Transition::Begin).unwrap();
        let state = apply_transition(
            state,
            Transition::Fail(FailureReason::PreconditionNotMet),
        )
        .unwrap();
        assert_eq!(state, ResourceState::Failed(FailureReason::PreconditionNotMet));
        assert!(apply_transition(state, Transition::PreconditionPassed).is_err());
    }

    #[test]
    fn test_failure_reason_must_match_phase() {
        assert!(apply_transition(
            ResourceState::Mutating,
            Transition::Fail(FailureReason::VerificationMismatch)
        )
        .is_err());
        assert!(apply_transition(
            ResourceState::Verifying,
            Transition::Fail(FailureReason::VerificationMismatch)
        )
        .is_ok());
    }

    #[test]
    fn test_timeout_allowed_from_any_live_state() {
        for state in [
            ResourceState::Pending,
            ResourceState::PreconditionCheck,
            ResourceState::Mutating,
            ResourceState::Verifying,
        ] {
            assert_eq!(
                apply_transition(state, Transition::Fail(FailureReason::Timeout)).unwrap(),
                ResourceState::Failed(FailureReason::Timeout)
            );
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(apply_transition(
            ResourceState::Succeeded,
            Transition::Fail(FailureReason::Cancelled)
        )
        .is_err());
        assert!(apply_transition(
            ResourceState::Failed(FailureReason::Timeout),
            Transition::Begin
        )
        .is_err());
        assert_eq!(state_to_outcome(ResourceState::Mutating), None);
    }
}
