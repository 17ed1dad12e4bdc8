//! The deployment state machine.
//!
//! Observers of the status API may see any legal state but never an
//! illegal transition; every change is funneled through
//! [`validate_transition`] before it reaches the store.

use flowplane_core::DeploymentId;
use flowplane_store::DeploymentStatus;

use crate::error::{EngineError, Result};

/// Check whether `from → to` is a legal transition.
///
/// `running` requires an endpoint, `failed` an error message and
/// `stopped` a stop timestamp; those field invariants are enforced at the
/// call sites that build the transition patch.
#[must_use]
pub const fn is_valid_transition(from: DeploymentStatus, to: DeploymentStatus) -> bool {
    use DeploymentStatus::{Deploying, Failed, Pending, Running, Stopped};

    matches!(
        (from, to),
        // The happy path.
        (Pending, Deploying) | (Deploying, Running)
            // Any non-terminal state can fail.
            | (Pending | Deploying | Running, Failed)
            // Stop is valid in any non-terminal state; from pending it
            // happens without any platform call.
            | (Pending | Deploying | Running, Stopped)
    )
}

/// Validate a transition, returning the target state.
///
/// # Errors
///
/// Returns [`EngineError::InvalidState`] when the transition is illegal.
pub fn validate_transition(
    deployment_id: DeploymentId,
    from: DeploymentStatus,
    to: DeploymentStatus,
) -> Result<DeploymentStatus> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        tracing::warn!(
            deployment_id = %deployment_id,
            from = ?from,
            to = ?to,
            "Rejected illegal deployment transition"
        );
        Err(EngineError::InvalidState { status: from })
    }
}

/// States that admit no further transitions.
#[must_use]
pub const fn is_terminal(status: DeploymentStatus) -> bool {
    status.is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentStatus::{Deploying, Failed, Pending, Running, Stopped};

    #[test]
    fn happy_path_is_legal() {
        assert!(is_valid_transition(Pending, Deploying));
        assert!(is_valid_transition(Deploying, Running));
        assert!(is_valid_transition(Running, Stopped));
    }

    #[test]
    fn every_non_terminal_state_can_fail_or_stop() {
        for from in [Pending, Deploying, Running] {
            assert!(is_valid_transition(from, Failed));
            assert!(is_valid_transition(from, Stopped));
        }
    }

    #[test]
    fn terminal_states_admit_nothing() {
        for from in [Failed, Stopped] {
            for to in [Pending, Deploying, Running, Failed, Stopped] {
                assert!(!is_valid_transition(from, to));
            }
        }
    }

    #[test]
    fn no_skipping_forward() {
        assert!(!is_valid_transition(Pending, Running));
        assert!(!is_valid_transition(Running, Deploying));
        assert!(!is_valid_transition(Stopped, Running));
    }

    #[test]
    fn validate_reports_current_status() {
        let err =
            validate_transition(DeploymentId::generate(), Stopped, Running).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                status: Stopped
            }
        ));
    }
}
