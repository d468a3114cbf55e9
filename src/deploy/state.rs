// ABOUTME: States of a single deployment and the transitions allowed between them.
// ABOUTME: Forward phases follow PHASE_ORDER; rollback and failure are side exits.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::LifecyclePhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    /// Running the hook of a forward phase.
    Phase(LifecyclePhase),
    /// Replaying the previous artifact's lifecycle.
    RollingBack,
    Succeeded,
    Failed,
    RolledBack,
}

impl DeploymentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentState::Succeeded | DeploymentState::Failed | DeploymentState::RolledBack
        )
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: DeploymentState) -> bool {
        use DeploymentState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (Pending, Phase(phase)) => phase == LifecyclePhase::first(),
            (Phase(current), Phase(phase)) => current.next() == Some(phase),
            (Phase(LifecyclePhase::ValidateService), Succeeded) => true,
            (RollingBack, RolledBack) => true,
            (RollingBack, Failed) => true,
            (Pending | Phase(_), RollingBack) => true,
            (Pending | Phase(_), Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentState::Pending => f.write_str("Pending"),
            DeploymentState::Phase(phase) => write!(f, "{phase}"),
            DeploymentState::RollingBack => f.write_str("RollingBack"),
            DeploymentState::Succeeded => f.write_str("Succeeded"),
            DeploymentState::Failed => f.write_str("Failed"),
            DeploymentState::RolledBack => f.write_str("RolledBack"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentState::*;
    use LifecyclePhase::*;

    #[test]
    fn forward_path_follows_phase_order() {
        assert!(Pending.can_transition_to(Phase(ApplicationStop)));
        assert!(!Pending.can_transition_to(Phase(Install)));
        assert!(Phase(BeforeInstall).can_transition_to(Phase(Install)));
        assert!(!Phase(BeforeInstall).can_transition_to(Phase(AfterInstall)));
        assert!(Phase(ValidateService).can_transition_to(Succeeded));
        assert!(!Phase(ApplicationStart).can_transition_to(Succeeded));
    }

    #[test]
    fn any_non_terminal_state_can_fail_or_roll_back() {
        for state in [Pending, Phase(Install), Phase(ValidateService)] {
            assert!(state.can_transition_to(RollingBack));
            assert!(state.can_transition_to(Failed));
        }
        assert!(RollingBack.can_transition_to(RolledBack));
        assert!(RollingBack.can_transition_to(Failed));
        assert!(!RollingBack.can_transition_to(Succeeded));
    }

    #[test]
    fn terminal_states_are_final() {
        for state in [Succeeded, Failed, RolledBack] {
            assert!(state.is_terminal());
            assert!(!state.can_transition_to(RollingBack));
            assert!(!state.can_transition_to(Failed));
        }
    }
}
