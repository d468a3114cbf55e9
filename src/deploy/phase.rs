// ABOUTME: Lifecycle phases of a deployment and their fixed execution order.
// ABOUTME: The order lives in one array so phases can be added without touching callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A hookable step in the deployment lifecycle.
///
/// Declaration order matches `PHASE_ORDER`, so the derived `Ord` is the
/// execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LifecyclePhase {
    /// Stop the currently running application.
    ApplicationStop,
    BeforeInstall,
    /// Put the new artifact in place.
    Install,
    AfterInstall,
    ApplicationStart,
    /// Last gate before a deployment counts as succeeded.
    ValidateService,
}

/// Execution order of the lifecycle.
pub const PHASE_ORDER: [LifecyclePhase; 6] = [
    LifecyclePhase::ApplicationStop,
    LifecyclePhase::BeforeInstall,
    LifecyclePhase::Install,
    LifecyclePhase::AfterInstall,
    LifecyclePhase::ApplicationStart,
    LifecyclePhase::ValidateService,
];

impl LifecyclePhase {
    pub fn all() -> &'static [LifecyclePhase] {
        &PHASE_ORDER
    }

    pub fn first() -> LifecyclePhase {
        PHASE_ORDER[0]
    }

    /// Position in the lifecycle.
    pub fn index(self) -> usize {
        PHASE_ORDER
            .iter()
            .position(|p| *p == self)
            .unwrap_or(PHASE_ORDER.len())
    }

    /// The phase that follows this one, or None after the last gate.
    pub fn next(self) -> Option<LifecyclePhase> {
        PHASE_ORDER.get(self.index() + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::ApplicationStop => "ApplicationStop",
            LifecyclePhase::BeforeInstall => "BeforeInstall",
            LifecyclePhase::Install => "Install",
            LifecyclePhase::AfterInstall => "AfterInstall",
            LifecyclePhase::ApplicationStart => "ApplicationStart",
            LifecyclePhase::ValidateService => "ValidateService",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_array_covers_every_phase_once() {
        for (i, phase) in PHASE_ORDER.iter().enumerate() {
            assert_eq!(phase.index(), i);
        }
    }

    #[test]
    fn next_walks_the_order_and_stops_after_validate() {
        let mut walked = vec![LifecyclePhase::first()];
        while let Some(next) = walked.last().and_then(|p| p.next()) {
            walked.push(next);
        }
        assert_eq!(walked, PHASE_ORDER);
        assert_eq!(LifecyclePhase::ValidateService.next(), None);
    }

    #[test]
    fn derived_ord_matches_execution_order() {
        let mut sorted = PHASE_ORDER.to_vec();
        sorted.reverse();
        sorted.sort();
        assert_eq!(sorted, PHASE_ORDER);
    }

    #[test]
    fn serializes_with_appspec_names() {
        let yaml = serde_yaml::to_string(&LifecyclePhase::ValidateService).unwrap();
        assert_eq!(yaml.trim(), "ValidateService");
    }
}
