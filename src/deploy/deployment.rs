// ABOUTME: Deployment record: one attempt to move a host to a target artifact.
// ABOUTME: Phase results are append-only; the record is frozen once its outcome is set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::LifecyclePhase;
use crate::executor::PhaseResult;
use crate::types::{Artifact, DeploymentId, HostId, RolloutId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOutcome {
    Pending,
    Succeeded,
    Failed,
    RolledBack,
}

impl DeploymentOutcome {
    /// Severity used to compute a rollout's worst outcome.
    pub(crate) fn severity(self) -> u8 {
        match self {
            DeploymentOutcome::Succeeded => 0,
            DeploymentOutcome::Pending => 1,
            DeploymentOutcome::RolledBack => 2,
            DeploymentOutcome::Failed => 3,
        }
    }
}

impl fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentOutcome::Pending => "pending",
            DeploymentOutcome::Succeeded => "succeeded",
            DeploymentOutcome::Failed => "failed",
            DeploymentOutcome::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentKind {
    /// Moves the host to the rollout's artifact.
    Forward,
    /// Restores the artifact a host had before a rollout was abandoned.
    Revert,
}

/// Why a deployment left the forward path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "phase", rename_all = "snake_case")]
pub enum FailureKind {
    PhaseFailed(LifecyclePhase),
    PhaseTimedOut(LifecyclePhase),
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::PhaseFailed(phase) => write!(f, "{phase} failed"),
            FailureKind::PhaseTimedOut(phase) => write!(f, "{phase} timed out"),
            FailureKind::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub host: HostId,
    pub rollout: Option<RolloutId>,
    pub kind: DeploymentKind,
    pub target: Artifact,
    /// Artifact the host was on when the deployment started.
    pub previous: Option<Artifact>,
    pub phases: Vec<PhaseResult>,
    pub outcome: DeploymentOutcome,
    pub failure: Option<FailureKind>,
    /// Phase at which restoring the previous artifact failed.
    pub rollback_failed: Option<LifecyclePhase>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub(crate) fn start(
        host: HostId,
        kind: DeploymentKind,
        rollout: Option<RolloutId>,
        target: Artifact,
        previous: Option<Artifact>,
    ) -> Self {
        Self {
            id: DeploymentId::generate("d"),
            host,
            rollout,
            kind,
            target,
            previous,
            phases: Vec::new(),
            outcome: DeploymentOutcome::Pending,
            failure: None,
            rollback_failed: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Append a phase result, stamping its sequence number.
    pub(crate) fn record(&mut self, mut result: PhaseResult, rollback: bool) {
        debug_assert!(!self.is_finalized(), "deployment already finalized");
        result.sequence = self.phases.len() as u32;
        result.rollback = rollback;
        self.phases.push(result);
    }

    pub(crate) fn finish(&mut self, outcome: DeploymentOutcome) {
        debug_assert!(outcome != DeploymentOutcome::Pending);
        self.outcome = outcome;
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finalized(&self) -> bool {
        self.outcome != DeploymentOutcome::Pending
    }

    /// Results of the forward lifecycle.
    pub fn forward_results(&self) -> impl Iterator<Item = &PhaseResult> {
        self.phases.iter().filter(|r| !r.rollback)
    }

    /// Results of the rollback replay, if one ran.
    pub fn rollback_results(&self) -> impl Iterator<Item = &PhaseResult> {
        self.phases.iter().filter(|r| r.rollback)
    }

    pub fn is_rollback_failed(&self) -> bool {
        self.rollback_failed.is_some()
    }
}
