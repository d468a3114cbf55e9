// ABOUTME: Rollout record: batches, per-host outcomes, halt reason, and final status.
// ABOUTME: Snapshots of this record are what status queries and the ledger see.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::BatchPolicy;
use crate::deploy::{Deployment, DeploymentKind, DeploymentOutcome};
use crate::diagnostics::Warning;
use crate::registry::LeaseInfo;
use crate::types::{ArtifactId, DeploymentId, HostId, RolloutId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    InProgress,
    /// Every host succeeded.
    Completed,
    /// Some hosts failed, rolled back, or could not be restored.
    PartiallyFailed,
    /// The rollout was cancelled and every touched host is back where it started.
    RolledBack,
    /// Halted because a batch could not take its leases.
    Aborted,
}

impl RolloutStatus {
    pub fn is_terminal(self) -> bool {
        self != RolloutStatus::InProgress
    }
}

impl fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RolloutStatus::InProgress => "in progress",
            RolloutStatus::Completed => "completed",
            RolloutStatus::PartiallyFailed => "partially failed",
            RolloutStatus::RolledBack => "rolled back",
            RolloutStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    Leasing,
    Running,
    Completed,
    /// Never started because the rollout halted earlier.
    Skipped,
    /// Could not take its leases.
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub index: usize,
    pub hosts: Vec<HostId>,
    #[serde(default)]
    pub succeeded: Vec<HostId>,
    #[serde(default)]
    pub failed: Vec<HostId>,
    #[serde(default)]
    pub rolled_back: Vec<HostId>,
    pub state: BatchState,
}

impl Batch {
    pub(crate) fn new(index: usize, hosts: Vec<HostId>) -> Self {
        Self {
            index,
            hosts,
            succeeded: Vec::new(),
            failed: Vec::new(),
            rolled_back: Vec::new(),
            state: BatchState::Pending,
        }
    }

    /// Hosts whose deployment did not succeed, rolled back or not.
    pub fn failure_count(&self) -> usize {
        self.failed.len() + self.rolled_back.len()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            BatchState::Completed | BatchState::Skipped | BatchState::Aborted
        )
    }
}

/// Why a rollout stopped before its last batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HaltReason {
    /// A host stayed leased by another deployment past every retry.
    HostBusy {
        host: HostId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        holder: Option<LeaseInfo>,
    },
    /// A host could not be leased for a reason retrying will not fix.
    HostUnavailable { host: HostId, detail: String },
    /// A batch's failure ratio exceeded the configured maximum.
    FailureThreshold {
        batch: usize,
        failed: usize,
        total: usize,
        max_failure_ratio: f64,
    },
    Cancelled,
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::HostBusy { host, holder } => match holder {
                Some(info) => write!(
                    f,
                    "host {host} is busy (held by {} pid {})",
                    info.holder, info.pid
                ),
                None => write!(f, "host {host} is busy"),
            },
            HaltReason::HostUnavailable { detail, .. } => f.write_str(detail),
            HaltReason::FailureThreshold {
                batch,
                failed,
                total,
                max_failure_ratio,
            } => write!(
                f,
                "batch {batch}: {failed}/{total} hosts failed (max failure ratio {max_failure_ratio})"
            ),
            HaltReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Outcome of one deployment issued by the rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub id: DeploymentId,
    pub host: HostId,
    pub kind: DeploymentKind,
    pub artifact: ArtifactId,
    pub outcome: DeploymentOutcome,
    #[serde(default)]
    pub rollback_failed: bool,
}

impl From<&Deployment> for DeploymentSummary {
    fn from(deployment: &Deployment) -> Self {
        Self {
            id: deployment.id.clone(),
            host: deployment.host.clone(),
            kind: deployment.kind,
            artifact: deployment.target.id.clone(),
            outcome: deployment.outcome,
            rollback_failed: deployment.is_rollback_failed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollout {
    pub id: RolloutId,
    pub artifact: ArtifactId,
    pub policy: BatchPolicy,
    pub max_failure_ratio: f64,
    pub batches: Vec<Batch>,
    pub status: RolloutStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt: Option<HaltReason>,
    #[serde(default)]
    pub deployments: Vec<DeploymentSummary>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Rollout {
    pub(crate) fn new(
        artifact: ArtifactId,
        policy: BatchPolicy,
        max_failure_ratio: f64,
        batches: Vec<Vec<HostId>>,
    ) -> Self {
        Self {
            id: RolloutId::generate("r"),
            artifact,
            policy,
            max_failure_ratio,
            batches: batches
                .into_iter()
                .enumerate()
                .map(|(index, hosts)| Batch::new(index, hosts))
                .collect(),
            status: RolloutStatus::InProgress,
            halt: None,
            deployments: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Every host selected for the rollout, in batch order.
    pub fn hosts(&self) -> impl Iterator<Item = &HostId> {
        self.batches.iter().flat_map(|b| b.hosts.iter())
    }

    /// Worst per-host outcome recorded so far; None before any deployment finishes.
    pub fn worst_outcome(&self) -> Option<DeploymentOutcome> {
        self.deployments
            .iter()
            .map(|d| d.outcome)
            .max_by_key(|outcome| outcome.severity())
    }

    /// Forward deployments only.
    pub fn forward(&self) -> impl Iterator<Item = &DeploymentSummary> {
        self.deployments
            .iter()
            .filter(|d| d.kind == DeploymentKind::Forward)
    }

    pub fn succeeded_hosts(&self) -> Vec<&HostId> {
        self.forward()
            .filter(|d| d.outcome == DeploymentOutcome::Succeeded)
            .map(|d| &d.host)
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}
