// ABOUTME: Error types for starting and tracking rollouts.
// ABOUTME: Per-host failures are outcomes, not errors; these reject a rollout up front.

use thiserror::Error;

use super::BatchPolicyError;
use crate::catalog::ArtifactNotFound;
use crate::registry::RegistryError;
use crate::types::{RolloutId, TagFilter};

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error(transparent)]
    ArtifactNotFound(#[from] ArtifactNotFound),

    #[error("no hosts match '{0}'")]
    NoMatchingHosts(TagFilter),

    #[error(transparent)]
    InvalidPolicy(#[from] BatchPolicyError),

    #[error("max failure ratio must be between 0 and 1, got {0}")]
    InvalidFailureRatio(f64),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("unknown rollout: {0}")]
    UnknownRollout(RolloutId),

    #[error("rollout task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
