// ABOUTME: Rollout coordinator: partitions hosts into batches and drives deployments.
// ABOUTME: Applies the failure threshold and reverts a fleet when a rollout is abandoned.

mod coordinator;
mod error;
mod policy;
mod record;

pub use coordinator::{Coordinator, RolloutHandle, RolloutRequest, RolloutSettings};
pub use error::RolloutError;
pub use policy::{BatchPolicy, BatchPolicyError};
pub use record::{
    Batch, BatchState, DeploymentSummary, HaltReason, Rollout, RolloutStatus,
};
