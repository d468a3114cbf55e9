// ABOUTME: Per-host deployment state machine driving the fixed lifecycle phase order.
// ABOUTME: Exports phases, manifests, deployment records, and the machine that runs them.

mod cancel;
mod deployment;
mod machine;
mod manifest;
mod phase;
mod state;

pub use cancel::CancelToken;
pub use deployment::{Deployment, DeploymentKind, DeploymentOutcome, FailureKind};
pub use machine::{DeploySettings, DeploymentMachine, DeploymentPlan};
pub use manifest::{DEFAULT_HOOK_TIMEOUT, HookSpec, Manifest, ManifestError};
pub use phase::{LifecyclePhase, PHASE_ORDER};
pub use state::DeploymentState;
