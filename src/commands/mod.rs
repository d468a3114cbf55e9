// ABOUTME: Command module aggregator for the keel CLI.
// ABOUTME: Re-exports hosts, deploy, status, and cancel command handlers.

mod cancel;
mod deploy;
mod hosts;
mod status;

pub use cancel::cancel;
pub use deploy::{DeployArgs, deploy};
pub use hosts::hosts;
pub use status::status;

use keel::types::RolloutId;
use std::path::{Path, PathBuf};

/// File whose presence asks the process running a rollout to cancel it.
fn cancel_marker(state_dir: &Path, rollout: &RolloutId) -> PathBuf {
    state_dir.join(format!("cancel-{rollout}"))
}
