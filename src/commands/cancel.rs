// ABOUTME: Cancel command implementation.
// ABOUTME: Drops a marker file that the process running the rollout polls for.

use keel::config::Config;
use keel::error::{Error, Result};
use keel::output::Output;
use keel::rollout::RolloutError;
use keel::types::RolloutId;

use super::cancel_marker;

pub fn cancel(config: Config, rollout: RolloutId, output: Output) -> Result<()> {
    let ledger = config.open_ledger()?;

    let record = ledger
        .rollout(&rollout)
        .ok_or_else(|| RolloutError::UnknownRollout(rollout.clone()))?;
    if record.is_finished() {
        return Err(Error::RolloutNotRunning(rollout));
    }

    let marker = cancel_marker(&config.state_dir(), &rollout);
    std::fs::write(&marker, b"")?;
    tracing::debug!(marker = %marker.display(), "wrote cancel marker");

    output.success(&format!(
        "Cancellation requested for {rollout}; running batches finish, then the rollout reverts"
    ));
    Ok(())
}
