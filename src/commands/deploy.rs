// ABOUTME: Deploy command implementation.
// ABOUTME: Wires the fleet file into a coordinator, runs one rollout, and reports it.

use keel::config::Config;
use keel::deploy::{CancelToken, DeploymentKind, DeploymentOutcome};
use keel::error::Result;
use keel::executor::FleetExecutor;
use keel::output::Output;
use keel::rollout::{BatchPolicy, Coordinator, Rollout, RolloutRequest, RolloutStatus};
use keel::types::{ArtifactId, TagFilter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::cancel_marker;

const CANCEL_POLL: Duration = Duration::from_millis(500);

pub struct DeployArgs {
    pub artifact: ArtifactId,
    pub tags: Option<TagFilter>,
    pub batch: Option<BatchPolicy>,
    pub max_failure_ratio: Option<f64>,
    pub no_rollback: bool,
}

/// Run a rollout and return the process exit code for its outcome.
pub async fn deploy(config: Config, args: DeployArgs, mut output: Output) -> Result<i32> {
    output.start_timer();

    let ledger = Arc::new(config.open_ledger()?);
    let registry = Arc::new(config.registry(&ledger)?);
    let catalog = Arc::new(config.catalog()?);
    let coordinator = Arc::new(Coordinator::new(
        registry,
        ledger,
        Arc::new(FleetExecutor::new()),
        catalog,
        config.rollout.clone(),
    ));

    let mut request =
        RolloutRequest::new(args.artifact.clone()).hosts(args.tags.unwrap_or_else(TagFilter::any));
    if let Some(policy) = args.batch {
        request = request.policy(policy);
    }
    if let Some(ratio) = args.max_failure_ratio {
        request = request.max_failure_ratio(ratio);
    }
    if args.no_rollback {
        request = request.auto_rollback(false);
    }

    let handle = coordinator.launch(request).await?;
    output.progress(&format!(
        "Rolling out {} to {} ({})",
        args.artifact,
        config.application,
        handle.id()
    ));

    let marker = cancel_marker(&config.state_dir(), handle.id());
    let watcher = tokio::spawn(watch_for_cancel(handle.cancel_token(), marker.clone()));

    let rollout = handle.wait().await?;
    watcher.abort();
    if let Err(e) = std::fs::remove_file(&marker)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        output.warning(&format!("failed to remove {}: {}", marker.display(), e));
    }

    report(&rollout, &output);
    Ok(exit_code(&rollout))
}

/// Cancel on Ctrl-C or when `keel cancel` drops the marker file.
async fn watch_for_cancel(cancel: CancelToken, marker: PathBuf) {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut signals = true;
    let mut poll = tokio::time::interval(CANCEL_POLL);

    loop {
        tokio::select! {
            result = &mut ctrl_c, if signals => match result {
                Ok(()) => {
                    eprintln!("Cancelling rollout; waiting for in-flight hooks...");
                    cancel.cancel();
                    return;
                }
                Err(e) => {
                    tracing::warn!("cannot listen for Ctrl-C: {}", e);
                    signals = false;
                }
            },
            _ = poll.tick() => {
                if marker.exists() {
                    tracing::info!("cancel marker found");
                    cancel.cancel();
                    return;
                }
            }
        }
    }
}

/// 0 when every host succeeded, 2 when the rollout aborted or no host
/// succeeded, 1 for anything in between.
pub fn exit_code(rollout: &Rollout) -> i32 {
    match rollout.status {
        RolloutStatus::Completed => 0,
        RolloutStatus::Aborted => 2,
        _ if rollout.succeeded_hosts().is_empty() => 2,
        _ => 1,
    }
}

fn report(rollout: &Rollout, output: &Output) {
    if output.is_json() {
        output.record(rollout);
        return;
    }

    for batch in &rollout.batches {
        output.progress(&format!(
            "  batch {}: {:?} ({} succeeded, {} failed, {} rolled back of {})",
            batch.index,
            batch.state,
            batch.succeeded.len(),
            batch.failed.len(),
            batch.rolled_back.len(),
            batch.hosts.len()
        ));
    }
    for deployment in &rollout.deployments {
        let marker = match deployment.outcome {
            DeploymentOutcome::Succeeded => "✓",
            _ => "✗",
        };
        let kind = match deployment.kind {
            DeploymentKind::Forward => "",
            DeploymentKind::Revert => " (revert)",
        };
        output.progress(&format!(
            "  {marker} {} {}{kind}: {}",
            deployment.host, deployment.artifact, deployment.outcome
        ));
    }

    for warning in &rollout.warnings {
        output.warning(&warning.message);
    }
    if let Some(halt) = &rollout.halt {
        output.warning(&format!("rollout halted: {halt}"));
    }

    let summary = format!("Rollout {} {}", rollout.id, rollout.status);
    match rollout.status {
        RolloutStatus::Completed => output.success(&summary),
        _ => output.error(&summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel::types::HostId;

    fn rollout(status: RolloutStatus) -> Rollout {
        let json = serde_json::json!({
            "id": "r-1",
            "artifact": "v2",
            "policy": "all",
            "max_failure_ratio": 0.0,
            "batches": [],
            "status": status,
            "started_at": "2026-01-01T00:00:00Z",
            "finished_at": null,
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn completed_rollout_exits_zero() {
        assert_eq!(exit_code(&rollout(RolloutStatus::Completed)), 0);
    }

    #[test]
    fn aborted_or_nothing_succeeded_exits_two() {
        assert_eq!(exit_code(&rollout(RolloutStatus::Aborted)), 2);
        assert_eq!(exit_code(&rollout(RolloutStatus::PartiallyFailed)), 2);
    }

    #[test]
    fn partial_success_exits_one() {
        let mut partial = rollout(RolloutStatus::PartiallyFailed);
        partial.deployments.push(keel::rollout::DeploymentSummary {
            id: keel::types::DeploymentId::new("d-1"),
            host: HostId::new("web-1"),
            kind: DeploymentKind::Forward,
            artifact: ArtifactId::new("v2"),
            outcome: DeploymentOutcome::Succeeded,
            rollback_failed: false,
        });
        assert_eq!(exit_code(&partial), 1);
    }
}
