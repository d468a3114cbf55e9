// ABOUTME: Status command implementation.
// ABOUTME: Shows one rollout with its per-host phase results, or lists recent rollouts.

use keel::config::Config;
use keel::error::Result;
use keel::output::Output;
use keel::rollout::RolloutError;
use keel::types::RolloutId;

/// Rollouts listed when no id is given.
const RECENT: usize = 10;

pub fn status(config: Config, rollout: Option<RolloutId>, output: Output) -> Result<()> {
    let ledger = config.open_ledger()?;

    let Some(id) = rollout else {
        let rollouts = ledger.rollouts();
        if rollouts.is_empty() {
            output.success(&format!("No rollouts recorded for {}", config.application));
            return Ok(());
        }
        for rollout in rollouts.iter().take(RECENT) {
            if output.is_json() {
                output.record(rollout);
                continue;
            }
            output.success(&format!(
                "{}  {:<16} {:<18} {} host(s)  started {}",
                rollout.id,
                rollout.artifact,
                rollout.status.to_string(),
                rollout.hosts().count(),
                rollout.started_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        return Ok(());
    };

    let record = ledger
        .rollout(&id)
        .ok_or_else(|| RolloutError::UnknownRollout(id.clone()))?;
    let deployments = ledger.for_rollout(&id);

    if output.is_json() {
        output.record(&record);
        for deployment in &deployments {
            output.record(deployment);
        }
        return Ok(());
    }

    output.success(&format!(
        "Rollout {}: {} ({}, batch {}, max failure ratio {})",
        record.id, record.status, record.artifact, record.policy, record.max_failure_ratio
    ));
    if let Some(halt) = &record.halt {
        output.success(&format!("  halted: {halt}"));
    }

    for deployment in &deployments {
        output.success(&format!(
            "  {} {} {:?} -> {}: {}",
            deployment.id, deployment.host, deployment.kind, deployment.target.id, deployment.outcome
        ));
        if let Some(failure) = &deployment.failure {
            output.success(&format!("    failure: {failure}"));
        }
        for result in &deployment.phases {
            let rollback = if result.rollback { " [rollback]" } else { "" };
            output.success(&format!(
                "    {:>2} {:<16} {:<10} {:>8.1?}{}{}",
                result.sequence,
                result.phase.to_string(),
                result.outcome.to_string(),
                result.duration,
                result
                    .exit_code
                    .map(|c| format!(" exit {c}"))
                    .unwrap_or_default(),
                rollback
            ));
        }
    }

    for warning in &record.warnings {
        output.warning(&warning.message);
    }
    Ok(())
}
