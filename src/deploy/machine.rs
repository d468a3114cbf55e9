// ABOUTME: Drives one deployment through the lifecycle phases on a leased host.
// ABOUTME: Halts on the first failed phase and replays the previous artifact when configured.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::{
    CancelToken, Deployment, DeploymentKind, DeploymentOutcome, DeploymentState, FailureKind,
    LifecyclePhase, Manifest, PHASE_ORDER,
};
use crate::catalog::ResolvedArtifact;
use crate::executor::{
    DEFAULT_OUTPUT_LIMIT, HookContext, HookExecutor, HookInvocation, PhaseOutcome, PhaseResult,
};
use crate::registry::{Host, HostLease, HostState};
use crate::types::RolloutId;

/// Knobs for a single deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploySettings {
    /// Replay the previous artifact when a phase fails.
    #[serde(default = "default_auto_rollback")]
    pub auto_rollback: bool,

    /// Attempts per hook when the host cannot run it at all.
    #[serde(default = "default_exec_attempts")]
    pub exec_attempts: u32,

    #[serde(default = "default_exec_backoff", with = "humantime_serde")]
    pub exec_backoff: Duration,

    /// Bytes kept per output stream.
    #[serde(default = "default_output_limit")]
    pub output_limit: usize,
}

fn default_auto_rollback() -> bool {
    true
}

fn default_exec_attempts() -> u32 {
    3
}

fn default_exec_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_output_limit() -> usize {
    DEFAULT_OUTPUT_LIMIT
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            auto_rollback: default_auto_rollback(),
            exec_attempts: default_exec_attempts(),
            exec_backoff: default_exec_backoff(),
            output_limit: default_output_limit(),
        }
    }
}

/// What one deployment should do.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub kind: DeploymentKind,
    pub rollout: Option<RolloutId>,
    pub target: ResolvedArtifact,
    /// Rollback target: the artifact the host was last healthy on.
    pub previous: Option<ResolvedArtifact>,
}

/// Runs deployments. One machine can serve many hosts concurrently; the
/// per-host exclusivity comes from the lease passed to `run`.
pub struct DeploymentMachine<E: ?Sized> {
    executor: Arc<E>,
    settings: DeploySettings,
    cancel: CancelToken,
}

impl<E: HookExecutor + ?Sized> DeploymentMachine<E> {
    pub fn new(executor: Arc<E>, settings: DeploySettings, cancel: CancelToken) -> Self {
        Self {
            executor,
            settings,
            cancel,
        }
    }

    /// Run the plan to a terminal outcome. Never fails: every problem ends up
    /// in the returned record.
    pub async fn run(&self, lease: &HostLease, plan: DeploymentPlan) -> Deployment {
        let host = lease.host();
        let mut deployment = Deployment::start(
            host.id.clone(),
            plan.kind,
            plan.rollout.clone(),
            plan.target.artifact.clone(),
            host.last_good.clone(),
        );
        let mut state = DeploymentState::Pending;

        tracing::info!(
            host = %host.id,
            deployment = %deployment.id,
            artifact = %plan.target.artifact.id,
            kind = ?plan.kind,
            "deployment started"
        );
        lease.set_state(HostState::Deploying);

        let context = HookContext {
            deployment: deployment.id.clone(),
            rollout: plan.rollout.clone(),
            host: host.id.clone(),
            artifact: plan.target.artifact.clone(),
            previous_artifact: host.last_good.as_ref().map(|a| a.id.clone()),
            rollback: false,
        };

        let mut failure = None;
        for phase in PHASE_ORDER {
            if self.cancel.is_cancelled() {
                failure = Some(FailureKind::Cancelled);
                break;
            }

            state = transition(state, DeploymentState::Phase(phase));
            let result = self
                .run_phase(&host, phase, &plan.target.manifest, &context)
                .await;
            let outcome = result.outcome;
            deployment.record(result, false);

            match outcome {
                PhaseOutcome::Succeeded => {}
                PhaseOutcome::Failed => {
                    failure = Some(FailureKind::PhaseFailed(phase));
                    break;
                }
                PhaseOutcome::TimedOut => {
                    failure = Some(FailureKind::PhaseTimedOut(phase));
                    break;
                }
            }
        }

        let Some(failure) = failure else {
            transition(state, DeploymentState::Succeeded);
            deployment.finish(DeploymentOutcome::Succeeded);
            lease.record_success(&plan.target.artifact);
            tracing::info!(host = %host.id, deployment = %deployment.id, "deployment succeeded");
            return deployment;
        };

        tracing::warn!(
            host = %host.id,
            deployment = %deployment.id,
            "deployment halted: {}",
            failure
        );
        deployment.failure = Some(failure);

        // A failed revert has nothing further to fall back to.
        if plan.kind == DeploymentKind::Revert {
            if let Some(phase) = failed_phase(failure) {
                deployment.rollback_failed = Some(phase);
            }
            return self.fail(lease, deployment, state);
        }

        let previous = match (&plan.previous, self.settings.auto_rollback) {
            (Some(previous), true) => previous,
            (previous, auto_rollback) => {
                if previous.is_none() && auto_rollback {
                    tracing::warn!(host = %host.id, "no previous artifact to roll back to");
                }
                if deployment.phases.is_empty() {
                    return self.abandon(lease, deployment, state, host.state);
                }
                return self.fail(lease, deployment, state);
            }
        };

        state = transition(state, DeploymentState::RollingBack);
        lease.set_state(HostState::RollingBack);
        tracing::info!(
            host = %host.id,
            deployment = %deployment.id,
            artifact = %previous.artifact.id,
            "rolling back"
        );

        let rollback_context = HookContext {
            artifact: previous.artifact.clone(),
            previous_artifact: Some(plan.target.artifact.id.clone()),
            rollback: true,
            ..context
        };

        // The replay always runs to completion; cancellation only stops
        // forward progress.
        for phase in PHASE_ORDER {
            let result = self
                .run_phase(&host, phase, &previous.manifest, &rollback_context)
                .await;
            let succeeded = result.succeeded();
            deployment.record(result, true);

            if !succeeded {
                tracing::error!(
                    host = %host.id,
                    deployment = %deployment.id,
                    %phase,
                    "rollback failed, operator intervention required"
                );
                deployment.rollback_failed = Some(phase);
                return self.fail(lease, deployment, state);
            }
        }

        transition(state, DeploymentState::RolledBack);
        deployment.finish(DeploymentOutcome::RolledBack);
        lease.set_state(HostState::Healthy);
        tracing::info!(host = %host.id, deployment = %deployment.id, "deployment rolled back");
        deployment
    }

    fn fail(
        &self,
        lease: &HostLease,
        mut deployment: Deployment,
        state: DeploymentState,
    ) -> Deployment {
        transition(state, DeploymentState::Failed);
        deployment.finish(DeploymentOutcome::Failed);
        lease.set_state(HostState::Failed);
        deployment
    }

    /// No hook ran, so the host keeps the state it had before the deployment.
    fn abandon(
        &self,
        lease: &HostLease,
        mut deployment: Deployment,
        state: DeploymentState,
        original: HostState,
    ) -> Deployment {
        transition(state, DeploymentState::Failed);
        deployment.finish(DeploymentOutcome::Failed);
        lease.set_state(original);
        tracing::info!(
            host = %lease.host_id(),
            deployment = %deployment.id,
            "deployment abandoned before any hook ran"
        );
        deployment
    }

    /// Run the hook for one phase, retrying when the host cannot run it.
    async fn run_phase(
        &self,
        host: &Host,
        phase: LifecyclePhase,
        manifest: &Manifest,
        context: &HookContext,
    ) -> PhaseResult {
        let Some(hook) = manifest.hook(phase) else {
            tracing::debug!(host = %host.id, %phase, "no hook configured");
            return PhaseResult::no_hook(phase);
        };

        let invocation = HookInvocation {
            phase,
            hook,
            context,
            output_limit: self.settings.output_limit,
        };

        let started_at = Utc::now();
        let attempts = self.settings.exec_attempts.max(1);
        let mut backoff = self.settings.exec_backoff;
        let mut attempt = 1;
        loop {
            match self.executor.run(host, invocation).await {
                Ok(result) => return result,
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        host = %host.id,
                        %phase,
                        attempt,
                        "hook execution unavailable, retrying in {:?}: {}",
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(host = %host.id, %phase, "hook execution unavailable: {}", e);
                    return PhaseResult::unavailable(
                        phase,
                        invocation.script_path(),
                        started_at,
                        &e.to_string(),
                    );
                }
            }
        }
    }
}

fn failed_phase(failure: FailureKind) -> Option<LifecyclePhase> {
    match failure {
        FailureKind::PhaseFailed(phase) | FailureKind::PhaseTimedOut(phase) => Some(phase),
        FailureKind::Cancelled => None,
    }
}

fn transition(from: DeploymentState, to: DeploymentState) -> DeploymentState {
    debug_assert!(
        from.can_transition_to(to),
        "invalid deployment transition {from} -> {to}"
    );
    tracing::trace!("deployment state {} -> {}", from, to);
    to
}
