// ABOUTME: Runs rollouts batch by batch with all-or-nothing leasing per batch.
// ABOUTME: Tracks live rollouts for status and cancellation, and records them in the ledger.

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{
    BatchPolicy, BatchState, DeploymentSummary, HaltReason, Rollout, RolloutError, RolloutStatus,
};
use crate::catalog::{ArtifactSource, ResolvedArtifact};
use crate::deploy::{
    CancelToken, DeploySettings, Deployment, DeploymentKind, DeploymentMachine, DeploymentOutcome,
    DeploymentPlan,
};
use crate::diagnostics::{Diagnostics, Warning};
use crate::executor::HookExecutor;
use crate::ledger::Ledger;
use crate::registry::{Host, HostLease, HostRegistry, RegistryError};
use crate::types::{Artifact, ArtifactId, HostId, RolloutId, TagFilter};

/// Rollout-wide knobs, usually loaded from the fleet file.
#[derive(Debug, Clone, Deserialize)]
pub struct RolloutSettings {
    #[serde(default)]
    pub batch: BatchPolicy,

    /// Fraction of a batch allowed to fail before the rollout is abandoned.
    #[serde(default)]
    pub max_failure_ratio: f64,

    /// Attempts to lease a whole batch before aborting.
    #[serde(default = "default_lease_attempts")]
    pub lease_attempts: u32,

    #[serde(default = "default_lease_backoff", with = "humantime_serde")]
    pub lease_backoff: Duration,

    #[serde(flatten)]
    pub deploy: DeploySettings,
}

fn default_lease_attempts() -> u32 {
    3
}

fn default_lease_backoff() -> Duration {
    Duration::from_millis(500)
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            batch: BatchPolicy::default(),
            max_failure_ratio: 0.0,
            lease_attempts: default_lease_attempts(),
            lease_backoff: default_lease_backoff(),
            deploy: DeploySettings::default(),
        }
    }
}

/// What to roll out and where. Unset fields fall back to the coordinator's settings.
#[derive(Debug, Clone)]
pub struct RolloutRequest {
    pub artifact: ArtifactId,
    pub hosts: TagFilter,
    pub policy: Option<BatchPolicy>,
    pub max_failure_ratio: Option<f64>,
    pub auto_rollback: Option<bool>,
}

impl RolloutRequest {
    pub fn new(artifact: ArtifactId) -> Self {
        Self {
            artifact,
            hosts: TagFilter::any(),
            policy: None,
            max_failure_ratio: None,
            auto_rollback: None,
        }
    }

    pub fn hosts(mut self, filter: TagFilter) -> Self {
        self.hosts = filter;
        self
    }

    pub fn policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn max_failure_ratio(mut self, ratio: f64) -> Self {
        self.max_failure_ratio = Some(ratio);
        self
    }

    pub fn auto_rollback(mut self, enabled: bool) -> Self {
        self.auto_rollback = Some(enabled);
        self
    }
}

/// A launched rollout.
#[derive(Debug)]
pub struct RolloutHandle {
    id: RolloutId,
    cancel: CancelToken,
    task: JoinHandle<Rollout>,
}

impl RolloutHandle {
    pub fn id(&self) -> &RolloutId {
        &self.id
    }

    /// Stop dispatching new phases and batches; the rollout then reverts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Wait for the rollout to reach a terminal status.
    pub async fn wait(self) -> Result<Rollout, RolloutError> {
        Ok(self.task.await?)
    }
}

struct Active {
    cancel: CancelToken,
    snapshot: Arc<Mutex<Rollout>>,
}

/// Everything a running rollout needs, fixed before its task starts.
struct Prepared {
    snapshot: Arc<Mutex<Rollout>>,
    target: ResolvedArtifact,
    hosts: Vec<Host>,
    policy: BatchPolicy,
    max_failure_ratio: f64,
    settings: DeploySettings,
    cancel: CancelToken,
}

/// Drives rollouts over the registry's hosts.
pub struct Coordinator {
    registry: Arc<HostRegistry>,
    ledger: Arc<Ledger>,
    executor: Arc<dyn HookExecutor>,
    artifacts: Arc<dyn ArtifactSource>,
    settings: RolloutSettings,
    active: Mutex<HashMap<RolloutId, Active>>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<HostRegistry>,
        ledger: Arc<Ledger>,
        executor: Arc<dyn HookExecutor>,
        artifacts: Arc<dyn ArtifactSource>,
        settings: RolloutSettings,
    ) -> Self {
        Self {
            registry,
            ledger,
            executor,
            artifacts,
            settings,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Run a rollout to completion.
    pub async fn start(self: &Arc<Self>, request: RolloutRequest) -> Result<Rollout, RolloutError> {
        self.launch(request).await?.wait().await
    }

    /// Validate a request and start it in the background.
    ///
    /// # Errors
    ///
    /// `ArtifactNotFound`, `NoMatchingHosts`, or `InvalidFailureRatio`; nothing
    /// has been deployed when these are returned.
    pub async fn launch(
        self: &Arc<Self>,
        request: RolloutRequest,
    ) -> Result<RolloutHandle, RolloutError> {
        let max_failure_ratio = request
            .max_failure_ratio
            .unwrap_or(self.settings.max_failure_ratio);
        if !(0.0..=1.0).contains(&max_failure_ratio) {
            return Err(RolloutError::InvalidFailureRatio(max_failure_ratio));
        }

        let target = self.artifacts.resolve(&request.artifact).await?;

        let hosts = self.registry.list_by_tag(&request.hosts);
        if hosts.is_empty() {
            return Err(RolloutError::NoMatchingHosts(request.hosts));
        }

        let policy = request.policy.unwrap_or(self.settings.batch);
        let ids: Vec<HostId> = hosts.iter().map(|h| h.id.clone()).collect();
        let rollout = Rollout::new(
            target.artifact.id.clone(),
            policy,
            max_failure_ratio,
            policy.partition(&ids),
        );
        let id = rollout.id.clone();

        let mut settings = self.settings.deploy.clone();
        if let Some(enabled) = request.auto_rollback {
            settings.auto_rollback = enabled;
        }

        let cancel = CancelToken::new();
        let snapshot = Arc::new(Mutex::new(rollout));
        self.active.lock().insert(
            id.clone(),
            Active {
                cancel: cancel.clone(),
                snapshot: Arc::clone(&snapshot),
            },
        );

        tracing::info!(
            rollout = %id,
            artifact = %target.artifact.id,
            hosts = ids.len(),
            %policy,
            "rollout started"
        );

        let prepared = Prepared {
            snapshot,
            target,
            hosts,
            policy,
            max_failure_ratio,
            settings,
            cancel: cancel.clone(),
        };
        let coordinator = Arc::clone(self);
        let task = tokio::spawn(async move {
            let rollout = coordinator.execute(prepared).await;
            coordinator.active.lock().remove(&rollout.id);
            rollout
        });

        Ok(RolloutHandle { id, cancel, task })
    }

    /// Latest view of a rollout, live or recorded.
    pub fn status(&self, id: &RolloutId) -> Option<Rollout> {
        if let Some(active) = self.active.lock().get(id) {
            return Some(active.snapshot.lock().clone());
        }
        self.ledger.rollout(id)
    }

    /// Request cancellation of a running rollout.
    pub fn cancel(&self, id: &RolloutId) -> Result<(), RolloutError> {
        match self.active.lock().get(id) {
            Some(active) => {
                tracing::info!(rollout = %id, "cancellation requested");
                active.cancel.cancel();
                Ok(())
            }
            None => Err(RolloutError::UnknownRollout(id.clone())),
        }
    }

    async fn execute(&self, prepared: Prepared) -> Rollout {
        let Prepared {
            snapshot,
            target,
            hosts,
            policy,
            max_failure_ratio,
            settings,
            cancel,
        } = prepared;

        let rollout_id = snapshot.lock().id.clone();
        let batches = {
            let ids: Vec<HostId> = hosts.iter().map(|h| h.id.clone()).collect();
            policy.partition(&ids)
        };
        // What each host ran before this rollout touched it.
        let baseline: HashMap<HostId, Option<Artifact>> = hosts
            .into_iter()
            .map(|h| (h.id, h.last_good))
            .collect();

        let machine = Arc::new(DeploymentMachine::new(
            Arc::clone(&self.executor),
            settings.clone(),
            cancel.clone(),
        ));
        let mut diagnostics = Diagnostics::default();
        let mut halt = None;
        self.checkpoint(&snapshot, &mut diagnostics);

        for (index, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                halt = Some(HaltReason::Cancelled);
                break;
            }

            set_batch_state(&snapshot, index, BatchState::Leasing);
            let leases = match self.lease_batch(batch, &mut diagnostics).await {
                Ok(leases) => leases,
                Err(err) => {
                    tracing::error!(rollout = %rollout_id, batch = index, "{}", err);
                    set_batch_state(&snapshot, index, BatchState::Aborted);
                    halt = Some(halt_for_lease_error(err));
                    break;
                }
            };

            set_batch_state(&snapshot, index, BatchState::Running);
            tracing::info!(rollout = %rollout_id, batch = index, hosts = batch.len(), "batch started");

            let mut tasks = Vec::with_capacity(leases.len());
            for lease in leases {
                let plan = DeploymentPlan {
                    kind: DeploymentKind::Forward,
                    rollout: Some(rollout_id.clone()),
                    target: target.clone(),
                    previous: self.rollback_target(&lease.host()).await,
                };
                let machine = Arc::clone(&machine);
                let host = lease.host_id().clone();
                tasks.push((
                    host,
                    tokio::spawn(async move { machine.run(&lease, plan).await }),
                ));
            }

            let (hosts, handles): (Vec<HostId>, Vec<_>) = tasks.into_iter().unzip();
            let results = join_all(handles).await;

            let mut failed = 0;
            for (host, result) in hosts.into_iter().zip(results) {
                let outcome = match result {
                    Ok(deployment) => {
                        let outcome = deployment.outcome;
                        self.finish_deployment(&snapshot, deployment, &mut diagnostics);
                        outcome
                    }
                    Err(err) => {
                        tracing::error!(%host, "deployment task failed: {}", err);
                        DeploymentOutcome::Failed
                    }
                };

                let mut rollout = snapshot.lock();
                let Some(record) = rollout.batches.get_mut(index) else {
                    continue;
                };
                match outcome {
                    DeploymentOutcome::Succeeded => record.succeeded.push(host),
                    DeploymentOutcome::RolledBack => {
                        failed += 1;
                        record.rolled_back.push(host);
                    }
                    DeploymentOutcome::Failed | DeploymentOutcome::Pending => {
                        failed += 1;
                        record.failed.push(host);
                    }
                }
            }

            set_batch_state(&snapshot, index, BatchState::Completed);
            self.checkpoint(&snapshot, &mut diagnostics);
            tracing::info!(
                rollout = %rollout_id,
                batch = index,
                failed,
                total = batch.len(),
                "batch finished"
            );

            if cancel.is_cancelled() {
                halt = Some(HaltReason::Cancelled);
                break;
            }
            if failed as f64 / batch.len() as f64 > max_failure_ratio {
                halt = Some(HaltReason::FailureThreshold {
                    batch: index,
                    failed,
                    total: batch.len(),
                    max_failure_ratio,
                });
                break;
            }
        }

        if halt.is_none() && cancel.is_cancelled() {
            halt = Some(HaltReason::Cancelled);
        }

        {
            let mut rollout = snapshot.lock();
            for batch in &mut rollout.batches {
                if batch.state == BatchState::Pending {
                    batch.state = BatchState::Skipped;
                }
            }
            rollout.halt = halt.clone();
        }

        let revert = matches!(
            halt,
            Some(HaltReason::FailureThreshold { .. } | HaltReason::Cancelled)
        );
        if revert {
            if let Some(reason) = &halt {
                tracing::warn!(rollout = %rollout_id, "rollout halted: {}", reason);
            }
            if settings.auto_rollback {
                self.revert_fleet(&snapshot, &target, &baseline, settings, &mut diagnostics)
                    .await;
            }
        }

        let mut rollout = {
            let mut rollout = snapshot.lock();
            rollout.status = final_status(&rollout, &target.artifact.id, &baseline);
            rollout.finished_at = Some(chrono::Utc::now());
            rollout.warnings.extend(diagnostics.into_warnings());
            rollout.clone()
        };

        if let Err(err) = self.ledger.record_rollout(&rollout) {
            tracing::error!(rollout = %rollout.id, "failed to record rollout: {}", err);
            rollout
                .warnings
                .push(Warning::ledger_write(format!("failed to record rollout: {err}")));
        }

        tracing::info!(rollout = %rollout.id, status = %rollout.status, "rollout finished");
        rollout
    }

    /// Lease every host of a batch or none of them.
    async fn lease_batch(
        &self,
        batch: &[HostId],
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<HostLease>, RegistryError> {
        let attempts = self.settings.lease_attempts.max(1);
        let mut backoff = self.settings.lease_backoff;
        let mut attempt = 1;

        loop {
            let mut leases = Vec::with_capacity(batch.len());
            let mut busy = None;
            for id in batch {
                match self.registry.try_acquire(id) {
                    Ok(lease) => leases.push(lease),
                    Err(err) if err.is_busy() => {
                        busy = Some(err);
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }

            let Some(err) = busy else {
                return Ok(leases);
            };
            drop(leases);

            if attempt >= attempts {
                return Err(err);
            }
            if let RegistryError::HostBusy { host, .. } = &err {
                diagnostics.warn(Warning::lease_contention(
                    host.clone(),
                    format!("{err}; retrying batch in {backoff:?}"),
                ));
            }
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
            attempt += 1;
        }
    }

    /// Resolve the artifact a host would roll back to.
    async fn rollback_target(&self, host: &Host) -> Option<ResolvedArtifact> {
        let last_good = host.last_good.as_ref()?;
        match self.artifacts.resolve(&last_good.id).await {
            Ok(resolved) => Some(resolved),
            Err(err) => {
                tracing::warn!(host = %host.id, "rollback unavailable: {}", err);
                None
            }
        }
    }

    fn finish_deployment(
        &self,
        snapshot: &Mutex<Rollout>,
        deployment: Deployment,
        diagnostics: &mut Diagnostics,
    ) {
        if let Some(phase) = deployment.rollback_failed {
            diagnostics.warn(Warning::rollback_failed(
                deployment.host.clone(),
                format!(
                    "deployment {} could not restore the host at {phase}; operator intervention required",
                    deployment.id
                ),
            ));
        }
        snapshot
            .lock()
            .deployments
            .push(DeploymentSummary::from(&deployment));
        if let Err(err) = self.ledger.append(deployment) {
            diagnostics.warn(Warning::ledger_write(format!(
                "failed to record deployment: {err}"
            )));
        }
    }

    fn checkpoint(&self, snapshot: &Mutex<Rollout>, diagnostics: &mut Diagnostics) {
        let rollout = snapshot.lock().clone();
        if let Err(err) = self.ledger.record_rollout(&rollout) {
            diagnostics.warn(Warning::ledger_write(format!(
                "failed to record rollout progress: {err}"
            )));
        }
    }

    /// Put every host the rollout moved back on its pre-rollout artifact.
    async fn revert_fleet(
        &self,
        snapshot: &Mutex<Rollout>,
        target: &ResolvedArtifact,
        baseline: &HashMap<HostId, Option<Artifact>>,
        settings: DeploySettings,
        diagnostics: &mut Diagnostics,
    ) {
        let (rollout_id, succeeded): (RolloutId, Vec<HostId>) = {
            let rollout = snapshot.lock();
            (
                rollout.id.clone(),
                rollout.succeeded_hosts().into_iter().cloned().collect(),
            )
        };

        let mut reverts = Vec::new();
        for host in succeeded {
            let Some(Some(before)) = baseline.get(&host) else {
                diagnostics.warn(Warning::revert_skipped(
                    host.clone(),
                    format!(
                        "host {host} had no artifact before the rollout; left on {}",
                        target.artifact.id
                    ),
                ));
                continue;
            };
            if before.id == target.artifact.id {
                continue;
            }
            match self.artifacts.resolve(&before.id).await {
                Ok(resolved) => reverts.push((host, resolved)),
                Err(err) => diagnostics.warn(Warning::revert_skipped(host, err.to_string())),
            }
        }

        if reverts.is_empty() {
            return;
        }

        tracing::info!(rollout = %rollout_id, hosts = reverts.len(), "reverting fleet");

        let hosts: Vec<HostId> = reverts.iter().map(|(h, _)| h.clone()).collect();
        let leases = match self.lease_batch(&hosts, diagnostics).await {
            Ok(leases) => leases,
            Err(err) => {
                for host in hosts {
                    diagnostics.warn(Warning::rollback_failed(
                        host,
                        format!("could not lease host for revert: {err}"),
                    ));
                }
                return;
            }
        };

        // Reverts run to completion even when the rollout was cancelled.
        let machine = Arc::new(DeploymentMachine::new(
            Arc::clone(&self.executor),
            settings,
            CancelToken::new(),
        ));
        let mut handles = Vec::with_capacity(reverts.len());
        for ((_, before), lease) in reverts.into_iter().zip(leases) {
            let plan = DeploymentPlan {
                kind: DeploymentKind::Revert,
                rollout: Some(rollout_id.clone()),
                target: before,
                previous: Some(target.clone()),
            };
            let machine = Arc::clone(&machine);
            handles.push(tokio::spawn(async move { machine.run(&lease, plan).await }));
        }

        for result in join_all(handles).await {
            match result {
                Ok(deployment) => self.finish_deployment(snapshot, deployment, diagnostics),
                Err(err) => tracing::error!(rollout = %rollout_id, "revert task failed: {}", err),
            }
        }
    }
}

fn set_batch_state(snapshot: &Mutex<Rollout>, index: usize, state: BatchState) {
    if let Some(batch) = snapshot.lock().batches.get_mut(index) {
        batch.state = state;
    }
}

/// Why a batch that could not take its leases stops the rollout.
fn halt_for_lease_error(err: RegistryError) -> HaltReason {
    let detail = err.to_string();
    match err {
        RegistryError::HostBusy { host, holder } => HaltReason::HostBusy { host, holder },
        RegistryError::HostNotFound(host)
        | RegistryError::AlreadyRegistered(host)
        | RegistryError::Lock { host, .. } => HaltReason::HostUnavailable { host, detail },
    }
}

/// Final status from the recorded deployments.
///
/// A failure-threshold halt always leaves failed or rolled-back hosts behind, so
/// it is a partial failure. Only a cancelled rollout that put every touched host
/// back on its pre-rollout artifact counts as rolled back.
fn final_status(
    rollout: &Rollout,
    target: &ArtifactId,
    baseline: &HashMap<HostId, Option<Artifact>>,
) -> RolloutStatus {
    match rollout.halt {
        Some(HaltReason::HostBusy { .. } | HaltReason::HostUnavailable { .. }) => {
            RolloutStatus::Aborted
        }
        None => {
            let all_succeeded = rollout.hosts().all(|host| {
                outcome_of(rollout, host, DeploymentKind::Forward)
                    == Some(DeploymentOutcome::Succeeded)
            });
            if all_succeeded {
                RolloutStatus::Completed
            } else {
                RolloutStatus::PartiallyFailed
            }
        }
        Some(HaltReason::FailureThreshold { .. }) => RolloutStatus::PartiallyFailed,
        Some(HaltReason::Cancelled) => {
            let restored = rollout.forward().all(|forward| {
                let before = baseline.get(&forward.host).cloned().flatten();
                match forward.outcome {
                    DeploymentOutcome::RolledBack => true,
                    DeploymentOutcome::Succeeded => {
                        before.is_some_and(|a| &a.id == target)
                            || outcome_of(rollout, &forward.host, DeploymentKind::Revert)
                                == Some(DeploymentOutcome::Succeeded)
                    }
                    DeploymentOutcome::Failed | DeploymentOutcome::Pending => false,
                }
            });
            if restored {
                RolloutStatus::RolledBack
            } else {
                RolloutStatus::PartiallyFailed
            }
        }
    }
}

fn outcome_of(rollout: &Rollout, host: &HostId, kind: DeploymentKind) -> Option<DeploymentOutcome> {
    rollout
        .deployments
        .iter()
        .rev()
        .find(|d| &d.host == host && d.kind == kind)
        .map(|d| d.outcome)
}
