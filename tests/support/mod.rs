// ABOUTME: Test support utilities.
// ABOUTME: Provides a scripted hook executor, fleet builders, and hook script helpers.

use async_trait::async_trait;
use chrono::Utc;
use keel::catalog::{Catalog, ResolvedArtifact};
use keel::deploy::{HookSpec, LifecyclePhase, Manifest, PHASE_ORDER};
use keel::executor::{ExecError, HookExecutor, HookInvocation, PhaseOutcome, PhaseResult};
use keel::ledger::Ledger;
use keel::registry::{Host, HostRegistry};
use keel::rollout::{Coordinator, RolloutSettings};
use keel::types::{Artifact, ArtifactId, ContentHash, HostId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for tests. Safe to call multiple times.
#[allow(dead_code)]
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::EnvFilter;
        let filter = EnvFilter::from_default_env().add_directive("keel=debug".parse().unwrap());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// One hook run seen by the scripted executor.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct HookRun {
    pub host: HostId,
    pub artifact: ArtifactId,
    pub phase: LifecyclePhase,
    pub rollback: bool,
    pub started: Instant,
    pub finished: Instant,
}

/// Executor with outcomes scripted per (host, artifact, phase). Unscripted
/// hooks succeed after `delay`.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedExecutor {
    outcomes: Mutex<HashMap<(HostId, ArtifactId, LifecyclePhase), PhaseOutcome>>,
    delay: Duration,
    runs: Mutex<Vec<HookRun>>,
}

#[allow(dead_code)]
impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail(&self, host: &str, artifact: &str, phase: LifecyclePhase) {
        self.script(host, artifact, phase, PhaseOutcome::Failed);
    }

    pub fn script(&self, host: &str, artifact: &str, phase: LifecyclePhase, outcome: PhaseOutcome) {
        self.outcomes
            .lock()
            .insert((HostId::new(host), ArtifactId::new(artifact), phase), outcome);
    }

    pub fn runs(&self) -> Vec<HookRun> {
        self.runs.lock().clone()
    }

    pub fn runs_on(&self, host: &str) -> Vec<HookRun> {
        self.runs()
            .into_iter()
            .filter(|r| r.host.as_str() == host)
            .collect()
    }
}

#[async_trait]
impl HookExecutor for ScriptedExecutor {
    async fn run(
        &self,
        host: &Host,
        invocation: HookInvocation<'_>,
    ) -> Result<PhaseResult, ExecError> {
        let started = Instant::now();
        let started_at = Utc::now();
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let artifact = invocation.context.artifact.id.clone();
        let outcome = self
            .outcomes
            .lock()
            .get(&(host.id.clone(), artifact.clone(), invocation.phase))
            .copied()
            .unwrap_or(PhaseOutcome::Succeeded);

        self.runs.lock().push(HookRun {
            host: host.id.clone(),
            artifact,
            phase: invocation.phase,
            rollback: invocation.context.rollback,
            started,
            finished: Instant::now(),
        });

        Ok(PhaseResult {
            sequence: 0,
            phase: invocation.phase,
            hook: Some(invocation.script_path()),
            rollback: false,
            started_at,
            duration: started.elapsed(),
            outcome,
            exit_code: match outcome {
                PhaseOutcome::Succeeded => Some(0),
                PhaseOutcome::Failed => Some(1),
                PhaseOutcome::TimedOut => None,
            },
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
        })
    }
}

/// Manifest with a hook for every phase.
#[allow(dead_code)]
pub fn full_manifest() -> Manifest {
    PHASE_ORDER.iter().fold(Manifest::default(), |manifest, phase| {
        manifest.with_hook(*phase, HookSpec::new(format!("hooks/{phase}.sh")))
    })
}

#[allow(dead_code)]
pub fn artifact(id: &str) -> Artifact {
    Artifact::new(
        ArtifactId::new(id),
        ContentHash::parse("sha256:0123abcd").unwrap(),
        format!("/srv/releases/{id}"),
    )
}

#[allow(dead_code)]
pub fn resolved(id: &str) -> ResolvedArtifact {
    ResolvedArtifact {
        artifact: artifact(id),
        manifest: full_manifest(),
    }
}

#[allow(dead_code)]
pub fn catalog(ids: &[&str]) -> Catalog {
    ids.iter()
        .fold(Catalog::new(), |catalog, id| catalog.with(artifact(id), full_manifest()))
}

/// Local host, optionally already running an artifact.
#[allow(dead_code)]
pub fn host(id: &str, last_good: Option<&str>) -> Host {
    let host = Host::local(HostId::new(id)).with_tag("role", "web");
    match last_good {
        Some(a) => host.with_last_good(artifact(a)),
        None => host,
    }
}

/// Settings with short backoffs so retry paths stay fast.
#[allow(dead_code)]
pub fn fast_settings() -> RolloutSettings {
    let mut settings = RolloutSettings::default();
    settings.lease_attempts = 2;
    settings.lease_backoff = Duration::from_millis(10);
    settings.deploy.exec_backoff = Duration::from_millis(1);
    settings
}

/// Coordinator over the given hosts and artifacts with an in-memory ledger.
#[allow(dead_code)]
pub fn coordinator(
    hosts: Vec<Host>,
    artifacts: &[&str],
    executor: Arc<ScriptedExecutor>,
    settings: RolloutSettings,
) -> Arc<Coordinator> {
    let registry = Arc::new(HostRegistry::with_hosts(hosts).unwrap());
    Arc::new(Coordinator::new(
        registry,
        Arc::new(Ledger::in_memory()),
        executor,
        Arc::new(catalog(artifacts)),
        settings,
    ))
}

/// Write an executable shell script.
#[allow(dead_code)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}
