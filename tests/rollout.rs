// ABOUTME: Integration tests for the rollout coordinator.
// ABOUTME: Covers batch ordering, failure thresholds, fleet reverts, lease contention, and cancellation.

mod support;

use keel::deploy::{DeploymentKind, DeploymentOutcome, LifecyclePhase, PHASE_ORDER};
use keel::diagnostics::WarningKind;
use keel::executor::PhaseOutcome;
use keel::registry::HostState;
use keel::rollout::{
    BatchPolicy, BatchState, HaltReason, RolloutError, RolloutRequest, RolloutStatus,
};
use keel::types::{ArtifactId, HostId, TagFilter};
use std::sync::Arc;
use std::time::Duration;
use support::{ScriptedExecutor, coordinator, fast_settings, host};

fn id(s: &str) -> HostId {
    HostId::new(s)
}

#[tokio::test]
async fn all_hosts_succeed_and_record_last_good() {
    support::init_tracing();
    let executor = Arc::new(ScriptedExecutor::new());
    let coordinator = coordinator(
        vec![host("web-1", Some("v1")), host("web-2", None)],
        &["v1", "v2"],
        Arc::clone(&executor),
        fast_settings(),
    );

    let rollout = coordinator
        .start(RolloutRequest::new(ArtifactId::new("v2")))
        .await
        .unwrap();

    assert_eq!(rollout.status, RolloutStatus::Completed);
    assert_eq!(rollout.worst_outcome(), Some(DeploymentOutcome::Succeeded));
    for name in ["web-1", "web-2"] {
        let host = coordinator.registry().get(&id(name)).unwrap();
        assert_eq!(host.state, HostState::Healthy);
        assert_eq!(host.last_good.unwrap().id.as_str(), "v2");

        let history = coordinator.ledger().history(&id(name));
        assert_eq!(history.len(), 1);
        let phases: Vec<_> = history[0].phases.iter().map(|r| r.phase).collect();
        assert_eq!(phases, PHASE_ORDER);
        assert!(history[0].phases.iter().all(|r| r.succeeded()));
    }
    assert_eq!(coordinator.status(&rollout.id).unwrap().status, RolloutStatus::Completed);
}

#[tokio::test]
async fn fixed_batches_never_overlap() {
    let executor = Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(20)));
    let hosts = ["a", "b", "c", "d"]
        .into_iter()
        .map(|name| host(name, None))
        .collect();
    let coordinator = coordinator(hosts, &["v1"], Arc::clone(&executor), fast_settings());

    let rollout = coordinator
        .start(RolloutRequest::new(ArtifactId::new("v1")).policy(BatchPolicy::FixedBatchSize(2)))
        .await
        .unwrap();

    assert_eq!(rollout.status, RolloutStatus::Completed);
    assert_eq!(rollout.batches.len(), 2);
    assert_eq!(rollout.batches[0].hosts, vec![id("a"), id("b")]);
    assert_eq!(rollout.batches[1].hosts, vec![id("c"), id("d")]);

    let runs = executor.runs();
    let first_batch_done = runs
        .iter()
        .filter(|r| r.host == id("a") || r.host == id("b"))
        .map(|r| r.finished)
        .max()
        .unwrap();
    let second_batch_start = runs
        .iter()
        .filter(|r| r.host == id("c") || r.host == id("d"))
        .map(|r| r.started)
        .min()
        .unwrap();
    assert!(second_batch_start >= first_batch_done);
}

#[tokio::test]
async fn failed_validation_rolls_back_only_that_host() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.fail("h2", "a1", LifecyclePhase::ValidateService);
    let coordinator = coordinator(
        vec![host("h1", Some("a0")), host("h2", Some("a0"))],
        &["a0", "a1"],
        Arc::clone(&executor),
        fast_settings(),
    );

    let rollout = coordinator
        .start(RolloutRequest::new(ArtifactId::new("a1")).max_failure_ratio(0.5))
        .await
        .unwrap();

    assert_eq!(rollout.status, RolloutStatus::PartiallyFailed);
    assert!(rollout.halt.is_none());

    let h1 = coordinator.registry().get(&id("h1")).unwrap();
    assert_eq!(h1.state, HostState::Healthy);
    assert_eq!(h1.last_good.unwrap().id.as_str(), "a1");

    let h2 = coordinator.registry().get(&id("h2")).unwrap();
    assert_eq!(h2.state, HostState::Healthy);
    assert_eq!(h2.last_good.unwrap().id.as_str(), "a0");

    let h2_deployment = &coordinator.ledger().history(&id("h2"))[0];
    assert_eq!(h2_deployment.outcome, DeploymentOutcome::RolledBack);
    assert_eq!(h2_deployment.forward_results().count(), 6);
    assert_eq!(h2_deployment.rollback_results().count(), 6);
    assert!(
        executor
            .runs_on("h2")
            .iter()
            .filter(|r| r.rollback)
            .all(|r| r.artifact.as_str() == "a0")
    );
}

#[tokio::test]
async fn validation_failure_under_default_threshold_is_a_partial_failure() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.fail("h2", "a1", LifecyclePhase::ValidateService);
    let coordinator = coordinator(
        vec![host("h1", Some("a0")), host("h2", Some("a0"))],
        &["a0", "a1"],
        Arc::clone(&executor),
        fast_settings(),
    );

    let rollout = coordinator
        .start(RolloutRequest::new(ArtifactId::new("a1")))
        .await
        .unwrap();

    assert_eq!(rollout.status, RolloutStatus::PartiallyFailed);
    assert!(matches!(
        rollout.halt,
        Some(HaltReason::FailureThreshold { failed: 1, total: 2, .. })
    ));
    assert_eq!(rollout.batches[0].succeeded, vec![id("h1")]);
    assert_eq!(rollout.batches[0].rolled_back, vec![id("h2")]);

    // h1 succeeded, then was reverted along with the rest of the fleet.
    let h1 = coordinator.registry().get(&id("h1")).unwrap();
    assert_eq!(h1.state, HostState::Healthy);
    assert_eq!(h1.last_good.unwrap().id.as_str(), "a0");
    let history = coordinator.ledger().history(&id("h1"));
    assert_eq!(history[0].outcome, DeploymentOutcome::Succeeded);
    assert_eq!(history[1].kind, DeploymentKind::Revert);

    let h2 = coordinator.registry().get(&id("h2")).unwrap();
    assert_eq!(h2.state, HostState::Healthy);
    assert_eq!(h2.last_good.unwrap().id.as_str(), "a0");
    assert_eq!(
        coordinator.ledger().history(&id("h2"))[0].outcome,
        DeploymentOutcome::RolledBack
    );
}

#[tokio::test]
async fn failed_rollback_needs_an_operator() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.fail("h1", "a1", LifecyclePhase::ValidateService);
    executor.fail("h1", "a0", LifecyclePhase::Install);
    let coordinator = coordinator(
        vec![host("h1", Some("a0"))],
        &["a0", "a1"],
        Arc::clone(&executor),
        fast_settings(),
    );

    let rollout = coordinator
        .start(RolloutRequest::new(ArtifactId::new("a1")))
        .await
        .unwrap();

    assert_eq!(rollout.status, RolloutStatus::PartiallyFailed);
    assert_eq!(rollout.batches[0].failed, vec![id("h1")]);
    assert_eq!(rollout.deployments.len(), 1);
    assert_eq!(rollout.deployments[0].outcome, DeploymentOutcome::Failed);
    assert!(rollout.deployments[0].rollback_failed);
    assert!(
        rollout
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::RollbackFailed && w.host == Some(id("h1")))
    );

    let h1 = coordinator.registry().get(&id("h1")).unwrap();
    assert_eq!(h1.state, HostState::Failed);
    assert_eq!(h1.last_good.unwrap().id.as_str(), "a0");

    // No second attempt at the failed rollback.
    let rollback_installs = executor
        .runs_on("h1")
        .iter()
        .filter(|r| r.rollback && r.phase == LifecyclePhase::Install)
        .count();
    assert_eq!(rollback_installs, 1);
}

#[tokio::test]
async fn failure_without_prior_artifact_leaves_host_failed() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.fail("h2", "a1", LifecyclePhase::ValidateService);
    let coordinator = coordinator(
        vec![host("h1", None), host("h2", None)],
        &["a1"],
        Arc::clone(&executor),
        fast_settings(),
    );

    let rollout = coordinator
        .start(RolloutRequest::new(ArtifactId::new("a1")))
        .await
        .unwrap();

    assert_eq!(rollout.status, RolloutStatus::PartiallyFailed);
    assert!(matches!(
        rollout.halt,
        Some(HaltReason::FailureThreshold { failed: 1, total: 2, .. })
    ));

    let h1 = coordinator.registry().get(&id("h1")).unwrap();
    assert_eq!(h1.state, HostState::Healthy);
    let h2 = coordinator.registry().get(&id("h2")).unwrap();
    assert_eq!(h2.state, HostState::Failed);
    assert!(h2.last_good.is_none());

    // h1 had nothing to go back to.
    assert!(
        rollout
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::RevertSkipped && w.host == Some(id("h1")))
    );
}

#[tokio::test]
async fn crossing_threshold_reverts_fleet_and_skips_later_batches() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.fail("b", "v2", LifecyclePhase::Install);
    let hosts = ["a", "b", "c", "d"]
        .into_iter()
        .map(|name| host(name, Some("v1")))
        .collect();
    let coordinator = coordinator(hosts, &["v1", "v2"], Arc::clone(&executor), fast_settings());

    let rollout = coordinator
        .start(RolloutRequest::new(ArtifactId::new("v2")).policy(BatchPolicy::FixedBatchSize(2)))
        .await
        .unwrap();

    // "b" failed, so the rollout is a partial failure even after the revert.
    assert_eq!(rollout.status, RolloutStatus::PartiallyFailed);
    assert_eq!(rollout.batches[0].state, BatchState::Completed);
    assert_eq!(rollout.batches[1].state, BatchState::Skipped);
    assert!(executor.runs_on("c").is_empty());
    assert!(executor.runs_on("d").is_empty());

    // "a" succeeded, then was reverted to v1 by a separate deployment.
    let history = coordinator.ledger().history(&id("a"));
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].outcome, DeploymentOutcome::Succeeded);
    assert_eq!(history[1].kind, DeploymentKind::Revert);
    assert_eq!(history[1].outcome, DeploymentOutcome::Succeeded);
    assert_eq!(history[1].target.id.as_str(), "v1");

    // "b" rolled itself back and is not reverted again.
    let history = coordinator.ledger().history(&id("b"));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, DeploymentOutcome::RolledBack);

    for name in ["a", "b", "c", "d"] {
        let host = coordinator.registry().get(&id(name)).unwrap();
        assert_eq!(host.last_good.unwrap().id.as_str(), "v1", "{name}");
    }
    assert_eq!(coordinator.ledger().for_rollout(&rollout.id).len(), 3);
}

#[tokio::test]
async fn busy_host_aborts_batch_without_running_hooks() {
    let executor = Arc::new(ScriptedExecutor::new());
    let coordinator = coordinator(
        vec![host("web-1", None), host("web-2", None)],
        &["v1"],
        Arc::clone(&executor),
        fast_settings(),
    );

    let held = coordinator.registry().try_acquire(&id("web-2")).unwrap();
    let rollout = coordinator
        .start(RolloutRequest::new(ArtifactId::new("v1")))
        .await
        .unwrap();
    drop(held);

    assert_eq!(rollout.status, RolloutStatus::Aborted);
    assert!(matches!(
        &rollout.halt,
        Some(HaltReason::HostBusy { host, .. }) if host == &id("web-2")
    ));
    assert_eq!(rollout.batches[0].state, BatchState::Aborted);
    assert!(rollout.deployments.is_empty());
    assert!(executor.runs().is_empty());
    assert!(coordinator.ledger().is_empty());
    assert!(!coordinator.registry().is_leased(&id("web-1")).unwrap());
    assert!(
        rollout
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::LeaseContention)
    );
}

#[tokio::test]
async fn redeploying_the_same_artifact_runs_every_phase_again() {
    let executor = Arc::new(ScriptedExecutor::new());
    let coordinator = coordinator(
        vec![host("web-1", None)],
        &["v1"],
        Arc::clone(&executor),
        fast_settings(),
    );

    for _ in 0..2 {
        let rollout = coordinator
            .start(RolloutRequest::new(ArtifactId::new("v1")))
            .await
            .unwrap();
        assert_eq!(rollout.status, RolloutStatus::Completed);
    }

    assert_eq!(executor.runs().len(), 2 * PHASE_ORDER.len());
    assert_eq!(coordinator.ledger().history(&id("web-1")).len(), 2);
}

#[tokio::test]
async fn last_good_only_moves_on_success() {
    let executor = Arc::new(ScriptedExecutor::new());
    executor.script("web-1", "v2", LifecyclePhase::AfterInstall, PhaseOutcome::TimedOut);
    let coordinator = coordinator(
        vec![host("web-1", Some("v1"))],
        &["v1", "v2"],
        Arc::clone(&executor),
        fast_settings(),
    );

    let rollout = coordinator
        .start(RolloutRequest::new(ArtifactId::new("v2")).auto_rollback(false))
        .await
        .unwrap();

    assert_eq!(rollout.worst_outcome(), Some(DeploymentOutcome::Failed));
    let host = coordinator.registry().get(&id("web-1")).unwrap();
    assert_eq!(host.state, HostState::Failed);
    assert_eq!(host.last_good.unwrap().id.as_str(), "v1");
}

#[tokio::test]
async fn cancelling_stops_later_batches_and_reverts() {
    let executor = Arc::new(ScriptedExecutor::with_delay(Duration::from_millis(30)));
    let hosts = ["a", "b", "c"]
        .into_iter()
        .map(|name| host(name, Some("v1")))
        .collect();
    let coordinator = coordinator(hosts, &["v1", "v2"], Arc::clone(&executor), fast_settings());

    let handle = coordinator
        .launch(RolloutRequest::new(ArtifactId::new("v2")).policy(BatchPolicy::FixedBatchSize(1)))
        .await
        .unwrap();
    let rollout_id = handle.id().clone();
    assert!(coordinator.status(&rollout_id).is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.cancel(&rollout_id).unwrap();
    let rollout = handle.wait().await.unwrap();

    assert_eq!(rollout.halt, Some(HaltReason::Cancelled));
    assert_eq!(rollout.status, RolloutStatus::RolledBack);
    assert!(executor.runs_on("c").is_empty());
    for name in ["a", "b", "c"] {
        let host = coordinator.registry().get(&id(name)).unwrap();
        assert_eq!(host.last_good.unwrap().id.as_str(), "v1", "{name}");
    }
    assert!(matches!(
        coordinator.cancel(&rollout_id),
        Err(RolloutError::UnknownRollout(_))
    ));
}

#[tokio::test]
async fn rejects_unknown_artifact_and_empty_selection() {
    let executor = Arc::new(ScriptedExecutor::new());
    let coordinator = coordinator(
        vec![host("web-1", None)],
        &["v1"],
        Arc::clone(&executor),
        fast_settings(),
    );

    let err = coordinator
        .start(RolloutRequest::new(ArtifactId::new("ghost")))
        .await
        .unwrap_err();
    assert!(matches!(err, RolloutError::ArtifactNotFound(_)));

    let err = coordinator
        .start(
            RolloutRequest::new(ArtifactId::new("v1"))
                .hosts(TagFilter::parse("role=db").unwrap()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RolloutError::NoMatchingHosts(_)));

    let err = coordinator
        .start(RolloutRequest::new(ArtifactId::new("v1")).max_failure_ratio(2.0))
        .await
        .unwrap_err();
    assert!(matches!(err, RolloutError::InvalidFailureRatio(_)));
    assert!(executor.runs().is_empty());
}
