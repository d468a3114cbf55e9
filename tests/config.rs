// ABOUTME: Integration tests for fleet file loading.
// ABOUTME: Covers discovery, rollout settings, host forms, and manifest lookup.

use keel::config::{Config, MANIFEST_FILENAME};
use keel::deploy::LifecyclePhase;
use keel::error::Error;
use keel::registry::HostAddress;
use keel::rollout::BatchPolicy;
use keel::types::{ArtifactId, HostId, TagFilter};
use std::fs;
use std::time::Duration;

const FLEET: &str = r#"
application: shop
state_dir: var/keel
hosts:
  - local
  - deploy@web-1.example.com:2222
  - id: web-2
    address: web-2.example.com
    tags: { role: web, zone: b }
    key: keys/deploy
    trust_first_connection: false
artifacts:
  - id: shop-v1
    hash: sha256:aa11
    location: releases/shop-v1
  - id: shop-v2
    hash: sha256:bb22
    location: releases/shop-v2
    manifest: manifests/v2.yml
rollout:
  batch: 25%
  max_failure_ratio: 0.25
  lease_attempts: 5
  lease_backoff: 2s
  auto_rollback: false
  exec_attempts: 1
  exec_backoff: 250ms
"#;

#[test]
fn parses_full_fleet_file() {
    let config = Config::from_yaml(FLEET).unwrap();

    assert_eq!(config.application, "shop");
    assert_eq!(config.hosts.len(), 3);
    assert_eq!(config.rollout.batch, BatchPolicy::PercentagePerBatch(25));
    assert_eq!(config.rollout.max_failure_ratio, 0.25);
    assert_eq!(config.rollout.lease_attempts, 5);
    assert_eq!(config.rollout.lease_backoff, Duration::from_secs(2));
    assert!(!config.rollout.deploy.auto_rollback);
    assert_eq!(config.rollout.deploy.exec_attempts, 1);
    assert_eq!(config.rollout.deploy.exec_backoff, Duration::from_millis(250));
}

#[test]
fn host_forms_resolve_to_registry_entries() {
    let config = Config::from_yaml(FLEET).unwrap();
    let ids: Vec<&str> = config.hosts.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, ["local", "web-1.example.com", "web-2"]);

    assert_eq!(config.hosts.first().address, HostAddress::Local);

    let web2 = config.hosts.iter().find(|h| h.id == HostId::new("web-2")).unwrap();
    let host = web2.to_host();
    assert!(TagFilter::parse("role=web,zone=b").unwrap().matches(&host.tags));
    match host.address {
        HostAddress::Ssh(target) => {
            assert_eq!(target.port, 22);
            assert!(!target.trust_first_connection);
            assert_eq!(target.key_path.unwrap().to_str(), Some("keys/deploy"));
        }
        HostAddress::Local => panic!("web-2 should be an ssh host"),
    }
}

#[test]
fn discovers_nested_config_and_loads_manifests() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join(".keel")).unwrap();
    fs::write(dir.path().join(".keel/config.yml"), FLEET).unwrap();

    fs::create_dir_all(dir.path().join("releases/shop-v1")).unwrap();
    fs::write(
        dir.path().join("releases/shop-v1").join(MANIFEST_FILENAME),
        "hooks:\n  Install:\n    location: install.sh\n",
    )
    .unwrap();
    fs::create_dir_all(dir.path().join("manifests")).unwrap();
    fs::write(
        dir.path().join("manifests/v2.yml"),
        "hooks:\n  ValidateService:\n    location: check.sh\n    timeout: 30\n",
    )
    .unwrap();

    let config = Config::discover(dir.path()).unwrap();
    assert_eq!(config.base_dir(), dir.path());
    assert_eq!(config.state_dir(), dir.path().join("var/keel"));

    let catalog = config.catalog().unwrap();
    let v1 = catalog.get(&ArtifactId::new("shop-v1")).unwrap();
    assert!(v1.manifest.hook(LifecyclePhase::Install).is_some());
    assert_eq!(
        v1.artifact.location,
        dir.path().join("releases/shop-v1").to_string_lossy()
    );

    let v2 = catalog.get(&ArtifactId::new("shop-v2")).unwrap();
    let validate = v2.manifest.hook(LifecyclePhase::ValidateService).unwrap();
    assert_eq!(validate.timeout, Duration::from_secs(30));
    assert!(v2.manifest.hook(LifecyclePhase::Install).is_none());
}

#[test]
fn missing_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::discover(dir.path()).unwrap_err();
    assert!(matches!(err, Error::ConfigNotFound(_)));
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn rejects_duplicate_artifact_ids() {
    let yaml = r#"
application: shop
hosts: [local]
artifacts:
  - { id: v1, hash: "sha256:aa", location: /srv/v1 }
  - { id: v1, hash: "sha256:bb", location: /srv/v1b }
"#;
    let err = Config::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("duplicate artifact id"));
}

#[test]
fn rejects_malformed_content_hash() {
    let yaml = r#"
application: shop
hosts: [local]
artifacts:
  - { id: v1, hash: not-a-hash, location: /srv/v1 }
"#;
    assert!(Config::from_yaml(yaml).is_err());
}
