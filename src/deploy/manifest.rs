// ABOUTME: Per-artifact hook manifest, the appspec.yml equivalent.
// ABOUTME: Maps each lifecycle phase to a script, its timeout, and the identity it runs as.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::LifecyclePhase;
use crate::types::Artifact;

/// Hook timeout used when the manifest does not set one.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One hook script bound to a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSpec {
    /// Script path; relative paths resolve against the artifact location.
    pub location: String,

    #[serde(
        default = "default_timeout",
        deserialize_with = "deserialize_timeout",
        serialize_with = "humantime_serde::serialize"
    )]
    pub timeout: Duration,

    /// Run the script as this user (via sudo).
    #[serde(default)]
    pub runas: Option<String>,
}

fn default_timeout() -> Duration {
    DEFAULT_HOOK_TIMEOUT
}

impl HookSpec {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            timeout: DEFAULT_HOOK_TIMEOUT,
            runas: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn runas(mut self, user: impl Into<String>) -> Self {
        self.runas = Some(user.into());
        self
    }

    /// Script path on the target host.
    pub fn script_path(&self, artifact: &Artifact) -> String {
        if Path::new(&self.location).is_absolute() {
            return self.location.clone();
        }
        match artifact.local_dir() {
            Some(dir) => Path::new(dir)
                .join(&self.location)
                .to_string_lossy()
                .into_owned(),
            None => self.location.clone(),
        }
    }
}

/// Declarative phase -> hook mapping shipped with an artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, deserialize_with = "deserialize_hooks")]
    pub hooks: BTreeMap<LifecyclePhase, HookSpec>,
}

impl Manifest {
    pub fn from_yaml(yaml: &str) -> Result<Self, ManifestError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn with_hook(mut self, phase: LifecyclePhase, hook: HookSpec) -> Self {
        self.hooks.insert(phase, hook);
        self
    }

    /// Hook for a phase; phases without one still run, as no-ops.
    pub fn hook(&self, phase: LifecyclePhase) -> Option<&HookSpec> {
        self.hooks.get(&phase)
    }
}

// Timeouts accept appspec-style integer seconds or humantime strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum TimeoutValue {
    Seconds(u64),
    Human(#[serde(with = "humantime_serde")] Duration),
}

fn deserialize_timeout<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match TimeoutValue::deserialize(deserializer)? {
        TimeoutValue::Seconds(secs) => Duration::from_secs(secs),
        TimeoutValue::Human(duration) => duration,
    })
}

// appspec.yml lists hooks per phase; keel runs exactly one per phase.
#[derive(Deserialize)]
#[serde(untagged)]
enum HookEntry {
    One(HookSpec),
    List(Vec<HookSpec>),
}

fn deserialize_hooks<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<LifecyclePhase, HookSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<LifecyclePhase, HookEntry> = BTreeMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(phase, entry)| match entry {
            HookEntry::One(hook) => Ok((phase, hook)),
            HookEntry::List(mut hooks) if hooks.len() == 1 => Ok((phase, hooks.remove(0))),
            HookEntry::List(hooks) => Err(serde::de::Error::custom(format!(
                "{phase} declares {} hooks, exactly one is supported",
                hooks.len()
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArtifactId, ContentHash};

    #[test]
    fn parses_appspec_style_manifest() {
        let yaml = r#"
version: 0.0
os: linux
hooks:
  ApplicationStop:
    - location: scripts/stop_container.sh
      timeout: 300
      runas: root
  AfterInstall:
    - location: scripts/install_dependencies.sh
  ApplicationStart:
    location: scripts/start_container.sh
    timeout: 2m
  ValidateService:
    - location: scripts/validate_service.sh
      timeout: 30
"#;
        let manifest = Manifest::from_yaml(yaml).unwrap();
        let stop = manifest.hook(LifecyclePhase::ApplicationStop).unwrap();
        assert_eq!(stop.timeout, Duration::from_secs(300));
        assert_eq!(stop.runas.as_deref(), Some("root"));

        let install = manifest.hook(LifecyclePhase::AfterInstall).unwrap();
        assert_eq!(install.timeout, DEFAULT_HOOK_TIMEOUT);

        let start = manifest.hook(LifecyclePhase::ApplicationStart).unwrap();
        assert_eq!(start.timeout, Duration::from_secs(120));

        assert!(manifest.hook(LifecyclePhase::BeforeInstall).is_none());
    }

    #[test]
    fn rejects_multiple_hooks_per_phase() {
        let yaml = r#"
hooks:
  BeforeInstall:
    - location: a.sh
    - location: b.sh
"#;
        let err = Manifest::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn rejects_unknown_phase() {
        let yaml = "hooks:\n  DownloadBundle:\n    location: x.sh\n";
        assert!(Manifest::from_yaml(yaml).is_err());
    }

    #[test]
    fn relative_scripts_resolve_against_local_artifact() {
        let artifact = Artifact::new(
            ArtifactId::new("web-v1"),
            ContentHash::parse("sha256:01").unwrap(),
            "/srv/bundles/web-v1",
        );
        let hook = HookSpec::new("scripts/start.sh");
        assert_eq!(hook.script_path(&artifact), "/srv/bundles/web-v1/scripts/start.sh");

        let absolute = HookSpec::new("/opt/hooks/start.sh");
        assert_eq!(absolute.script_path(&artifact), "/opt/hooks/start.sh");
    }
}
