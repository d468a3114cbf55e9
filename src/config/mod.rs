// ABOUTME: Fleet file types and parsing for keel.yml.
// ABOUTME: Builds the host registry, artifact catalog, and rollout settings from one file.

mod artifact;
mod deserialize;
mod host;
mod init;

pub use artifact::{ArtifactConfig, MANIFEST_FILENAME};
pub use host::HostConfig;
pub use init::init_config;

use nonempty::NonEmpty;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::ledger::{LEDGER_FILE, Ledger};
use crate::registry::{Host, HostAddress, HostRegistry};
use crate::rollout::RolloutSettings;
use crate::types::{Artifact, HostId};
use deserialize::deserialize_hosts;

pub const CONFIG_FILENAME: &str = "keel.yml";
pub const CONFIG_FILENAME_ALT: &str = "keel.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".keel/config.yml";

/// Host lock files, under the state directory.
const LOCK_DIR: &str = "locks";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub application: String,

    /// Ledger, cancel markers and host locks live here; relative to the fleet file.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(deserialize_with = "deserialize_hosts")]
    pub hosts: NonEmpty<HostConfig>,

    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,

    #[serde(default)]
    pub rollout: RolloutSettings,

    /// Directory the file was loaded from.
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".keel")
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml(&content)?;
        config.base_dir = config_root(&std::path::absolute(path)?);
        Ok(config)
    }

    pub fn discover(dir: &Path) -> Result<Self> {
        let candidates = [
            dir.join(CONFIG_FILENAME),
            dir.join(CONFIG_FILENAME_ALT),
            dir.join(CONFIG_FILENAME_DIR),
        ];

        for path in &candidates {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading fleet file");
                return Self::load(path);
            }
        }

        Err(Error::ConfigNotFound(dir.to_path_buf()))
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for host in self.hosts.iter() {
            if !seen.insert(&host.id) {
                return Err(Error::InvalidConfig(format!("duplicate host id: {}", host.id)));
            }
        }

        let mut seen = HashSet::new();
        for artifact in &self.artifacts {
            if !seen.insert(&artifact.id) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate artifact id: {}",
                    artifact.id
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.rollout.max_failure_ratio) {
            return Err(Error::InvalidConfig(format!(
                "rollout.max_failure_ratio must be between 0 and 1, got {}",
                self.rollout.max_failure_ratio
            )));
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base_dir.join(&self.state_dir)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir().join(LEDGER_FILE)
    }

    pub fn open_ledger(&self) -> Result<Ledger> {
        Ok(Ledger::open(self.ledger_path())?)
    }

    /// Hosts as declared, each seeded with its last succeeded artifact.
    pub fn hosts(&self, ledger: &Ledger) -> Vec<Host> {
        self.hosts
            .iter()
            .map(|config| {
                let host = config.to_host();
                match ledger.last_succeeded(&host.id) {
                    Some(artifact) => host.with_last_good(artifact),
                    None => host,
                }
            })
            .collect()
    }

    /// Registry whose leases also lock hosts against other keel processes.
    pub fn registry(&self, ledger: &Ledger) -> Result<HostRegistry> {
        Ok(HostRegistry::with_hosts(self.hosts(ledger))?.with_lock_dir(self.lock_dir()))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.state_dir().join(LOCK_DIR)
    }

    /// Every declared artifact with its manifest loaded.
    pub fn catalog(&self) -> Result<Catalog> {
        let mut catalog = Catalog::new();
        for config in &self.artifacts {
            let manifest = config.manifest(&self.base_dir)?;
            catalog.insert(self.anchor(config.artifact()), manifest);
        }
        Ok(catalog)
    }

    /// Make a relative local artifact location absolute so hook scripts
    /// resolve the same way from any working directory.
    fn anchor(&self, mut artifact: Artifact) -> Artifact {
        let anchored = artifact
            .local_dir()
            .map(Path::new)
            .filter(|dir| dir.is_relative())
            .map(|dir| self.base_dir.join(dir).to_string_lossy().into_owned());
        if let Some(location) = anchored {
            artifact.location = location;
        }
        artifact
    }

    pub fn template() -> Self {
        Config {
            application: "my-app".to_string(),
            state_dir: default_state_dir(),
            hosts: NonEmpty::new(HostConfig {
                id: HostId::new("local"),
                address: HostAddress::Local,
                tags: [("role".to_string(), "app".to_string())].into(),
                key: None,
                trust_first_connection: true,
            }),
            artifacts: Vec::new(),
            rollout: RolloutSettings::default(),
            base_dir: PathBuf::new(),
        }
    }
}

/// Directory a config path is relative to; `.keel/config.yml` belongs to the
/// directory above `.keel`.
fn config_root(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    let root = if parent.file_name().is_some_and(|name| name == ".keel") {
        parent.parent().unwrap_or(Path::new(""))
    } else {
        parent
    };
    root.to_path_buf()
}
