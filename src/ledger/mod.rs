// ABOUTME: Append-only ledger of finalized deployments and rollout summaries.
// ABOUTME: Optionally persisted as JSON lines and reloaded on open.

mod error;

pub use error::LedgerError;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::deploy::{Deployment, DeploymentOutcome};
use crate::rollout::Rollout;
use crate::types::{Artifact, DeploymentId, HostId, RolloutId};

/// File name of the ledger inside the state directory.
pub const LEDGER_FILE: &str = "ledger.jsonl";

/// One line of the ledger file.
#[derive(Debug, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Entry {
    Deployment(Deployment),
    Rollout(Rollout),
}

#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum EntryRef<'a> {
    Deployment(&'a Deployment),
    Rollout(&'a Rollout),
}

#[derive(Debug, Default)]
struct Log {
    deployments: Vec<Deployment>,
    /// Rollout snapshots in append order; the last one per id wins.
    rollouts: Vec<Rollout>,
    file: Option<(PathBuf, File)>,
}

impl Log {
    fn persist(&mut self, entry: EntryRef<'_>) -> Result<(), LedgerError> {
        let Some((path, file)) = &mut self.file else {
            return Ok(());
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        file.write_all(&line)
            .and_then(|()| file.flush())
            .map_err(|source| LedgerError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

/// Record of every finished deployment.
///
/// Entries are never updated in place. Concurrent writers serialize on a
/// single lock around the in-memory log and the file append.
#[derive(Debug, Default)]
pub struct Ledger {
    log: RwLock<Log>,
}

impl Ledger {
    /// Ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) a JSON-lines ledger, loading existing entries.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| LedgerError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut log = Log::default();
        if path.exists() {
            let reader = BufReader::new(File::open(&path).map_err(io_err)?);
            for (index, line) in reader.lines().enumerate() {
                let line = line.map_err(io_err)?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry = serde_json::from_str(&line).map_err(|source| LedgerError::Corrupt {
                    path: path.display().to_string(),
                    line: index + 1,
                    source,
                })?;
                match entry {
                    Entry::Deployment(d) => log.deployments.push(d),
                    Entry::Rollout(r) => log.rollouts.push(r),
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        tracing::debug!(
            path = %path.display(),
            deployments = log.deployments.len(),
            "opened ledger"
        );
        log.file = Some((path, file));

        Ok(Self {
            log: RwLock::new(log),
        })
    }

    /// Record a finalized deployment.
    ///
    /// # Errors
    ///
    /// `NotFinalized` while the outcome is still `Pending`, `Duplicate` when
    /// the id was already recorded, or an I/O error from the backing file.
    pub fn append(&self, deployment: Deployment) -> Result<(), LedgerError> {
        if !deployment.is_finalized() {
            return Err(LedgerError::NotFinalized(deployment.id));
        }

        let mut log = self.log.write();
        if log.deployments.iter().any(|d| d.id == deployment.id) {
            return Err(LedgerError::Duplicate(deployment.id));
        }
        log.persist(EntryRef::Deployment(&deployment))?;
        tracing::debug!(
            deployment = %deployment.id,
            host = %deployment.host,
            outcome = %deployment.outcome,
            "recorded deployment"
        );
        log.deployments.push(deployment);
        Ok(())
    }

    pub fn get(&self, id: &DeploymentId) -> Option<Deployment> {
        self.log
            .read()
            .deployments
            .iter()
            .find(|d| &d.id == id)
            .cloned()
    }

    /// Artifact of the most recent succeeded deployment on a host.
    pub fn last_succeeded(&self, host: &HostId) -> Option<Artifact> {
        self.log
            .read()
            .deployments
            .iter()
            .rev()
            .find(|d| &d.host == host && d.outcome == DeploymentOutcome::Succeeded)
            .map(|d| d.target.clone())
    }

    /// Every deployment on a host, oldest first.
    pub fn history(&self, host: &HostId) -> Vec<Deployment> {
        self.log
            .read()
            .deployments
            .iter()
            .filter(|d| &d.host == host)
            .cloned()
            .collect()
    }

    /// Every deployment issued by a rollout, including reverts.
    pub fn for_rollout(&self, rollout: &RolloutId) -> Vec<Deployment> {
        self.log
            .read()
            .deployments
            .iter()
            .filter(|d| d.rollout.as_ref() == Some(rollout))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.read().deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a rollout snapshot. Later snapshots supersede earlier ones.
    pub fn record_rollout(&self, rollout: &Rollout) -> Result<(), LedgerError> {
        let mut log = self.log.write();
        log.persist(EntryRef::Rollout(rollout))?;
        log.rollouts.push(rollout.clone());
        Ok(())
    }

    /// Latest snapshot of a rollout.
    pub fn rollout(&self, id: &RolloutId) -> Option<Rollout> {
        self.log
            .read()
            .rollouts
            .iter()
            .rev()
            .find(|r| &r.id == id)
            .cloned()
    }

    /// Latest snapshot of every rollout, most recent first.
    pub fn rollouts(&self) -> Vec<Rollout> {
        let log = self.log.read();
        let mut seen = std::collections::HashSet::new();
        log.rollouts
            .iter()
            .rev()
            .filter(|r| seen.insert(r.id.clone()))
            .cloned()
            .collect()
    }
}
