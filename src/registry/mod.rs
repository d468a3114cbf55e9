// ABOUTME: Host registry tracking deployable targets, their tags, and state.
// ABOUTME: Owns the per-host lease table and lock files that serialize deployments to a host.

mod address;
mod error;
mod host;
mod lease;
mod lockfile;

pub use address::{HostAddress, SshTarget};
pub use error::RegistryError;
pub use host::{Host, HostState};
pub use lease::{HostLease, LeaseInfo};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{HostId, TagFilter};
use lease::Slot;
use lockfile::{LockError, LockFile};

/// Registry of deployable hosts.
///
/// The map itself is only write-locked by `register`; lease acquisition takes
/// a read lock to find the slot and then flips the slot's own atomic flag, so
/// unrelated hosts never contend with each other.
///
/// With a lock directory, each lease also holds `<dir>/<host>.lock`, so
/// registries in different processes exclude each other as well.
#[derive(Debug, Default)]
pub struct HostRegistry {
    slots: RwLock<HashMap<HostId, Arc<Slot>>>,
    lock_dir: Option<PathBuf>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an initial host set.
    pub fn with_hosts(hosts: impl IntoIterator<Item = Host>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for host in hosts {
            registry.register(host)?;
        }
        Ok(registry)
    }

    /// Also take a lock file under `dir` for every lease.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    /// Add a host. Ids are unique within a registry.
    pub fn register(&self, host: Host) -> Result<(), RegistryError> {
        let mut slots = self.slots.write();
        if slots.contains_key(&host.id) {
            return Err(RegistryError::AlreadyRegistered(host.id));
        }
        tracing::debug!(host = %host.id, "registered host");
        slots.insert(host.id.clone(), Arc::new(Slot::new(host)));
        Ok(())
    }

    /// Snapshot of a single host.
    pub fn get(&self, id: &HostId) -> Result<Host, RegistryError> {
        self.slot(id).map(|slot| slot.snapshot())
    }

    /// Snapshot of every host, ordered by id.
    pub fn list(&self) -> Vec<Host> {
        self.list_by_tag(&TagFilter::any())
    }

    /// Hosts whose tags satisfy the filter, ordered by id.
    pub fn list_by_tag(&self, filter: &TagFilter) -> Vec<Host> {
        let mut hosts: Vec<Host> = self
            .slots
            .read()
            .values()
            .map(|slot| slot.snapshot())
            .filter(|host| filter.matches(&host.tags))
            .collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        hosts
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the exclusive lease on a host.
    ///
    /// # Errors
    ///
    /// `HostNotFound` for unknown ids, `HostBusy` (with the current holder)
    /// when another deployment owns the host, here or in another process.
    /// `Lock` when the lock file cannot be written.
    pub fn try_acquire(&self, id: &HostId) -> Result<HostLease, RegistryError> {
        let slot = self.slot(id)?;
        let mut lease = HostLease::acquire(slot).map_err(|holder| RegistryError::HostBusy {
            host: id.clone(),
            holder,
        })?;

        let Some(dir) = &self.lock_dir else {
            return Ok(lease);
        };
        let info = lease.info().unwrap_or_else(LeaseInfo::current);
        match LockFile::acquire(dir, id, &info) {
            Ok(lock) => {
                lease.hold(lock);
                Ok(lease)
            }
            Err(LockError::Held(holder)) => Err(RegistryError::HostBusy {
                host: id.clone(),
                holder,
            }),
            Err(LockError::Io(source)) => Err(RegistryError::Lock {
                host: id.clone(),
                source,
            }),
        }
    }

    /// Give a lease back. Equivalent to dropping it.
    pub fn release(&self, lease: HostLease) {
        lease.release();
    }

    /// Whether a host currently has an active lease.
    pub fn is_leased(&self, id: &HostId) -> Result<bool, RegistryError> {
        self.slot(id).map(|slot| slot.is_leased())
    }

    fn slot(&self, id: &HostId) -> Result<Arc<Slot>, RegistryError> {
        self.slots
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::HostNotFound(id.clone()))
    }
}
