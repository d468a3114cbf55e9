// ABOUTME: Exclusive per-host leases: an atomic flag in process, plus an optional lock file across processes.
// ABOUTME: A held lease is the only handle through which host state changes.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::lockfile::LockFile;
use super::{Host, HostState};
use crate::types::{Artifact, HostId};

/// Information about who holds a host lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    /// Hostname of the machine running the deployment.
    pub holder: String,
    /// Process ID of the lease holder.
    pub pid: u32,
    /// When the lease was acquired.
    pub acquired_at: DateTime<Utc>,
}

impl LeaseInfo {
    /// Lease info for the current process.
    pub fn current() -> Self {
        Self {
            holder: gethostname::gethostname().to_string_lossy().into_owned(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

/// Registry entry for one host.
#[derive(Debug)]
pub(super) struct Slot {
    host: Mutex<Host>,
    leased: AtomicBool,
    holder: Mutex<Option<LeaseInfo>>,
}

impl Slot {
    pub(super) fn new(host: Host) -> Self {
        Self {
            host: Mutex::new(host),
            leased: AtomicBool::new(false),
            holder: Mutex::new(None),
        }
    }

    pub(super) fn snapshot(&self) -> Host {
        self.host.lock().clone()
    }

    pub(super) fn is_leased(&self) -> bool {
        self.leased.load(Ordering::Acquire)
    }
}

/// Exclusive ownership of a host for the lifetime of one deployment.
///
/// Released when dropped.
#[derive(Debug)]
pub struct HostLease {
    slot: Arc<Slot>,
    id: HostId,
    lock: Option<LockFile>,
}

impl HostLease {
    /// Flip the slot's flag from free to held. On contention returns the
    /// current holder, if it has been recorded yet.
    pub(super) fn acquire(slot: Arc<Slot>) -> Result<Self, Option<LeaseInfo>> {
        if slot
            .leased
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(slot.holder.lock().clone());
        }

        *slot.holder.lock() = Some(LeaseInfo::current());
        let id = slot.host.lock().id.clone();
        tracing::debug!(host = %id, "lease acquired");
        Ok(Self {
            slot,
            id,
            lock: None,
        })
    }

    /// Current holder as recorded in this process.
    pub(super) fn info(&self) -> Option<LeaseInfo> {
        self.slot.holder.lock().clone()
    }

    /// Keep a cross-process lock for as long as the lease lives.
    pub(super) fn hold(&mut self, lock: LockFile) {
        self.lock = Some(lock);
    }

    pub fn host_id(&self) -> &HostId {
        &self.id
    }

    /// Current view of the leased host.
    pub fn host(&self) -> Host {
        self.slot.snapshot()
    }

    pub fn set_state(&self, state: HostState) {
        self.slot.host.lock().state = state;
    }

    /// Mark a successful deployment: the host is healthy on `artifact`.
    pub fn record_success(&self, artifact: &Artifact) {
        let mut host = self.slot.host.lock();
        host.state = HostState::Healthy;
        host.last_good = Some(artifact.clone());
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for HostLease {
    fn drop(&mut self) {
        drop(self.lock.take());
        *self.slot.holder.lock() = None;
        self.slot.leased.store(false, Ordering::Release);
        tracing::debug!(host = %self.id, "lease released");
    }
}
