// ABOUTME: Error types for host registry operations.
// ABOUTME: Covers unknown hosts, duplicate registration, lease contention, and lock file failures.

use super::LeaseInfo;
use crate::types::HostId;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("host not found: {0}")]
    HostNotFound(HostId),

    #[error("host already registered: {0}")]
    AlreadyRegistered(HostId),

    #[error("host {host} is busy{}", describe_holder(.holder))]
    HostBusy {
        host: HostId,
        holder: Option<LeaseInfo>,
    },

    #[error("failed to lock host {host}: {source}")]
    Lock {
        host: HostId,
        #[source]
        source: std::io::Error,
    },
}

impl RegistryError {
    /// Lease contention is the only transient registry error.
    pub fn is_busy(&self) -> bool {
        matches!(self, RegistryError::HostBusy { .. })
    }
}

fn describe_holder(holder: &Option<LeaseInfo>) -> String {
    match holder {
        Some(info) => format!(
            " (leased by {} pid {} since {})",
            info.holder, info.pid, info.acquired_at
        ),
        None => String::new(),
    }
}
