// ABOUTME: Infrastructure errors raised by hook executors.
// ABOUTME: Non-zero exits and timeouts are phase outcomes, not errors.

use crate::types::HostId;

/// The host could not run the hook at all.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("host {host} unreachable: {reason}")]
    Unreachable { host: HostId, reason: String },

    #[error("hook script not found on {host}: {path}")]
    ScriptMissing { host: HostId, path: String },

    #[error("failed to spawn hook on {host}: {reason}")]
    Spawn { host: HostId, reason: String },
}

impl ExecError {
    pub fn host(&self) -> &HostId {
        match self {
            ExecError::Unreachable { host, .. }
            | ExecError::ScriptMissing { host, .. }
            | ExecError::Spawn { host, .. } => host,
        }
    }
}
