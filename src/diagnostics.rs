// ABOUTME: Diagnostics accumulator for non-fatal warnings during a rollout.
// ABOUTME: Collects warnings that shouldn't fail a rollout but should be shown to users.

use serde::{Deserialize, Serialize};

use crate::types::HostId;

/// Collects non-fatal warnings during rollout operations.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Record a warning, auto-logging it via tracing.
    pub fn warn(&mut self, warning: Warning) {
        match &warning.host {
            Some(host) => tracing::warn!(%host, "{}", warning.message),
            None => tracing::warn!("{}", warning.message),
        }
        self.warnings.push(warning);
    }

    /// Get all collected warnings.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Check if any warnings were collected.
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

/// A non-fatal warning collected during a rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostId>,
    pub message: String,
}

impl Warning {
    /// A host was left on the rollout's artifact because it had nothing to revert to.
    pub fn revert_skipped(host: HostId, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::RevertSkipped,
            host: Some(host),
            message: message.into(),
        }
    }

    /// A host could not be restored and needs operator attention.
    pub fn rollback_failed(host: HostId, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::RollbackFailed,
            host: Some(host),
            message: message.into(),
        }
    }

    /// A lease was busy and the batch is being retried.
    pub fn lease_contention(host: HostId, message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::LeaseContention,
            host: Some(host),
            message: message.into(),
        }
    }

    /// A deployment record could not be written to the ledger.
    pub fn ledger_write(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::LedgerWrite,
            host: None,
            message: message.into(),
        }
    }
}

/// Categories of warnings that can occur during a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Host had no pre-rollout artifact, so the rollout-wide revert skipped it.
    RevertSkipped,
    /// Restoring the previous artifact failed.
    RollbackFailed,
    /// Another deployment held a host lease.
    LeaseContention,
    /// Failed to append to the ledger (history may be incomplete).
    LedgerWrite,
}
