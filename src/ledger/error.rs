// ABOUTME: Error types for the deployment ledger.
// ABOUTME: Covers rejected appends and failures of the JSON-lines store.

use thiserror::Error;

use crate::types::DeploymentId;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("deployment {0} is still pending and cannot be recorded")]
    NotFinalized(DeploymentId),

    #[error("deployment {0} is already recorded")]
    Duplicate(DeploymentId),

    #[error("ledger {path} line {line} is corrupt: {source}")]
    Corrupt {
        path: String,
        line: usize,
        source: serde_json::Error,
    },

    #[error("ledger I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to encode ledger entry: {0}")]
    Encode(#[from] serde_json::Error),
}
