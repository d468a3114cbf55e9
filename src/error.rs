// ABOUTME: Application-wide error types for keel.
// ABOUTME: Uses thiserror for ergonomic error handling and maps errors to exit codes.

use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::ArtifactNotFound;
use crate::deploy::ManifestError;
use crate::ledger::LedgerError;
use crate::registry::RegistryError;
use crate::rollout::{BatchPolicyError, RolloutError};
use crate::types::{RolloutId, TagFilterError};

/// Exit code for invalid input: bad config, unknown artifact, empty selection.
pub const EXIT_INVALID_INPUT: i32 = 3;

#[derive(Debug, Error)]
pub enum Error {
    #[error("file already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("configuration file not found in {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("rollout {0} is not running")]
    RolloutNotRunning(RolloutId),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    TagFilter(#[from] TagFilterError),

    #[error(transparent)]
    Policy(#[from] BatchPolicyError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Rollout(#[from] RolloutError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<ArtifactNotFound> for Error {
    fn from(err: ArtifactNotFound) -> Self {
        Error::Rollout(RolloutError::ArtifactNotFound(err))
    }
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::AlreadyExists(_)
            | Error::ConfigNotFound(_)
            | Error::InvalidConfig(_)
            | Error::RolloutNotRunning(_)
            | Error::Manifest(_)
            | Error::TagFilter(_)
            | Error::Policy(_)
            | Error::Registry(_)
            | Error::Yaml(_) => EXIT_INVALID_INPUT,
            Error::Rollout(err) => match err {
                RolloutError::ArtifactNotFound(_)
                | RolloutError::NoMatchingHosts(_)
                | RolloutError::InvalidPolicy(_)
                | RolloutError::InvalidFailureRatio(_)
                | RolloutError::UnknownRollout(_)
                | RolloutError::Registry(_) => EXIT_INVALID_INPUT,
                RolloutError::Task(_) => 1,
            },
            Error::Ledger(_) | Error::Io(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArtifactId, TagFilter};

    #[test]
    fn input_errors_exit_with_3() {
        let unknown = Error::from(ArtifactNotFound(ArtifactId::new("ghost")));
        assert_eq!(unknown.exit_code(), EXIT_INVALID_INPUT);

        let empty = Error::Rollout(RolloutError::NoMatchingHosts(TagFilter::any()));
        assert_eq!(empty.exit_code(), EXIT_INVALID_INPUT);

        let config = Error::InvalidConfig("bad".to_string());
        assert_eq!(config.exit_code(), EXIT_INVALID_INPUT);
    }

    #[test]
    fn io_errors_exit_with_1() {
        let err = Error::from(std::io::Error::other("disk gone"));
        assert_eq!(err.exit_code(), 1);
    }
}
