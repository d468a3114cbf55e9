// ABOUTME: Errors from reaching a host over SSH and running a hook there.
// ABOUTME: Every variant means the hook could not run; the executor maps them to Unreachable.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("timed out after {after:?} connecting to {target}")]
    ConnectTimeout { target: String, after: Duration },

    #[error("{user}@{target} rejected every offered key")]
    AuthenticationFailed { user: String, target: String },

    #[error("no SSH credentials: {0}")]
    NoCredentials(String),

    #[error("failed to load key from {path}: {reason}")]
    KeyLoad { path: PathBuf, reason: String },

    #[error("SSH channel error: {0}")]
    Channel(String),

    /// The session dropped before the remote command reported an exit status.
    #[error("connection lost before the remote command finished")]
    NoExitStatus,

    #[error("SSH protocol error: {0}")]
    Protocol(#[from] russh::Error),

    #[error("SSH key error: {0}")]
    Key(#[from] russh::keys::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
