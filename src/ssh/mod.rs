// ABOUTME: SSH transport for running lifecycle hooks on remote hosts.
// ABOUTME: Supports SSH agent and key-based authentication with known_hosts verification.

mod client;
mod error;

pub use client::{RemoteOutput, Session, SessionConfig};
pub use error::{Error, Result};

pub(crate) use client::shell_quote;
