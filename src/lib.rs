// ABOUTME: Library root for keel - exposes the orchestration engine for the CLI and tests.
// ABOUTME: The main binary is in main.rs.

pub mod catalog;
pub mod config;
pub mod deploy;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod output;
pub mod registry;
pub mod rollout;
pub mod ssh;
pub mod types;
