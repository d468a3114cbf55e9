// ABOUTME: Outcome record of a single lifecycle phase on a single host.
// ABOUTME: Carries timing, exit status, and bounded stdout/stderr tails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::TailBuffer;
use crate::deploy::LifecyclePhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

impl fmt::Display for PhaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseOutcome::Succeeded => "succeeded",
            PhaseOutcome::Failed => "failed",
            PhaseOutcome::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Result of running (or skipping) one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Position within the deployment's result list.
    pub sequence: u32,
    pub phase: LifecyclePhase,
    /// Script that ran; None when the manifest has no hook for the phase.
    pub hook: Option<String>,
    /// Recorded while replaying the previous artifact.
    #[serde(default)]
    pub rollback: bool,
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub outcome: PhaseOutcome,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Output was longer than the capture limit.
    #[serde(default)]
    pub truncated: bool,
}

impl PhaseResult {
    /// Result of a finished or killed hook process.
    #[allow(clippy::too_many_arguments)]
    pub fn from_run(
        phase: LifecyclePhase,
        script: String,
        started_at: DateTime<Utc>,
        duration: Duration,
        exit_code: Option<i32>,
        timed_out: bool,
        stdout: &TailBuffer,
        stderr: &TailBuffer,
    ) -> Self {
        let outcome = if timed_out {
            PhaseOutcome::TimedOut
        } else if exit_code == Some(0) {
            PhaseOutcome::Succeeded
        } else {
            PhaseOutcome::Failed
        };

        Self {
            sequence: 0,
            phase,
            hook: Some(script),
            rollback: false,
            started_at,
            duration,
            outcome,
            exit_code,
            stdout: stdout.to_string_lossy(),
            stderr: stderr.to_string_lossy(),
            truncated: stdout.is_truncated() || stderr.is_truncated(),
        }
    }

    /// A phase with no hook configured passes through.
    pub fn no_hook(phase: LifecyclePhase) -> Self {
        Self {
            sequence: 0,
            phase,
            hook: None,
            rollback: false,
            started_at: Utc::now(),
            duration: Duration::ZERO,
            outcome: PhaseOutcome::Succeeded,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
        }
    }

    /// The executor could not run the hook after all retries.
    pub fn unavailable(
        phase: LifecyclePhase,
        script: String,
        started_at: DateTime<Utc>,
        reason: &str,
    ) -> Self {
        let elapsed = (Utc::now() - started_at).to_std().unwrap_or_default();
        Self {
            sequence: 0,
            phase,
            hook: Some(script),
            rollback: false,
            started_at,
            duration: elapsed,
            outcome: PhaseOutcome::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr: reason.to_string(),
            truncated: false,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == PhaseOutcome::Succeeded
    }
}
