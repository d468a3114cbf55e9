// ABOUTME: Runs hook scripts on remote hosts over SSH.
// ABOUTME: Opens one session per hook invocation and maps transport failures to ExecError.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Instant;

use super::{ExecError, HookExecutor, HookInvocation, PhaseResult};
use crate::registry::{Host, HostAddress};
use crate::ssh::{Session, shell_quote};

/// Executes hooks through an SSH session to the host.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor;

impl SshExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Shell command line for the remote side, environment included.
    fn remote_command(invocation: &HookInvocation<'_>) -> String {
        let argv = invocation.argv();
        let mut parts: Vec<String> = Vec::new();
        if invocation.hook.runas.is_none() {
            // argv already carries the environment when wrapped in sudo
            parts.push("env".to_string());
            parts.extend(
                invocation
                    .context
                    .to_env(invocation.phase)
                    .into_iter()
                    .map(|(k, v)| shell_quote(&format!("{k}={v}"))),
            );
        }
        parts.extend(argv.iter().map(|arg| shell_quote(arg)));
        parts.join(" ")
    }
}

#[async_trait]
impl HookExecutor for SshExecutor {
    async fn run(
        &self,
        host: &Host,
        invocation: HookInvocation<'_>,
    ) -> Result<PhaseResult, ExecError> {
        let HostAddress::Ssh(target) = &host.address else {
            return Err(ExecError::Unreachable {
                host: host.id.clone(),
                reason: "host has no SSH address".to_string(),
            });
        };

        let unreachable = |e: crate::ssh::Error| ExecError::Unreachable {
            host: host.id.clone(),
            reason: e.to_string(),
        };

        let session = Session::connect(target.session_config())
            .await
            .map_err(unreachable)?;

        let script = invocation.script_path();
        if !session.file_exists(&script).await.map_err(unreachable)? {
            let _ = session.disconnect().await;
            return Err(ExecError::ScriptMissing {
                host: host.id.clone(),
                path: script,
            });
        }

        tracing::info!(
            host = %host.id,
            phase = %invocation.phase,
            script = %script,
            "running remote hook"
        );

        let started_at = Utc::now();
        let clock = Instant::now();
        let output = session
            .exec_bounded(
                &Self::remote_command(&invocation),
                invocation.hook.timeout,
                invocation.output_limit,
            )
            .await;
        let duration = clock.elapsed();

        if let Err(e) = session.disconnect().await {
            tracing::warn!(host = %host.id, "SSH disconnect failed: {}", e);
        }
        let output = output.map_err(unreachable)?;

        let result = PhaseResult::from_run(
            invocation.phase,
            script,
            started_at,
            duration,
            output.exit_code.map(|code| code as i32),
            output.timed_out,
            &output.stdout,
            &output.stderr,
        );

        tracing::info!(
            host = %host.id,
            phase = %invocation.phase,
            outcome = %result.outcome,
            "remote hook finished"
        );
        Ok(result)
    }
}
