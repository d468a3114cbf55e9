// ABOUTME: Runs hook scripts as local child processes.
// ABOUTME: Enforces the hook timeout by killing the hook's process group and keeps bounded output tails.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{ExecError, HookExecutor, HookInvocation, PhaseResult, TailBuffer};
use crate::registry::Host;

/// How long to keep draining pipes after the hook exits or is killed.
/// Grandchildren that inherited the pipes can otherwise hold them open.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Executes hooks on the machine keel runs on.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HookExecutor for LocalExecutor {
    async fn run(
        &self,
        host: &Host,
        invocation: HookInvocation<'_>,
    ) -> Result<PhaseResult, ExecError> {
        let script = invocation.script_path();
        if !Path::new(&script).is_file() {
            return Err(ExecError::ScriptMissing {
                host: host.id.clone(),
                path: script,
            });
        }

        let argv = invocation.argv();
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .envs(invocation.context.to_env(invocation.phase))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so a timeout can take down everything the hook started.
        #[cfg(unix)]
        command.process_group(0);
        if let Some(dir) = invocation.context.artifact.local_dir()
            && Path::new(dir).is_dir()
        {
            command.current_dir(dir);
        }

        tracing::info!(
            host = %host.id,
            phase = %invocation.phase,
            script = %script,
            timeout = ?invocation.hook.timeout,
            "running hook"
        );

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut child = command.spawn().map_err(|e| ExecError::Spawn {
            host: host.id.clone(),
            reason: format!("{script}: {e}"),
        })?;

        let stdout = Arc::new(Mutex::new(TailBuffer::new(invocation.output_limit)));
        let stderr = Arc::new(Mutex::new(TailBuffer::new(invocation.output_limit)));
        let readers = [
            child.stdout.take().map(|pipe| drain(pipe, Arc::clone(&stdout))),
            child.stderr.take().map(|pipe| drain(pipe, Arc::clone(&stderr))),
        ];

        let (exit_code, timed_out) =
            match tokio::time::timeout(invocation.hook.timeout, child.wait()).await {
                Ok(Ok(status)) => (status.code(), false),
                Ok(Err(e)) => {
                    return Err(ExecError::Spawn {
                        host: host.id.clone(),
                        reason: format!("failed to wait for {script}: {e}"),
                    });
                }
                Err(_) => {
                    tracing::warn!(
                        host = %host.id,
                        phase = %invocation.phase,
                        "hook exceeded {:?}, killing",
                        invocation.hook.timeout
                    );
                    kill_process_group(&child);
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    (None, true)
                }
            };
        let duration = clock.elapsed();

        for mut reader in readers.into_iter().flatten() {
            if tokio::time::timeout(DRAIN_GRACE, &mut reader).await.is_err() {
                reader.abort();
            }
        }

        let stdout = stdout.lock().take();
        let stderr = stderr.lock().take();
        let result = PhaseResult::from_run(
            invocation.phase,
            script,
            started_at,
            duration,
            exit_code,
            timed_out,
            &stdout,
            &stderr,
        );

        tracing::info!(
            host = %host.id,
            phase = %invocation.phase,
            outcome = %result.outcome,
            exit_code = ?result.exit_code,
            "hook finished"
        );
        Ok(result)
    }
}

#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        tracing::debug!(pid, "failed to kill hook process group: {}", err);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn drain<R>(mut pipe: R, sink: Arc<Mutex<TailBuffer>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().push(&chunk[..n]),
            }
        }
    })
}
