// ABOUTME: Lifecycle executor: runs one phase hook on one host under a timeout.
// ABOUTME: Local processes and SSH sessions sit behind the HookExecutor trait.

mod context;
mod error;
mod fleet;
mod local;
mod output;
mod result;
mod ssh;

pub use context::HookContext;
pub use error::ExecError;
pub use fleet::FleetExecutor;
pub use local::LocalExecutor;
pub use output::{DEFAULT_OUTPUT_LIMIT, TailBuffer};
pub use result::{PhaseOutcome, PhaseResult};
pub use ssh::SshExecutor;

use async_trait::async_trait;

use crate::deploy::{HookSpec, LifecyclePhase};
use crate::registry::Host;

/// Everything needed to run one hook.
#[derive(Debug, Clone, Copy)]
pub struct HookInvocation<'a> {
    pub phase: LifecyclePhase,
    pub hook: &'a HookSpec,
    pub context: &'a HookContext,
    /// Bytes kept per output stream.
    pub output_limit: usize,
}

impl HookInvocation<'_> {
    /// Script path on the target host.
    pub fn script_path(&self) -> String {
        self.hook.script_path(&self.context.artifact)
    }

    /// Argument vector, wrapped in sudo when the hook sets `runas`.
    ///
    /// With sudo the environment is passed through `env` because sudo resets
    /// it by default.
    pub fn argv(&self) -> Vec<String> {
        let script = self.script_path();
        match &self.hook.runas {
            Some(user) => {
                let mut argv = vec![
                    "sudo".to_string(),
                    "-n".to_string(),
                    "-u".to_string(),
                    user.clone(),
                    "--".to_string(),
                    "env".to_string(),
                ];
                argv.extend(
                    self.context
                        .to_env(self.phase)
                        .into_iter()
                        .map(|(k, v)| format!("{k}={v}")),
                );
                argv.push(script);
                argv
            }
            None => vec![script],
        }
    }
}

/// Runs lifecycle hooks.
///
/// A non-zero exit or a timeout is an ordinary `PhaseResult`; only failures to
/// reach the host or find the script are errors.
#[async_trait]
pub trait HookExecutor: Send + Sync {
    async fn run(
        &self,
        host: &Host,
        invocation: HookInvocation<'_>,
    ) -> Result<PhaseResult, ExecError>;
}
