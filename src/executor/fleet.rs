// ABOUTME: Executor that routes each hook to the local or SSH executor by host address.
// ABOUTME: This is the executor the CLI wires into the rollout coordinator.

use async_trait::async_trait;

use super::{ExecError, HookExecutor, HookInvocation, LocalExecutor, PhaseResult, SshExecutor};
use crate::registry::{Host, HostAddress};

#[derive(Debug, Clone, Default)]
pub struct FleetExecutor {
    local: LocalExecutor,
    ssh: SshExecutor,
}

impl FleetExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HookExecutor for FleetExecutor {
    async fn run(
        &self,
        host: &Host,
        invocation: HookInvocation<'_>,
    ) -> Result<PhaseResult, ExecError> {
        match host.address {
            HostAddress::Local => self.local.run(host, invocation).await,
            HostAddress::Ssh(_) => self.ssh.run(host, invocation).await,
        }
    }
}
