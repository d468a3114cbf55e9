// ABOUTME: Deployment context handed to hook scripts.
// ABOUTME: Rendered as KEEL_* environment variables for every hook invocation.

use std::collections::BTreeMap;

use crate::deploy::LifecyclePhase;
use crate::types::{Artifact, ArtifactId, DeploymentId, HostId, RolloutId};

/// Context passed to hooks via environment variables.
#[derive(Debug, Clone)]
pub struct HookContext {
    pub deployment: DeploymentId,
    pub rollout: Option<RolloutId>,
    pub host: HostId,
    /// Artifact whose hooks are running.
    pub artifact: Artifact,
    pub previous_artifact: Option<ArtifactId>,
    /// Set while replaying the lifecycle to restore a previous artifact.
    pub rollback: bool,
}

impl HookContext {
    pub fn to_env(&self, phase: LifecyclePhase) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("KEEL_LIFECYCLE_EVENT".to_string(), phase.to_string());
        env.insert("KEEL_DEPLOYMENT_ID".to_string(), self.deployment.to_string());
        env.insert("KEEL_HOST".to_string(), self.host.to_string());
        env.insert("KEEL_ARTIFACT_ID".to_string(), self.artifact.id.to_string());
        env.insert(
            "KEEL_ARTIFACT_HASH".to_string(),
            self.artifact.content_hash.to_string(),
        );
        env.insert(
            "KEEL_ARTIFACT_LOCATION".to_string(),
            self.artifact.location.clone(),
        );
        if let Some(rollout) = &self.rollout {
            env.insert("KEEL_ROLLOUT_ID".to_string(), rollout.to_string());
        }
        if let Some(prev) = &self.previous_artifact {
            env.insert("KEEL_PREVIOUS_ARTIFACT".to_string(), prev.to_string());
        }
        if self.rollback {
            env.insert("KEEL_ROLLBACK".to_string(), "1".to_string());
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentHash;

    fn context(rollback: bool, previous: Option<&str>) -> HookContext {
        HookContext {
            deployment: DeploymentId::new("d-1"),
            rollout: Some(RolloutId::new("r-1")),
            host: HostId::new("web-1"),
            artifact: Artifact::new(
                ArtifactId::new("web-v2"),
                ContentHash::parse("sha256:beef").unwrap(),
                "/srv/web-v2",
            ),
            previous_artifact: previous.map(ArtifactId::new),
            rollback,
        }
    }

    #[test]
    fn hook_context_to_env() {
        let env = context(false, Some("web-v1")).to_env(LifecyclePhase::AfterInstall);
        assert_eq!(env["KEEL_LIFECYCLE_EVENT"], "AfterInstall");
        assert_eq!(env["KEEL_DEPLOYMENT_ID"], "d-1");
        assert_eq!(env["KEEL_ROLLOUT_ID"], "r-1");
        assert_eq!(env["KEEL_HOST"], "web-1");
        assert_eq!(env["KEEL_ARTIFACT_ID"], "web-v2");
        assert_eq!(env["KEEL_ARTIFACT_HASH"], "sha256:beef");
        assert_eq!(env["KEEL_ARTIFACT_LOCATION"], "/srv/web-v2");
        assert_eq!(env["KEEL_PREVIOUS_ARTIFACT"], "web-v1");
        assert!(!env.contains_key("KEEL_ROLLBACK"));
    }

    #[test]
    fn hook_context_without_previous_artifact() {
        let env = context(true, None).to_env(LifecyclePhase::Install);
        assert!(!env.contains_key("KEEL_PREVIOUS_ARTIFACT"));
        assert_eq!(env["KEEL_ROLLBACK"], "1");
    }
}
