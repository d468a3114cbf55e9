// ABOUTME: Host model: identity, address, tags, lifecycle state, last good artifact.
// ABOUTME: Hosts are only mutated through a held lease.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::HostAddress;
use crate::types::{Artifact, HostId, Tags};

/// Lifecycle state of a host as seen by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    /// Never deployed by this process.
    #[default]
    Idle,
    Deploying,
    Healthy,
    Failed,
    RollingBack,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostState::Idle => "idle",
            HostState::Deploying => "deploying",
            HostState::Healthy => "healthy",
            HostState::Failed => "failed",
            HostState::RollingBack => "rolling-back",
        };
        f.write_str(s)
    }
}

/// A deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub address: HostAddress,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub state: HostState,
    /// Artifact of the most recent `Succeeded` deployment on this host.
    #[serde(default)]
    pub last_good: Option<Artifact>,
}

impl Host {
    pub fn new(id: HostId, address: HostAddress) -> Self {
        Self {
            id,
            address,
            tags: Tags::new(),
            state: HostState::Idle,
            last_good: None,
        }
    }

    /// A host whose hooks run as local processes.
    pub fn local(id: HostId) -> Self {
        Self::new(id, HostAddress::Local)
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_last_good(mut self, artifact: Artifact) -> Self {
        self.last_good = Some(artifact);
        self
    }
}
