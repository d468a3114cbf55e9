// ABOUTME: Host entries of the fleet file.
// ABOUTME: Accepts "local", "host", "user@host", "host:port", or a detailed mapping.

use serde::Deserialize;
use std::path::PathBuf;

use crate::registry::{Host, HostAddress};
use crate::types::{HostId, Tags};

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub id: HostId,

    #[serde(default = "default_address")]
    pub address: HostAddress,

    #[serde(default)]
    pub tags: Tags,

    /// Private key for SSH hosts; the agent is tried first.
    #[serde(default)]
    pub key: Option<PathBuf>,

    #[serde(default = "default_trust_first_connection")]
    pub trust_first_connection: bool,
}

fn default_address() -> HostAddress {
    HostAddress::Local
}

fn default_trust_first_connection() -> bool {
    true
}

impl HostConfig {
    /// Short form: the address doubles as the id (without user and port).
    pub fn parse(s: &str) -> Result<Self, String> {
        let address = HostAddress::parse(s)?;
        let id = match &address {
            HostAddress::Local => "local".to_string(),
            HostAddress::Ssh(target) => target.host.clone(),
        };
        Ok(HostConfig {
            id: HostId::new(id),
            address,
            tags: Tags::new(),
            key: None,
            trust_first_connection: true,
        })
    }

    /// Registry entry for this host.
    pub fn to_host(&self) -> Host {
        let mut address = self.address.clone();
        if let HostAddress::Ssh(target) = &mut address {
            target.key_path = self.key.clone();
            target.trust_first_connection = self.trust_first_connection;
        }
        let mut host = Host::new(self.id.clone(), address);
        host.tags = self.tags.clone();
        host
    }
}
