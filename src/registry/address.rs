// ABOUTME: Host addressing: local execution or an SSH target.
// ABOUTME: Parses formats like "local", "host", "user@host", "host:port", "user@host:port".

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

use crate::ssh::SessionConfig;

/// How hooks reach a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAddress {
    /// Hooks run as child processes of keel itself.
    Local,
    Ssh(SshTarget),
}

/// SSH connection details for a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub key_path: Option<PathBuf>,
    pub trust_first_connection: bool,
}

impl SshTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: None,
            key_path: None,
            trust_first_connection: true,
        }
    }

    /// Session configuration for this target. Falls back to `$USER`, then root.
    pub fn session_config(&self) -> SessionConfig {
        let user = self
            .user
            .clone()
            .unwrap_or_else(|| std::env::var("USER").unwrap_or_else(|_| "root".to_string()));

        let mut config = SessionConfig::new(&self.host, user)
            .port(self.port)
            .trust_on_first_use(self.trust_first_connection);
        if let Some(key) = &self.key_path {
            config = config.key_path(key);
        }
        config
    }
}

impl HostAddress {
    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("host address cannot be empty".to_string());
        }
        if s == "local" || s == "localhost" {
            return Ok(HostAddress::Local);
        }

        // Parse format: [user@]host[:port]
        let (user_part, rest) = match s.split_once('@') {
            Some((user, rest)) => (Some(user), rest),
            None => (None, s),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port_str)) => {
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| format!("invalid port: {}", port_str))?;
                (host, port)
            }
            None => (rest, 22),
        };

        if host.is_empty() {
            return Err("hostname cannot be empty".to_string());
        }
        if user_part.is_some_and(str::is_empty) {
            return Err("user cannot be empty".to_string());
        }

        Ok(HostAddress::Ssh(SshTarget {
            host: host.to_string(),
            port,
            user: user_part.map(str::to_string),
            key_path: None,
            trust_first_connection: true,
        }))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, HostAddress::Local)
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAddress::Local => f.write_str("local"),
            HostAddress::Ssh(target) => {
                if let Some(user) = &target.user {
                    write!(f, "{user}@")?;
                }
                write!(f, "{}:{}", target.host, target.port)
            }
        }
    }
}

impl Serialize for HostAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HostAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        HostAddress::parse(&s).map_err(serde::de::Error::custom)
    }
}
