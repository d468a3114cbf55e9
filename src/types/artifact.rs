// ABOUTME: Immutable artifact references and content hash validation.
// ABOUTME: Handles hashes in the "<algorithm>:<hex digest>" form.

use super::ArtifactId;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContentHashError {
    #[error("content hash cannot be empty")]
    Empty,

    #[error("content hash must look like <algorithm>:<hex>, got {0:?}")]
    MissingAlgorithm(String),

    #[error("invalid hex digit in content hash: '{0}'")]
    InvalidDigit(char),
}

/// Digest of an artifact's bytes, e.g. `sha256:9f86d08...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn parse(input: &str) -> Result<Self, ContentHashError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ContentHashError::Empty);
        }

        let (algorithm, digest) = input
            .split_once(':')
            .filter(|(alg, digest)| !alg.is_empty() && !digest.is_empty())
            .ok_or_else(|| ContentHashError::MissingAlgorithm(input.to_string()))?;

        if let Some(c) = digest.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(ContentHashError::InvalidDigit(c));
        }

        Ok(Self(format!(
            "{}:{}",
            algorithm.to_ascii_lowercase(),
            digest.to_ascii_lowercase()
        )))
    }

    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(alg, _)| alg).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Immutable reference to a deployable unit.
///
/// The location is opaque to keel except for resolving relative hook script
/// paths when it names a local directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    #[serde(rename = "hash")]
    pub content_hash: ContentHash,
    pub location: String,
}

impl Artifact {
    pub fn new(id: ArtifactId, content_hash: ContentHash, location: impl Into<String>) -> Self {
        Self {
            id,
            content_hash,
            location: location.into(),
        }
    }

    /// Local directory backing this artifact, if the location is a path or
    /// a `file://` URI.
    pub fn local_dir(&self) -> Option<&str> {
        if let Some(path) = self.location.strip_prefix("file://") {
            return Some(path);
        }
        if self.location.contains("://") {
            return None;
        }
        Some(self.location.as_str())
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.content_hash)
    }
}
