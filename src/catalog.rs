// ABOUTME: Artifact source seam and the in-memory catalog built from the fleet file.
// ABOUTME: Resolves an artifact id to its immutable reference plus hook manifest.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::deploy::Manifest;
use crate::types::{Artifact, ArtifactId};

/// An artifact together with the manifest of hooks it ships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub artifact: Artifact,
    pub manifest: Manifest,
}

#[derive(Debug, thiserror::Error)]
#[error("artifact not found: {0}")]
pub struct ArtifactNotFound(pub ArtifactId);

/// Where artifacts and their manifests come from.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn resolve(&self, id: &ArtifactId) -> Result<ResolvedArtifact, ArtifactNotFound>;
}

/// Fixed set of known artifacts.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<ArtifactId, ResolvedArtifact>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact, manifest: Manifest) {
        self.entries.insert(
            artifact.id.clone(),
            ResolvedArtifact { artifact, manifest },
        );
    }

    pub fn with(mut self, artifact: Artifact, manifest: Manifest) -> Self {
        self.insert(artifact, manifest);
        self
    }

    pub fn get(&self, id: &ArtifactId) -> Option<&ResolvedArtifact> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> Vec<&ArtifactId> {
        let mut ids: Vec<_> = self.entries.keys().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl ArtifactSource for Catalog {
    async fn resolve(&self, id: &ArtifactId) -> Result<ResolvedArtifact, ArtifactNotFound> {
        self.get(id)
            .cloned()
            .ok_or_else(|| ArtifactNotFound(id.clone()))
    }
}
