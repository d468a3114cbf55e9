// ABOUTME: Artifact entries of the fleet file and their hook manifests.
// ABOUTME: A manifest comes from an explicit path, inline hooks, or appspec.yml in the artifact.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::deploy::{Manifest, ManifestError};
use crate::types::{Artifact, ArtifactId, ContentHash};

/// Manifest file looked up inside a local artifact when none is configured.
pub const MANIFEST_FILENAME: &str = "appspec.yml";

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactConfig {
    pub id: ArtifactId,
    pub hash: ContentHash,
    pub location: String,

    /// Manifest path, relative to the fleet file.
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    #[serde(default, flatten)]
    pub inline: Manifest,
}

impl ArtifactConfig {
    pub fn artifact(&self) -> Artifact {
        Artifact::new(self.id.clone(), self.hash.clone(), self.location.clone())
    }

    /// Load this artifact's hook manifest.
    ///
    /// Inline hooks take precedence over a manifest path; with neither, an
    /// `appspec.yml` at the root of a local artifact is used, and an
    /// artifact without any manifest runs no hooks.
    pub fn manifest(&self, base_dir: &Path) -> Result<Manifest, ManifestError> {
        if !self.inline.hooks.is_empty() {
            return Ok(self.inline.clone());
        }
        if let Some(path) = &self.manifest {
            return Manifest::load(&base_dir.join(path));
        }

        let artifact = self.artifact();
        if let Some(dir) = artifact.local_dir() {
            let bundled = base_dir.join(dir).join(MANIFEST_FILENAME);
            if bundled.exists() {
                return Manifest::load(&bundled);
            }
        }

        tracing::debug!(artifact = %self.id, "no hook manifest; phases will run without hooks");
        Ok(Manifest::default())
    }
}
