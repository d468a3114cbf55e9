// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod artifact;
mod id;
mod tag_filter;

pub use artifact::{Artifact, ContentHash, ContentHashError};
pub use id::{ArtifactId, DeploymentId, HostId, Id, RolloutId};
pub use tag_filter::{TagFilter, TagFilterError, Tags};
