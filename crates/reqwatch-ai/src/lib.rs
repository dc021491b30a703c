//! Artifact generation: turn requirement text into draft child artifacts.
//!
//! The generator is an opaque capability behind [`ArtifactGenerator`]. The
//! `http` feature adds [`ChatGenerator`], which talks to an OpenAI-compatible
//! chat-completions endpoint.

mod error;
mod parse;
mod prompt;

#[cfg(feature = "http")]
mod chat;

pub use error::GenerateError;
pub use parse::parse_artifacts;
pub use prompt::{ChatMessage, build_messages};

#[cfg(feature = "http")]
pub use chat::ChatGenerator;

use async_trait::async_trait;
use reqwatch_core::{ArtifactKind, DraftArtifact, RequirementSnapshot};

/// Generates draft artifacts for a requirement.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(
        &self,
        requirement: &RequirementSnapshot,
        kind: ArtifactKind,
    ) -> Result<Vec<DraftArtifact>, GenerateError>;
}
