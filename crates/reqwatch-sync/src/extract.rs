//! Extraction collaborator: derive artifacts and write them to the tracker.

use std::sync::Arc;

use async_trait::async_trait;
use reqwatch_ai::ArtifactGenerator;
use reqwatch_core::{ArtifactKind, ExtractionOutcome, RequirementSnapshot};
use tracing::{info, warn};

use crate::{ExtractError, TrackerClient};

/// Runs one extraction for a requirement. Callers decide whether it should
/// run at all; implementations do not deduplicate.
#[async_trait]
pub trait ExtractionCollaborator: Send + Sync {
    async fn extract_and_create(
        &self,
        requirement: &RequirementSnapshot,
        kind: ArtifactKind,
        upload: bool,
    ) -> Result<ExtractionOutcome, ExtractError>;
}

/// Generator output, uploaded as tracker children when `upload` is set.
///
/// Generation failures are returned as errors and may be retried. Once
/// uploading has started, per-artifact failures land in
/// [`ExtractionOutcome::errors`] instead, so a retry never re-creates the
/// artifacts that did make it.
pub struct GeneratedExtraction {
    generator: Arc<dyn ArtifactGenerator>,
    tracker: Arc<dyn TrackerClient>,
}

impl GeneratedExtraction {
    pub fn new(generator: Arc<dyn ArtifactGenerator>, tracker: Arc<dyn TrackerClient>) -> Self {
        Self { generator, tracker }
    }
}

#[async_trait]
impl ExtractionCollaborator for GeneratedExtraction {
    async fn extract_and_create(
        &self,
        requirement: &RequirementSnapshot,
        kind: ArtifactKind,
        upload: bool,
    ) -> Result<ExtractionOutcome, ExtractError> {
        let drafts = self.generator.generate(requirement, kind).await?;
        let mut outcome = ExtractionOutcome {
            generated: drafts.len(),
            ..ExtractionOutcome::default()
        };
        if !upload {
            return Ok(outcome);
        }

        let parent = &requirement.requirement_id;
        for draft in &drafts {
            match self.tracker.create_child(parent, kind, draft).await {
                Ok(id) => outcome.created.push(id),
                Err(e) => {
                    warn!(requirement_id = %parent, title = %draft.title, error = %e, "failed to create artifact");
                    outcome.errors.push(format!("{}: {e}", draft.title));
                }
            }
        }
        info!(
            requirement_id = %parent,
            created = outcome.created.len(),
            failed = outcome.errors.len(),
            "uploaded artifacts"
        );
        Ok(outcome)
    }
}
