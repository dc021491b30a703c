//! Work-item tracker contract.

use async_trait::async_trait;
use reqwatch_core::{ArtifactKind, DraftArtifact, RequirementSnapshot};
use serde::{Deserialize, Serialize};

use crate::TrackerError;

/// Narrows [`TrackerClient::list_requirements`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementFilter {
    pub project: Option<String>,
    /// Tracker work-item type, e.g. "Epic" or "Feature".
    pub item_type: Option<String>,
    #[serde(default)]
    pub states: Vec<String>,
    pub limit: Option<usize>,
}

/// Source of requirements and sink for derived artifacts.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Current content of a requirement, or [`TrackerError::NotFound`].
    async fn fetch_requirement(&self, id: &str) -> Result<RequirementSnapshot, TrackerError>;

    async fn list_requirements(&self, filter: &RequirementFilter) -> Result<Vec<String>, TrackerError>;

    /// Whether child items of `kind` already hang off `parent_id`.
    async fn child_items_exist(&self, parent_id: &str, kind: ArtifactKind) -> Result<bool, TrackerError>;

    /// Create one child item; returns its tracker ID.
    async fn create_child(
        &self,
        parent_id: &str,
        kind: ArtifactKind,
        draft: &DraftArtifact,
    ) -> Result<String, TrackerError>;
}
