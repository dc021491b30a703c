pub mod artifact;
pub mod config;
pub mod decision;
pub mod score;
pub mod snapshot;
pub mod state;
pub mod stats;

pub use artifact::{ArtifactKind, DraftArtifact, ExtractionOutcome};
pub use config::{Backoff, ConfigError, FieldWeights, MonitorConfig, RetryPolicy};
pub use decision::{
    Change, Decision, DecisionEngine, DecisionInput, ManualOverrideDisabled, Phase, SkipReason,
    Verdict,
};
pub use score::{Assessment, Scorer, text_similarity};
pub use snapshot::{ContentHash, Field, FieldDiff, RequirementSnapshot, diff, fingerprint};
pub use state::{ChangeRecord, ErrorRecord, RequirementProcessingState, Trigger};
pub use stats::{MonitorStatistics, RequirementStatistics};
