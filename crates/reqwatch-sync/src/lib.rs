//! Sync layer: tracker and extraction contracts, the per-requirement
//! orchestrator, and the polling scheduler.

mod claims;
mod clock;
mod error;
mod extract;
mod orchestrator;
mod retry;
pub mod scheduler;
mod tracker;

#[cfg(feature = "http")]
pub mod http;

#[cfg(test)]
mod testing;

pub use claims::{Claim, ClaimRegistry};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ExtractError, SyncError, TrackerError, Transient};
pub use extract::{ExtractionCollaborator, GeneratedExtraction};
pub use orchestrator::{CycleResult, Orchestrator};
pub use retry::with_retry;
pub use tracker::{RequirementFilter, TrackerClient};

#[cfg(feature = "http")]
pub use http::HttpTracker;
