use reqwatch_ai::GenerateError;
use reqwatch_core::ManualOverrideDisabled;
use reqwatch_store::StoreError;
use thiserror::Error;

/// Errors that may clear up if the same call is repeated.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("requirement {0} not found")]
    NotFound(String),

    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("invalid tracker URL: {0}")]
    InvalidUrl(String),

    #[error("tracker unavailable: {0}")]
    Unavailable(String),
}

impl Transient for TrackerError {
    fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "http")]
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Server { status, .. } => *status == 429 || *status >= 500,
            Self::Unavailable(_) => true,
            Self::NotFound(_) | Self::InvalidUrl(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("extraction failed: {0}")]
    Failed(String),
}

impl Transient for ExtractError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Generate(e) => e.is_transient(),
            Self::Tracker(e) => e.is_transient(),
            Self::Failed(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    ManualOverrideDisabled(#[from] ManualOverrideDisabled),

    #[error("requirement {0} is not monitored")]
    NotMonitored(String),

    #[error("requirement id must not be empty")]
    EmptyId,
}
