use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerateError {
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed artifact {index}: {reason}")]
    Invalid { index: usize, reason: String },
}

impl GenerateError {
    /// Whether retrying the same request may succeed.
    ///
    /// Network failures, rate limiting and server errors are transient. A
    /// response that parses badly is not: the model answered and the answer
    /// is unusable.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "http")]
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Server { status, .. } => *status == 429 || *status >= 500,
            Self::EmptyResponse => true,
            Self::Json(_) | Self::Invalid { .. } => false,
        }
    }
}
