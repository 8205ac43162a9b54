//! Error taxonomy for a release notification run.
//!
//! Adapter and orchestration code works in `anyhow::Result`; the variants
//! here are the failures callers need to tell apart, and are recovered with
//! `anyhow::Error::downcast_ref::<ReleaseError>()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReleaseError {
    /// A required setting is missing or malformed. Raised before any
    /// forge request is made.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("could not find tag '{tag}'")]
    TagNotFound { tag: String },

    #[error("could not find a tag preceding '{tag}'")]
    NoPreviousTagFound { tag: String },

    #[error("could not find a stable release published before '{tag}'")]
    NoStableRelease { tag: String },

    /// A forge call failed after the adapter's rate-limit retry.
    #[error("forge request '{operation}' failed")]
    ForgeRequest {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{failed} of {attempted} forge operations failed")]
    DispatchFailed { failed: usize, attempted: usize },
}

impl ReleaseError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn forge_request(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ForgeRequest {
            operation: operation.into(),
            source: Box::new(source),
        }
    }
}
