//! Error types for the ER:LC client.
//!
//! # Design
//! Every failure reaches the caller through its own result channel; none of
//! them stop the dispatcher. `Http` keeps the raw status and body so callers
//! can inspect what the API said. Throttling is not an error at all: a
//! throttled request simply waits.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by [`Client`](crate::Client) submissions.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No response was received (connection failure, malformed request).
    #[error("transport error: {0}")]
    Transport(String),

    /// The API answered with a status other than 200.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// A 200 response body could not be decoded into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The request payload could not be encoded as JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The caller stopped waiting. The request itself still runs.
    #[error("no result after {0:?}")]
    Timeout(Duration),

    /// The result channel closed without a result.
    #[error("dispatcher stopped before delivering a result")]
    DispatcherGone,
}

impl ApiError {
    /// Status code for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
