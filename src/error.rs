//! Error taxonomy for per-message processing
//!
//! Every variant is returned to the ingress task that owns the message, which
//! logs it and drops the message. Nothing here is fatal to the process.

use thiserror::Error;

/// Route store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("route {0} not found")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Outbound transport failure
#[derive(Debug, Error)]
#[error("publish to {topic} failed: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

impl PublishError {
    pub fn new(topic: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self { topic: topic.into(), reason: reason.to_string() }
    }
}

/// Errors surfaced while decoding and dispatching one inbound payload
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("malformed payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("unknown event: {0}")]
    UnknownEvent(String),

    #[error("invalid event: {0}")]
    Invalid(String),

    #[error("route {0} not found")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl RouterError {
    /// Short label used for logging and failure counters
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::Decode(_) => "decode",
            RouterError::UnknownEvent(_) => "unknown_event",
            RouterError::Invalid(_) => "invalid",
            RouterError::NotFound(_) => "not_found",
            RouterError::Store(_) => "store",
            RouterError::Publish(_) => "publish",
        }
    }
}

impl From<StoreError> for RouterError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => RouterError::NotFound(id),
            StoreError::Backend(reason) => RouterError::Store(reason),
        }
    }
}
