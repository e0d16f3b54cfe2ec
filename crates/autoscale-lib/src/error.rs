//! Error types for the autoscaler

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the fleet manager, the cluster master or an agent
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("{url} rejected the configured credentials")]
    Unauthorized { url: String },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("hostname not found within pid: {0}")]
    InvalidPid(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no endpoints configured")]
    NoEndpoints,
}

impl FetchError {
    /// True when retrying with the same credentials cannot succeed
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FetchError::Unauthorized { .. })
    }
}

/// Malformed or missing scaling policy labels on an application
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("label {0} is missing")]
    MissingLabel(&'static str),

    #[error("label {label} is not an integer: {value:?}")]
    InvalidInteger { label: &'static str, value: String },

    #[error("label {label} must be positive, got {value}")]
    NotPositive { label: &'static str, value: i64 },

    #[error("unknown trigger mode: {0:?}")]
    UnknownTriggerMode(String),
}

/// Scale command rejected by, or undeliverable to, the fleet manager
#[derive(Debug, Error)]
#[error("scaling {app_id} to {target} instances failed: {source}")]
pub struct ActuationError {
    pub app_id: String,
    pub target: u32,
    #[source]
    pub source: FetchError,
}

/// Reason a whole cycle was abandoned
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("fetching {resource} failed: {source}")]
    Fetch {
        resource: &'static str,
        #[source]
        source: FetchError,
    },

    #[error("cycle deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("cycle cancelled by shutdown")]
    Cancelled,
}

impl CycleError {
    pub(crate) fn fetch(resource: &'static str) -> impl FnOnce(FetchError) -> CycleError {
        move |source| CycleError::Fetch { resource, source }
    }
}
