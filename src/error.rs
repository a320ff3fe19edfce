//! Error taxonomy for the pipeline. Failures below the aggregator are
//! recorded, not propagated; only total failure crosses component lines.

use thiserror::Error;

/// Per-source fetch failure. The aggregator records the source id in
/// `source_failures` and keeps going.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {status}")]
    Status { status: u16 },

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Classification backend failure. Both variants are absorbed by the
/// deterministic fallback; a failing backend never fails the run.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier response malformed: {0}")]
    BadResponse(String),
}

/// Errors surfaced to the scheduler and the HTTP layer.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every configured source failed in one run. The cache keeps its
    /// previous entry untouched.
    #[error("aggregation failed: all {attempted} sources failed")]
    AggregationFailed { attempted: usize },

    /// No entry under the key inside its stale window. Readers get this as
    /// an explicit "no data yet" signal, never a block.
    #[error("no digest cached under key {key}")]
    CacheMiss { key: String },
}

/// Invalid or missing configuration. Fatal at startup and only at startup.
#[derive(Debug, Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
