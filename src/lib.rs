//! newsfuse: multi-source news aggregation with duplicate grouping,
//! classification, a TTL + stale-window digest cache, and scheduled push.

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod error;
pub mod metrics;
pub mod model;
pub mod push;
pub mod scheduler;
pub mod sources;

pub use crate::aggregator::Aggregator;
pub use crate::api::{router, AppState};
pub use crate::cache::{DigestCache, Lookup};
pub use crate::config::AppConfig;
pub use crate::error::{ClassifyError, ConfigError, FetchError, PipelineError};
pub use crate::model::{CanonicalItem, Category, Digest, Impact, RawItem};
pub use crate::scheduler::{RunOutcome, Scheduler};
