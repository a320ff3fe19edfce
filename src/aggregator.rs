//! One aggregation run end to end: concurrent source fan-out under
//! per-adapter timeouts, duplicate grouping, classification, then a sealed
//! digest and exactly one cache write.
//!
//! Individual sources may fail or time out; their ids are recorded on the
//! digest and the run proceeds. Only a run where every adapter failed
//! surfaces as an error, and such a run never touches the cache.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;

use crate::cache::DigestCache;
use crate::classify::Classifier;
use crate::config::AppConfig;
use crate::dedup::{self, SourcePriority};
use crate::error::{FetchError, PipelineError};
use crate::model::{Digest, RawItem};
use crate::sources::SourceAdapter;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("digest_runs_total", "Successful aggregation runs.");
        describe_counter!(
            "digest_run_failures_total",
            "Runs where every source failed."
        );
        describe_counter!("source_items_total", "Items parsed from source payloads.");
        describe_counter!("source_fetch_failures_total", "Per-source fetch failures.");
        describe_counter!("classify_items_total", "Items sent through classification.");
        describe_counter!(
            "classify_remote_failures_total",
            "Classifier batches that errored or timed out."
        );
        describe_counter!(
            "classify_fallback_items_total",
            "Items labeled by the lexicon fallback."
        );
        describe_histogram!("source_parse_ms", "Source payload parse time in milliseconds.");
        describe_histogram!("digest_run_ms", "Wall time of one aggregation run.");
        describe_gauge!("digest_last_run_ts", "Unix ts of the last sealed digest.");
        describe_gauge!("digest_last_item_count", "Item count of the last sealed digest.");
    });
}

pub struct Aggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    classifier: Classifier,
    cache: Arc<DigestCache>,
    priority: SourcePriority,
    similarity_threshold: f64,
    fetch_timeout: Duration,
    ttl: Duration,
    stale_window: Duration,
}

impl Aggregator {
    pub fn new(
        cfg: &AppConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        classifier: Classifier,
        cache: Arc<DigestCache>,
    ) -> Self {
        Self::with_parts(
            adapters,
            classifier,
            cache,
            SourcePriority::from_order(cfg.source_order()),
            cfg.dedup.similarity_threshold,
            cfg.fetch_timeout(),
            cfg.ttl(),
            cfg.stale_window(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_parts(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        classifier: Classifier,
        cache: Arc<DigestCache>,
        priority: SourcePriority,
        similarity_threshold: f64,
        fetch_timeout: Duration,
        ttl: Duration,
        stale_window: Duration,
    ) -> Self {
        Self {
            adapters,
            classifier,
            cache,
            priority,
            similarity_threshold,
            fetch_timeout,
            ttl,
            stale_window,
        }
    }

    pub fn cache(&self) -> &Arc<DigestCache> {
        &self.cache
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.adapters
            .iter()
            .map(|a| a.source_id().to_string())
            .collect()
    }

    /// Run a full aggregation under the given logical key.
    ///
    /// Exactly one cache write happens, and only when the run succeeds.
    pub async fn run(&self, key: &str) -> Result<Arc<Digest>, PipelineError> {
        ensure_metrics_described();
        let t0 = std::time::Instant::now();

        let (items, source_failures, succeeded) = self.fetch_all().await;
        if succeeded == 0 {
            counter!("digest_run_failures_total").increment(1);
            tracing::error!(key, attempted = self.adapters.len(), "every source failed");
            return Err(PipelineError::AggregationFailed {
                attempted: self.adapters.len(),
            });
        }

        let raw_count = items.len();
        let grouped = dedup::group_items(items, &self.priority, self.similarity_threshold);
        let classified = self.classifier.classify(grouped).await;

        let digest = Digest::seal(key, classified, source_failures, Utc::now());
        let item_count = digest.items.len();
        let failure_count = digest.source_failures.len();
        let entry = self
            .cache
            .put(key, digest, self.ttl, self.stale_window);

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        counter!("digest_runs_total").increment(1);
        histogram!("digest_run_ms").record(ms);
        gauge!("digest_last_run_ts").set(Utc::now().timestamp() as f64);
        gauge!("digest_last_item_count").set(item_count as f64);
        tracing::info!(
            key,
            raw = raw_count,
            items = item_count,
            failed_sources = failure_count,
            elapsed_ms = ms as u64,
            "digest sealed"
        );

        Ok(Arc::clone(&entry.digest))
    }

    /// Concurrent fan-out; every adapter gets its own task and timeout.
    /// Returns the pooled items, the failed source ids, and how many
    /// adapters succeeded.
    async fn fetch_all(&self) -> (Vec<RawItem>, BTreeSet<String>, usize) {
        let mut handles = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let adapter = Arc::clone(adapter);
            let budget = self.fetch_timeout;
            let source = adapter.source_id().to_string();
            let handle = tokio::spawn(async move {
                match tokio::time::timeout(budget, adapter.fetch()).await {
                    Ok(res) => res,
                    Err(_) => Err(FetchError::Timeout {
                        timeout_secs: budget.as_secs(),
                    }),
                }
            });
            handles.push((source, handle));
        }

        let mut items = Vec::new();
        let mut failures = BTreeSet::new();
        let mut succeeded = 0usize;

        for (source, handle) in handles {
            match handle.await {
                Ok(Ok(mut batch)) => {
                    succeeded += 1;
                    tracing::debug!(source = %source, items = batch.len(), "source fetched");
                    items.append(&mut batch);
                }
                Ok(Err(e)) => {
                    tracing::warn!(source = %source, error = %e, "source failed");
                    counter!("source_fetch_failures_total").increment(1);
                    failures.insert(source);
                }
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "source task aborted");
                    counter!("source_fetch_failures_total").increment(1);
                    failures.insert(source);
                }
            }
        }

        (items, failures, succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ai::UnavailableBackend;
    use crate::classify::lexicon::LexiconClassifier;
    use crate::model::{Category, Impact};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Items(Vec<RawItem>),
        Fail,
        Hang,
    }

    struct StubSource {
        id: String,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(id: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for StubSource {
        fn source_id(&self) -> &str {
            &self.id
        }

        async fn fetch(&self) -> Result<Vec<RawItem>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Items(items) => Ok(items.clone()),
                Behavior::Fail => Err(FetchError::Malformed("bad payload".into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn raw(source: &str, ext: &str, title: &str, minute: u32) -> RawItem {
        RawItem {
            source_id: source.to_string(),
            external_id: ext.to_string(),
            title: title.to_string(),
            body: String::new(),
            published_at: Utc.with_ymd_and_hms(2026, 1, 5, 10, minute, 0).unwrap(),
            url: None,
        }
    }

    fn aggregator(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        order: &[&str],
        threshold: f64,
    ) -> Aggregator {
        let classifier = Classifier::new(
            Arc::new(UnavailableBackend),
            LexiconClassifier::new(),
            10,
            Duration::from_millis(100),
        );
        Aggregator::with_parts(
            adapters,
            classifier,
            Arc::new(DigestCache::new()),
            SourcePriority::from_order(order.iter().map(|s| s.to_string()).collect()),
            threshold,
            Duration::from_millis(100),
            Duration::from_secs(60),
            Duration::from_secs(120),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_is_recorded_and_run_proceeds() {
        let a = StubSource::new("a", Behavior::Items(vec![raw("a", "1", "Fed raises rates 0.25%", 0)]));
        let b = StubSource::new("b", Behavior::Items(vec![raw("b", "2", "Oil climbs 2% on supply cuts", 1)]));
        let slow = StubSource::new("slow", Behavior::Hang);

        let agg = aggregator(vec![a, b, slow], &["a", "b", "slow"], 0.6);
        let digest = agg.run("2026-01-05").await.unwrap();

        assert_eq!(digest.items.len(), 2);
        assert_eq!(
            digest.source_failures.iter().cloned().collect::<Vec<_>>(),
            vec!["slow".to_string()]
        );
        // the one successful run wrote the one cache entry
        assert_eq!(agg.cache().len(), 1);
        assert!(agg.cache().get("2026-01-05").is_fresh());
    }

    #[tokio::test]
    async fn total_failure_errors_and_leaves_cache_untouched() {
        let a = StubSource::new("a", Behavior::Fail);
        let b = StubSource::new("b", Behavior::Fail);
        let agg = aggregator(vec![a, b], &["a", "b"], 0.6);

        let err = agg.run("2026-01-05").await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::AggregationFailed { attempted: 2 }
        ));
        assert!(agg.cache().is_empty());
    }

    #[tokio::test]
    async fn empty_but_successful_source_counts_as_success() {
        let empty = StubSource::new("a", Behavior::Items(Vec::new()));
        let broken = StubSource::new("b", Behavior::Fail);
        let agg = aggregator(vec![empty, broken], &["a", "b"], 0.6);

        let digest = agg.run("2026-01-05").await.unwrap();
        assert!(digest.items.is_empty());
        assert_eq!(digest.source_failures.len(), 1);
        assert_eq!(agg.cache().len(), 1);
    }

    #[tokio::test]
    async fn duplicates_across_sources_merge_and_classify() {
        let a = StubSource::new("a", Behavior::Items(vec![raw("a", "1", "Fed raises rates 0.25%", 0)]));
        let b = StubSource::new(
            "b",
            Behavior::Items(vec![raw("b", "2", "Fed raises rates 0.25 %", 2)]),
        );
        let agg = aggregator(vec![a, b], &["a", "b"], 0.6);

        let digest = agg.run("2026-01-05").await.unwrap();
        assert_eq!(digest.items.len(), 1);
        let item = &digest.items[0];
        assert_eq!(item.source_ids.len(), 2);
        assert_eq!(item.category, Category::MonetaryPolicy);
        assert_eq!(item.impact, Impact::Negative);
        assert_eq!(
            item.published_at,
            Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn each_adapter_called_once_per_run() {
        let a = StubSource::new("a", Behavior::Items(Vec::new()));
        let b = StubSource::new("b", Behavior::Items(Vec::new()));
        let (ca, cb) = (Arc::clone(&a), Arc::clone(&b));

        let agg = aggregator(vec![a, b], &["a", "b"], 0.6);
        agg.run("2026-01-05").await.unwrap();

        assert_eq!(ca.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cb.calls.load(Ordering::SeqCst), 1);
    }
}
