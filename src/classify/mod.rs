//! Classification orchestration: remote batches first, deterministic
//! lexicon per item when a batch cannot be used. Never fails a run, never
//! reorders items.

pub mod ai;
pub mod lexicon;

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;

use crate::config::AppConfig;
use crate::model::{CanonicalItem, Category, Impact};

use self::ai::{BatchEntry, ClassifyBackend, RawLabel};
use self::lexicon::LexiconClassifier;

pub const DEFAULT_LEXICON_PATH: &str = "config/lexicon.json";

pub struct Classifier {
    backend: Arc<dyn ClassifyBackend>,
    lexicon: LexiconClassifier,
    batch_size: usize,
    timeout: Duration,
}

impl Classifier {
    pub fn new(
        backend: Arc<dyn ClassifyBackend>,
        lexicon: LexiconClassifier,
        batch_size: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            lexicon,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(
            ai::build_backend(&cfg.classifier),
            LexiconClassifier::load_from_file(DEFAULT_LEXICON_PATH),
            cfg.classifier.batch_size,
            cfg.classify_timeout(),
        )
    }

    /// Populate `category`/`impact` for every item. Batches run
    /// concurrently; results are reassembled in input order. A batch that
    /// errors, times out, or answers the wrong length falls back to the
    /// lexicon item by item.
    pub async fn classify(&self, mut items: Vec<CanonicalItem>) -> Vec<CanonicalItem> {
        if items.is_empty() {
            return items;
        }
        counter!("classify_items_total").increment(items.len() as u64);

        let chunks: Vec<Vec<BatchEntry>> = items
            .chunks(self.batch_size)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|it| BatchEntry {
                        title: it.title.clone(),
                        body: it.body.clone(),
                    })
                    .collect()
            })
            .collect();

        let mut handles = Vec::with_capacity(chunks.len());
        for entries in chunks {
            let backend = Arc::clone(&self.backend);
            let timeout = self.timeout;
            handles.push(tokio::spawn(async move {
                match tokio::time::timeout(timeout, backend.classify_batch(&entries)).await {
                    Ok(Ok(labels)) if labels.len() == entries.len() => Some(labels),
                    Ok(Ok(labels)) => {
                        tracing::warn!(
                            expected = entries.len(),
                            got = labels.len(),
                            "classifier answered wrong batch length"
                        );
                        None
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "classifier batch failed");
                        None
                    }
                    Err(_) => {
                        tracing::warn!(timeout_secs = timeout.as_secs(), "classifier batch timed out");
                        None
                    }
                }
            }));
        }

        // Awaiting in spawn order keeps label chunks aligned with item chunks.
        let mut offset = 0usize;
        for handle in handles {
            let chunk_len = (items.len() - offset).min(self.batch_size);
            let outcome = match handle.await {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(error = %e, "classifier batch task panicked");
                    None
                }
            };

            match outcome {
                Some(labels) => {
                    for (item, label) in items[offset..offset + chunk_len].iter_mut().zip(labels) {
                        apply_label(item, &label);
                    }
                }
                None => {
                    counter!("classify_remote_failures_total").increment(1);
                    counter!("classify_fallback_items_total").increment(chunk_len as u64);
                    for item in items[offset..offset + chunk_len].iter_mut() {
                        let (cat, imp) = self.lexicon.classify(&item.title, &item.body);
                        item.category = cat;
                        item.impact = imp;
                    }
                }
            }
            offset += chunk_len;
        }

        items
    }
}

/// Boundary mapping onto the closed sets; out-of-vocabulary labels land on
/// the defined defaults instead of failing the item.
fn apply_label(item: &mut CanonicalItem, label: &RawLabel) {
    item.category = Category::from_label(&label.category);
    item.impact = Impact::from_label(&label.impact);
}
