//! Push channels: a sealed digest goes out once per scheduled push
//! trigger. Each channel owns its own delivery and retries; the pipeline
//! never tracks delivery success.

pub mod email;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;

use crate::config::AppConfig;
use crate::model::{Digest, Impact};

/// Items listed per message before the summary line truncates.
pub const PUSH_MAX_ITEMS: usize = 15;

#[async_trait]
pub trait DigestDispatcher: Send + Sync {
    fn channel(&self) -> &'static str;

    async fn dispatch(&self, digest: &Digest) -> anyhow::Result<()>;
}

/// Fan-out over every configured channel. A channel that fails to deliver
/// is logged and skipped; the others still get the digest.
#[derive(Default)]
pub struct DispatchMux {
    channels: Vec<Arc<dyn DigestDispatcher>>,
}

impl DispatchMux {
    pub fn new(channels: Vec<Arc<dyn DigestDispatcher>>) -> Self {
        Self { channels }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let mut channels: Vec<Arc<dyn DigestDispatcher>> = Vec::new();

        if let Some(url) = &cfg.push.webhook_url {
            channels.push(Arc::new(webhook::WebhookDispatcher::new(url.clone())));
        }
        if let Some(email_cfg) = &cfg.push.email {
            match email::EmailDispatcher::from_config(email_cfg) {
                Ok(d) => channels.push(Arc::new(d)),
                Err(e) => tracing::warn!(error = ?e, "email channel disabled"),
            }
        }

        Self { channels }
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub async fn dispatch(&self, digest: &Digest) {
        for ch in &self.channels {
            match ch.dispatch(digest).await {
                Ok(()) => {
                    counter!("push_deliveries_total").increment(1);
                    tracing::info!(channel = ch.channel(), digest = %digest.digest_id, "digest pushed");
                }
                Err(e) => {
                    counter!("push_delivery_failures_total").increment(1);
                    tracing::warn!(channel = ch.channel(), error = ?e, "push delivery failed");
                }
            }
        }
    }
}

/// Plain-text rendering shared by the channels: a header with impact
/// counts, the degraded-source note when fetches failed, then the top
/// items with their impact marks.
pub fn render_text(digest: &Digest, max_items: usize) -> String {
    let (pos, neg, neu) = digest.impact_counts();
    let mut out = format!(
        "News digest {} | {} items (+{pos} / -{neg} / ={neu})\n",
        digest.generated_at.format("%Y-%m-%d %H:%M UTC"),
        digest.items.len()
    );

    if !digest.source_failures.is_empty() {
        let failed: Vec<&str> = digest.source_failures.iter().map(String::as_str).collect();
        out.push_str(&format!("degraded: no data from {}\n", failed.join(", ")));
    }

    for (i, item) in digest.items.iter().take(max_items).enumerate() {
        let mark = match item.impact {
            Impact::Positive => "+",
            Impact::Negative => "-",
            _ => "=",
        };
        out.push_str(&format!("{}. [{mark}] {} ({})\n", i + 1, item.title, item.category));
    }

    let rest = digest.items.len().saturating_sub(max_items);
    if rest > 0 {
        out.push_str(&format!("... and {rest} more\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalItem, Category};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn item(title: &str, impact: Impact) -> CanonicalItem {
        CanonicalItem {
            canonical_id: crate::model::stable_id(&[title], 16),
            title: title.to_string(),
            body: String::new(),
            published_at: Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(),
            source_ids: BTreeSet::from(["a".to_string()]),
            category: Category::Markets,
            impact,
            url: None,
        }
    }

    fn digest(items: Vec<CanonicalItem>, failures: &[&str]) -> Digest {
        Digest::seal(
            "2026-01-05",
            items,
            failures.iter().map(|s| s.to_string()).collect(),
            Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(),
        )
    }

    #[test]
    fn render_counts_marks_and_failures() {
        let d = digest(
            vec![
                item("Stocks rally", Impact::Positive),
                item("Bonds slip", Impact::Negative),
                item("Quiet session", Impact::Neutral),
            ],
            &["reuters"],
        );
        let text = render_text(&d, 10);

        assert!(text.starts_with("News digest 2026-01-05 10:00 UTC | 3 items (+1 / -1 / =1)"));
        assert!(text.contains("degraded: no data from reuters"));
        assert!(text.contains("1. [+] Stocks rally (markets)"));
        assert!(text.contains("2. [-] Bonds slip (markets)"));
        assert!(text.contains("3. [=] Quiet session (markets)"));
    }

    #[test]
    fn render_truncates_past_the_cap() {
        let items = (0..20)
            .map(|i| item(&format!("Item {i}"), Impact::Neutral))
            .collect();
        let text = render_text(&digest(items, &[]), 15);

        assert!(text.contains("15. [=] Item 14"));
        assert!(!text.contains("Item 15 ("));
        assert!(text.contains("... and 5 more"));
    }

    #[test]
    fn mux_from_empty_config_has_no_channels() {
        let mut cfg = AppConfig::default_seed();
        cfg.push.webhook_url = None;
        cfg.push.email = None;
        let mux = DispatchMux::from_config(&cfg);
        assert!(mux.is_empty());
    }

    #[tokio::test]
    async fn mux_keeps_going_past_a_failing_channel() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct Failing;
        #[async_trait]
        impl DigestDispatcher for Failing {
            fn channel(&self) -> &'static str {
                "failing"
            }
            async fn dispatch(&self, _d: &Digest) -> anyhow::Result<()> {
                anyhow::bail!("boom")
            }
        }

        struct Counting(AtomicUsize);
        #[async_trait]
        impl DigestDispatcher for Counting {
            fn channel(&self) -> &'static str {
                "counting"
            }
            async fn dispatch(&self, _d: &Digest) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        let channels: Vec<Arc<dyn DigestDispatcher>> =
            vec![Arc::new(Failing), Arc::clone(&counting) as Arc<dyn DigestDispatcher>];
        let mux = DispatchMux::new(channels);
        mux.dispatch(&digest(Vec::new(), &[])).await;
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
