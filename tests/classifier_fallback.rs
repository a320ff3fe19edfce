//! Fallback completeness: whatever the remote backend does, every item
//! leaves classification with a category and an impact, in input order.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use newsfuse::classify::ai::{BatchEntry, ClassifyBackend, RawLabel};
use newsfuse::classify::lexicon::LexiconClassifier;
use newsfuse::classify::Classifier;
use newsfuse::error::ClassifyError;
use newsfuse::model::{CanonicalItem, Category, Impact};

fn item(title: &str, minute: u32) -> CanonicalItem {
    CanonicalItem {
        canonical_id: newsfuse::model::stable_id(&[title], 16),
        title: title.to_string(),
        body: String::new(),
        published_at: Utc.with_ymd_and_hms(2026, 1, 5, 10, minute, 0).unwrap(),
        source_ids: BTreeSet::from(["a".to_string()]),
        category: Category::Unclassified,
        impact: Impact::Unclassified,
        url: None,
    }
}

fn newsroom() -> Vec<CanonicalItem> {
    vec![
        item("Fed raises rates 0.25%", 0),
        item("Oil climbs 2% on supply cuts", 1),
        item("Nvidia earnings beat expectations", 2),
        item("Quiet afternoon at the village fair", 3),
        item("Bitcoin falls below key support", 4),
    ]
}

/// Backend that always errors, as a forced outage.
struct BrokenBackend;

#[async_trait]
impl ClassifyBackend for BrokenBackend {
    async fn classify_batch(&self, _entries: &[BatchEntry]) -> Result<Vec<RawLabel>, ClassifyError> {
        Err(ClassifyError::Unavailable("forced outage".into()))
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

#[tokio::test]
async fn forced_outage_still_labels_every_item() {
    let classifier = Classifier::new(
        Arc::new(BrokenBackend),
        LexiconClassifier::new(),
        2, // several batches, all of which fail
        Duration::from_millis(100),
    );

    let input = newsroom();
    let titles: Vec<String> = input.iter().map(|i| i.title.clone()).collect();
    let out = classifier.classify(input).await;

    // order preserved
    assert_eq!(
        out.iter().map(|i| i.title.clone()).collect::<Vec<_>>(),
        titles
    );
    // every item carries a defined label pair
    for it in &out {
        assert!(matches!(
            it.impact,
            Impact::Positive | Impact::Negative | Impact::Neutral | Impact::Unclassified
        ));
        assert_ne!(it.impact, Impact::Unclassified, "{} left unlabeled", it.title);
    }

    // the lexicon recognizes the market items, and the off-topic one lands
    // on the defined defaults rather than an error
    assert_eq!(out[0].category, Category::MonetaryPolicy);
    assert_eq!(out[0].impact, Impact::Negative);
    assert_eq!(out[3].category, Category::Unclassified);
    assert_eq!(out[3].impact, Impact::Neutral);
}

/// Backend that garbles every reply (wrong length).
struct ShortBackend;

#[async_trait]
impl ClassifyBackend for ShortBackend {
    async fn classify_batch(&self, _entries: &[BatchEntry]) -> Result<Vec<RawLabel>, ClassifyError> {
        Ok(vec![RawLabel {
            category: "markets".into(),
            impact: "positive".into(),
        }])
    }

    fn name(&self) -> &'static str {
        "short"
    }
}

#[tokio::test]
async fn wrong_length_replies_take_the_fallback_path() {
    let classifier = Classifier::new(
        Arc::new(ShortBackend),
        LexiconClassifier::new(),
        10,
        Duration::from_millis(100),
    );

    let out = classifier.classify(newsroom()).await;
    // a 1-label answer to a 5-item batch is unusable; the lexicon labels all
    assert_eq!(out[1].category, Category::Commodities);
    assert_eq!(out[1].impact, Impact::Positive);
    assert!(out.iter().all(|i| i.impact != Impact::Unclassified));
}

#[tokio::test]
async fn out_of_vocabulary_labels_map_to_defaults() {
    struct WeirdBackend;

    #[async_trait]
    impl ClassifyBackend for WeirdBackend {
        async fn classify_batch(
            &self,
            entries: &[BatchEntry],
        ) -> Result<Vec<RawLabel>, ClassifyError> {
            Ok(entries
                .iter()
                .map(|_| RawLabel {
                    category: "celebrity-gossip".into(),
                    impact: "sideways".into(),
                })
                .collect())
        }

        fn name(&self) -> &'static str {
            "weird"
        }
    }

    let classifier = Classifier::new(
        Arc::new(WeirdBackend),
        LexiconClassifier::new(),
        10,
        Duration::from_millis(100),
    );

    let out = classifier.classify(vec![item("Anything at all", 0)]).await;
    assert_eq!(out[0].category, Category::Unclassified);
    assert_eq!(out[0].impact, Impact::Neutral);
}
