//! Router behavior over the cache: fresh and stale hits answer 200 with
//! the digest, a miss answers 404 "no data yet", and neither ever blocks
//! on aggregation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{TimeZone, Utc};
use newsfuse::aggregator::Aggregator;
use newsfuse::api::{router, AppState};
use newsfuse::cache::DigestCache;
use newsfuse::classify::ai::UnavailableBackend;
use newsfuse::classify::lexicon::LexiconClassifier;
use newsfuse::classify::Classifier;
use newsfuse::config::{logical_day_key, AppConfig};
use newsfuse::dedup::SourcePriority;
use newsfuse::error::FetchError;
use newsfuse::model::{Digest, RawItem};
use newsfuse::scheduler::Scheduler;
use newsfuse::sources::SourceAdapter;
use tower::ServiceExt;

struct StubSource {
    id: String,
    delay: Duration,
}

#[async_trait]
impl SourceAdapter for StubSource {
    fn source_id(&self) -> &str {
        &self.id
    }

    async fn fetch(&self) -> Result<Vec<RawItem>, FetchError> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![RawItem {
            source_id: self.id.clone(),
            external_id: "1".to_string(),
            title: "Fed raises rates 0.25%".to_string(),
            body: String::new(),
            published_at: Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap(),
            url: None,
        }])
    }
}

fn test_config() -> AppConfig {
    let toml_s = r#"
        timezone = "UTC"

        [[sources]]
        id = "wire-a"
        kind = "newswire"
        url = "https://wire-a.test/api"
        display_name = "Wire A"

        [[sources]]
        id = "wire-b"
        kind = "newswire"
        url = "https://wire-b.test/api"
    "#;
    let cfg: AppConfig = toml::from_str(toml_s).unwrap();
    cfg.validate().unwrap();
    cfg
}

fn state_with_delay(delay: Duration) -> AppState {
    let cfg = test_config();
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(StubSource {
        id: "wire-a".to_string(),
        delay,
    })];
    let classifier = Classifier::new(
        Arc::new(UnavailableBackend),
        LexiconClassifier::new(),
        10,
        Duration::from_millis(100),
    );
    let aggregator = Arc::new(Aggregator::with_parts(
        adapters,
        classifier,
        Arc::new(DigestCache::new()),
        SourcePriority::from_order(cfg.source_order()),
        0.6,
        Duration::from_secs(30),
        Duration::from_secs(60),
        Duration::from_secs(120),
    ));
    let scheduler = Arc::new(Scheduler::new(aggregator, chrono_tz::UTC));
    AppState::new(&cfg, scheduler)
}

fn today_key() -> String {
    logical_day_key(chrono_tz::UTC, Utc::now())
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_answers_ok() {
    let app = router(state_with_delay(Duration::ZERO));
    let resp = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn sources_lists_ids_in_priority_order() {
    let app = router(state_with_delay(Duration::ZERO));
    let resp = app
        .oneshot(Request::builder().uri("/sources").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body[0]["id"], "wire-a");
    assert_eq!(body[0]["name"], "Wire A");
    assert_eq!(body[0]["priority"], 0);
    assert_eq!(body[1]["id"], "wire-b");
    assert_eq!(body[1]["name"], "wire-b");
    assert_eq!(body[1]["priority"], 1);
}

#[tokio::test]
async fn empty_cache_is_an_explicit_404() {
    let state = state_with_delay(Duration::from_secs(30));
    let app = router(state);

    let resp = app
        .oneshot(Request::builder().uri("/digest").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body = body_json(resp).await;
    assert_eq!(body["error"], "no data yet");
}

#[tokio::test]
async fn fresh_entry_serves_200_without_stale_flag() {
    let state = state_with_delay(Duration::ZERO);
    state.scheduler.run_now().await;
    let app = router(state);

    let resp = app
        .oneshot(Request::builder().uri("/digest").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["stale"], false);
    assert_eq!(body["digest"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["digest"]["items"][0]["category"], "monetary-policy");
}

#[tokio::test]
async fn stale_entry_serves_200_flagged_and_never_blocks() {
    // adapter slow enough that a blocking refresh would be obvious
    let state = state_with_delay(Duration::from_secs(30));
    let digest = Digest::seal(&today_key(), Vec::new(), Default::default(), Utc::now());
    state
        .cache
        .put(&today_key(), digest, Duration::ZERO, Duration::from_secs(3600));
    let app = router(state.clone());

    let started = std::time::Instant::now();
    let resp = app
        .oneshot(Request::builder().uri("/digest").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "reader blocked on refresh"
    );

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["stale"], true);
    // the stale read kicked off a background refresh
    assert!(state.scheduler.is_running());
}

#[tokio::test]
async fn manual_refresh_reports_started_then_coalesced() {
    let state = state_with_delay(Duration::from_secs(30));
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/refresh")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["status"], "started");

    // the first run is still fetching; a second request coalesces
    let resp = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/refresh")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["status"], "coalesced");
}
