//! Thin read surface over the cache plus a manual refresh trigger. The
//! router never runs an aggregation inline: stale hits and misses only
//! request a coalesced background refresh and answer immediately.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::cache::{CacheEntry, DigestCache, Lookup};
use crate::config::AppConfig;
use crate::scheduler::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<DigestCache>,
    pub scheduler: Arc<Scheduler>,
    pub sources: Arc<Vec<SourceInfo>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub name: String,
    /// Position in the configured priority order; 0 wins merge ties.
    pub priority: usize,
}

impl AppState {
    pub fn new(cfg: &AppConfig, scheduler: Arc<Scheduler>) -> Self {
        let sources = cfg
            .sources
            .iter()
            .enumerate()
            .map(|(i, s)| SourceInfo {
                id: s.id.clone(),
                name: cfg.display_name(&s.id),
                priority: i,
            })
            .collect();
        Self {
            cache: Arc::clone(scheduler.cache()),
            scheduler,
            sources: Arc::new(sources),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/digest", get(get_digest))
        .route("/sources", get(get_sources))
        .route("/healthz", get(|| async { "ok" }))
        .route("/refresh", post(refresh_now))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn get_digest(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let key = state.scheduler.current_key();
    match state.cache.get(&key) {
        Lookup::Fresh(entry) => (StatusCode::OK, Json(digest_body(&entry, false))),
        Lookup::Stale(entry) => {
            // serve the stale copy now, refresh behind the reader's back
            state.scheduler.spawn_refresh();
            (StatusCode::OK, Json(digest_body(&entry, true)))
        }
        Lookup::Miss => {
            state.scheduler.spawn_refresh();
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "no data yet", "key": key })),
            )
        }
    }
}

fn digest_body(entry: &CacheEntry, stale: bool) -> Value {
    json!({
        "key": entry.key,
        "stale": stale,
        "stored_at": entry.stored_at,
        "expires_at": entry.expires_at,
        "digest": &*entry.digest,
    })
}

async fn get_sources(State(state): State<AppState>) -> Json<Vec<SourceInfo>> {
    Json((*state.sources).clone())
}

async fn refresh_now(State(state): State<AppState>) -> Json<Value> {
    let started = state.scheduler.spawn_refresh();
    let status = if started { "started" } else { "coalesced" };
    Json(json!({ "status": status }))
}
