//! newsfuse binary: load config, wire the pipeline, spawn the schedules,
//! serve the read API.

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newsfuse::aggregator::Aggregator;
use newsfuse::api::{self, AppState};
use newsfuse::cache::DigestCache;
use newsfuse::classify::Classifier;
use newsfuse::config::AppConfig;
use newsfuse::metrics::Metrics;
use newsfuse::push::DispatchMux;
use newsfuse::scheduler::Scheduler;
use newsfuse::sources;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("newsfuse=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op where the environment is already set.
    let _ = dotenvy::dotenv();
    init_tracing();

    // Missing or invalid configuration is fatal here and nowhere else.
    let cfg = AppConfig::load()?;
    let tz = cfg.tz()?;
    let metrics = Metrics::init(cfg.cache.ttl_secs, cfg.cache.stale_window_secs);

    let adapters = sources::build_adapters(&cfg);
    let classifier = Classifier::from_config(&cfg);
    let cache = Arc::new(DigestCache::new());
    let aggregator = Arc::new(Aggregator::new(&cfg, adapters, classifier, cache));
    let scheduler = Arc::new(Scheduler::new(aggregator, tz));

    Arc::clone(&scheduler).spawn_refresh_loop(cfg.refresh_interval(), cfg.schedule.warm_on_start);

    let mux = Arc::new(DispatchMux::from_config(&cfg));
    if mux.is_empty() {
        tracing::info!("no push channels configured; scheduled pushes are disabled");
    } else {
        Arc::clone(&scheduler).spawn_push_loop(cfg.push_times(), mux);
    }

    let app = api::router(AppState::new(&cfg, Arc::clone(&scheduler))).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!(
        addr = %cfg.bind_addr,
        tz = %cfg.timezone,
        sources = cfg.sources.len(),
        "newsfuse serving"
    );
    axum::serve(listener, app).await?;
    Ok(())
}
