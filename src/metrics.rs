use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder and pin static gauges for the
    /// configured cache windows.
    pub fn init(ttl_secs: u64, stale_window_secs: u64) -> Self {
        // Use default buckets to avoid API differences across crate versions.
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        gauge!("digest_cache_ttl_seconds").set(ttl_secs as f64);
        gauge!("digest_cache_stale_window_seconds").set(stale_window_secs as f64);

        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
