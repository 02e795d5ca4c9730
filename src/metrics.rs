use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish the feed cache TTL once.
    pub fn init(ttl_seconds: u64) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        describe_counter!("feed_cache_hits_total", "Feed cache lookups served from cache");
        describe_counter!("feed_cache_misses_total", "Feed cache lookups that had to rank");
        describe_counter!("feed_cache_evictions_total", "Entries dropped to stay within capacity");
        describe_gauge!("feed_cache_entries", "Users with a resident ranked feed");
        describe_histogram!("feed_rank_duration_ms", "Time to serve one feed page");

        // absolute TTL, entries are never refreshed on read
        gauge!("feed_cache_ttl_seconds").set(ttl_seconds as f64);

        Ok(Self { handle })
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
