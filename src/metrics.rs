// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder and register the engine series
    /// (so they show up on /metrics before the first increment).
    pub fn init(worker_pool_size: usize) -> Self {
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        describe_counter!("flux_runs_total", "Poll runs completed.");
        describe_counter!(
            "flux_run_errors_total",
            "Poll runs that ended with an error classification."
        );
        describe_counter!(
            "flux_items_fetched_total",
            "Feed entries parsed across all runs."
        );
        describe_counter!(
            "flux_items_dispatched_total",
            "Items delivered to the destination."
        );
        describe_counter!(
            "flux_items_deduped_total",
            "Items suppressed by an active fingerprint."
        );
        describe_counter!(
            "flux_items_dropped_total",
            "Items excluded by per-source rules."
        );
        describe_histogram!("flux_fetch_ms", "Feed retrieval time in milliseconds.");
        describe_gauge!("flux_sources_registered", "Schedule entries currently held.");
        describe_gauge!(
            "flux_aggressive_mode",
            "1 while the global aggressive override is on."
        );
        describe_gauge!("flux_worker_pool_size", "Configured poll worker bound.");

        gauge!("flux_worker_pool_size").set(worker_pool_size as f64);

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
