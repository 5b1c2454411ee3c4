use crate::CaptureError;
use metrics::{
    describe_counter, describe_gauge, describe_histogram, register_counter, register_gauge,
    register_histogram, Counter, Gauge, Histogram,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

/// Metric handles for the capture pipeline.
///
/// Handles registered before a recorder is installed are no-ops, so tests and
/// deployments without `/metrics` pay nothing.
#[derive(Clone)]
pub struct Metrics {
    pub captures_succeeded: Counter,
    pub captures_failed: Counter,
    pub capture_duration: Histogram,
    pub cache_hits: Counter,
    pub cache_misses: Counter,
    pub active_captures: Gauge,
    pub entries_swept: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        describe_counter!("capture_jobs_total", "Capture jobs by outcome");
        describe_histogram!("capture_duration_seconds", "Wall time of capture jobs");
        describe_counter!("capture_cache_lookups_total", "Cache lookups by result");
        describe_gauge!("capture_jobs_active", "Capture jobs holding a gate slot");
        describe_counter!("capture_cache_swept_total", "Expired cache entries removed");

        Self {
            captures_succeeded: register_counter!("capture_jobs_total", "outcome" => "success"),
            captures_failed: register_counter!("capture_jobs_total", "outcome" => "failure"),
            capture_duration: register_histogram!("capture_duration_seconds"),
            cache_hits: register_counter!("capture_cache_lookups_total", "result" => "hit"),
            cache_misses: register_counter!("capture_cache_lookups_total", "result" => "miss"),
            active_captures: register_gauge!("capture_jobs_active"),
            entries_swept: register_counter!("capture_cache_swept_total"),
        }
    }

    pub fn noop() -> Self {
        Self {
            captures_succeeded: Counter::noop(),
            captures_failed: Counter::noop(),
            capture_duration: Histogram::noop(),
            cache_hits: Counter::noop(),
            cache_misses: Counter::noop(),
            active_captures: Gauge::noop(),
            entries_swept: Counter::noop(),
        }
    }

    pub fn record_capture(&self, duration: Duration, success: bool) {
        if success {
            self.captures_succeeded.increment(1);
        } else {
            self.captures_failed.increment(1);
        }
        self.capture_duration.record(duration.as_secs_f64());
    }

    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.increment(1);
        } else {
            self.cache_misses.increment(1);
        }
    }

    pub fn record_sweep(&self, entries: usize) {
        self.entries_swept.increment(entries as u64);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the global Prometheus recorder. Call before [`Metrics::new`].
pub fn install_prometheus() -> Result<PrometheusHandle, CaptureError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| CaptureError::Configuration(format!("metrics recorder: {e}")))?;
    info!("Prometheus recorder installed");
    Ok(handle)
}
