//! Prometheus metrics for the idler
//!
//! Request durations are recorded per (service, operation, status) for the
//! control plane's idle/unidle paths; the engine adds counters for dropped
//! notifications, issued transitions and watch reconnects.

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

/// Histogram buckets for platform request durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static GLOBAL_METRICS: OnceLock<IdlerMetricsInner> = OnceLock::new();

struct IdlerMetricsInner {
    request_duration_seconds: HistogramVec,
    events_dropped: IntCounter,
    transitions: IntCounterVec,
    watch_reconnects: IntCounter,
    tracked_users: IntGauge,
}

impl IdlerMetricsInner {
    fn new() -> Self {
        Self {
            request_duration_seconds: register_histogram_vec!(
                "jenkins_idler_request_duration_seconds",
                "Duration of platform idle/unidle requests",
                &["service", "operation", "status"],
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register request_duration_seconds"),

            events_dropped: register_int_counter!(
                "jenkins_idler_events_dropped_total",
                "Observation events discarded because an idler channel was full"
            )
            .expect("Failed to register events_dropped"),

            transitions: register_int_counter_vec!(
                "jenkins_idler_transitions_total",
                "Idle/unidle transitions issued by user idlers",
                &["operation", "outcome"]
            )
            .expect("Failed to register transitions"),

            watch_reconnects: register_int_counter!(
                "jenkins_idler_watch_reconnects_total",
                "Reconnections of the platform watch streams"
            )
            .expect("Failed to register watch_reconnects"),

            tracked_users: register_int_gauge!(
                "jenkins_idler_tracked_users",
                "Namespaces with a live idler"
            )
            .expect("Failed to register tracked_users"),
        }
    }
}

/// Lightweight handle to the global metrics instance.
#[derive(Clone, Default)]
pub struct IdlerMetrics {
    _private: (),
}

impl IdlerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(IdlerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &IdlerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    /// Record one platform request on the idle/unidle path.
    pub fn observe_request(&self, service: &str, operation: &str, status: u16, seconds: f64) {
        self.inner()
            .request_duration_seconds
            .with_label_values(&[service, operation, &status.to_string()])
            .observe(seconds);
    }

    pub fn inc_events_dropped(&self) {
        self.inner().events_dropped.inc();
    }

    pub fn inc_transition(&self, operation: &str, outcome: &str) {
        self.inner()
            .transitions
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn inc_watch_reconnects(&self) {
        self.inner().watch_reconnects.inc();
    }

    pub fn inc_tracked_users(&self) {
        self.inner().tracked_users.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle() {
        let metrics = IdlerMetrics::new();
        metrics.observe_request("jenkins", "Idle", 200, 0.2);
        metrics.inc_events_dropped();
        metrics.inc_transition("UnIdle", "ok");
        metrics.inc_watch_reconnects();
        metrics.inc_tracked_users();
    }
}
