use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for an [super::Indexer].
#[derive(Default)]
pub struct Metrics {
    /// Number of rebuild cycles started
    pub cycles: Counter,
    /// Number of rebuild cycles that failed
    pub failures: Counter,
    /// Number of snapshots published
    pub published: Counter,
    /// Number of buckets skipped because they could not be read
    pub skipped_buckets: Counter,
    /// Number of entries in the most recently published snapshot
    pub entries: Gauge,
    /// Current phase of the rebuild cycle
    pub phase: Gauge,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register(
            "cycles",
            "Number of rebuild cycles started",
            metrics.cycles.clone(),
        );
        context.register(
            "failures",
            "Number of rebuild cycles that failed",
            metrics.failures.clone(),
        );
        context.register(
            "published",
            "Number of snapshots published",
            metrics.published.clone(),
        );
        context.register(
            "skipped_buckets",
            "Number of buckets skipped because they could not be read",
            metrics.skipped_buckets.clone(),
        );
        context.register(
            "entries",
            "Number of entries in the most recently published snapshot",
            metrics.entries.clone(),
        );
        context.register(
            "phase",
            "Current phase of the rebuild cycle",
            metrics.phase.clone(),
        );
        metrics
    }
}
