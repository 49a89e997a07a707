use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for a [super::Bucketizer].
#[derive(Default)]
pub struct Metrics {
    /// Number of records added
    pub records: Counter,
    /// Number of non-empty flushes persisted
    pub flushes: Counter,
    /// Number of records persisted by flushes
    pub flushed_records: Counter,
    /// Number of flushes that failed
    pub flush_failures: Counter,
    /// Number of records currently buffered
    pub buffered: Gauge,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register(
            "records",
            "Number of records added",
            metrics.records.clone(),
        );
        context.register(
            "flushes",
            "Number of non-empty flushes persisted",
            metrics.flushes.clone(),
        );
        context.register(
            "flushed_records",
            "Number of records persisted by flushes",
            metrics.flushed_records.clone(),
        );
        context.register(
            "flush_failures",
            "Number of flushes that failed",
            metrics.flush_failures.clone(),
        );
        context.register(
            "buffered",
            "Number of records currently buffered",
            metrics.buffered.clone(),
        );
        metrics
    }
}
