use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::counter::Counter;

/// Metrics for the [super::Actor].
#[derive(Default)]
pub struct Metrics {
    /// Number of submissions processed
    pub submissions: Counter,
    /// Number of submissions rejected
    pub unsupported: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: E) -> Self {
        let metrics = Self::default();
        context.register(
            "submissions",
            "Number of submissions processed",
            metrics.submissions.clone(),
        );
        context.register(
            "unsupported",
            "Number of submissions rejected",
            metrics.unsupported.clone(),
        );
        metrics
    }
}
