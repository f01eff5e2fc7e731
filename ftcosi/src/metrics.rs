use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::counter::Counter;

/// Metrics for the [crate::Engine].
#[derive(Default)]
pub struct Metrics {
    /// Number of runs started by this node
    pub started: Counter,
    /// Number of runs that produced a certificate
    pub succeeded: Counter,
    /// Number of runs that failed
    pub failed: Counter,
    /// Number of valid shares received
    pub shares: Counter,
    /// Number of valid partial aggregates received
    pub partials: Counter,
    /// Number of invalid messages received
    pub invalid: Counter,
    /// Number of collections that reached their deadline
    pub timeouts: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let metrics = Self::default();
        context.register("started", "Number of runs started", metrics.started.clone());
        context.register(
            "succeeded",
            "Number of runs that produced a certificate",
            metrics.succeeded.clone(),
        );
        context.register("failed", "Number of runs that failed", metrics.failed.clone());
        context.register(
            "shares",
            "Number of valid shares received",
            metrics.shares.clone(),
        );
        context.register(
            "partials",
            "Number of valid partial aggregates received",
            metrics.partials.clone(),
        );
        context.register(
            "invalid",
            "Number of invalid messages received",
            metrics.invalid.clone(),
        );
        context.register(
            "timeouts",
            "Number of collections that reached their deadline",
            metrics.timeouts.clone(),
        );
        metrics
    }
}
