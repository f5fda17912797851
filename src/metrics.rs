use std::sync::Arc;
use std::time::Duration;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub endpoint: Endpoint,
    pub outcome: String,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Endpoint {
    Add,
    View,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct GitOperationLabels {
    pub operation: GitOperation,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum GitOperation {
    Clone,
    Commit,
    Push,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct UpstreamLabels {
    pub status: String,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the service.
pub struct Metrics {
    pub requests_total: Family<RequestLabels, Counter>,
    pub git_operation_duration_seconds: Family<GitOperationLabels, Histogram>,
    pub upstream_reads_total: Family<UpstreamLabels, Counter>,
}

impl Metrics {
    pub fn new(registry: &mut Registry) -> Self {
        let requests_total = Family::<RequestLabels, Counter>::default();
        registry.register(
            "whitelist_requests",
            "Whitelist API requests by endpoint and outcome",
            requests_total.clone(),
        );

        let git_operation_duration_seconds =
            Family::<GitOperationLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.05, 2.0, 12))
            });
        registry.register(
            "whitelist_git_operation_duration_seconds",
            "Duration of clone, commit and push steps in seconds",
            git_operation_duration_seconds.clone(),
        );

        let upstream_reads_total = Family::<UpstreamLabels, Counter>::default();
        registry.register(
            "whitelist_upstream_reads",
            "Raw-content reads against the upstream by response status",
            upstream_reads_total.clone(),
        );

        Self {
            requests_total,
            git_operation_duration_seconds,
            upstream_reads_total,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Cheaply cloneable handle to the registry and its metrics.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    pub fn record_request(&self, endpoint: Endpoint, outcome: &str) {
        self.metrics
            .requests_total
            .get_or_create(&RequestLabels {
                endpoint,
                outcome: outcome.to_string(),
            })
            .inc();
    }

    pub fn observe_git(&self, operation: GitOperation, elapsed: Duration) {
        self.metrics
            .git_operation_duration_seconds
            .get_or_create(&GitOperationLabels { operation })
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_upstream_read(&self, status: &str) {
        self.metrics
            .upstream_reads_total
            .get_or_create(&UpstreamLabels {
                status: status.to_string(),
            })
            .inc();
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
