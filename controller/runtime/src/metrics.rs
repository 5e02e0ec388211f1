use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Per-shard work queue metrics for each pipeline stage.
#[derive(Clone, Debug, Default)]
pub struct QueueMetrics {
    adds: Family<ShardLabels, Counter>,
    retries: Family<ShardLabels, Counter>,
    processed: Family<ShardLabels, Counter>,
    failures: Family<ShardLabels, Counter>,
    depth: Family<ShardLabels, Gauge>,
}

/// The metrics of a single shard.
#[derive(Clone, Debug, Default)]
pub struct ShardMetrics {
    pub(crate) adds: Counter,
    pub(crate) retries: Counter,
    pub(crate) processed: Counter,
    pub(crate) failures: Counter,
    pub(crate) depth: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ShardLabels {
    stage: String,
    shard: String,
}

// === impl QueueMetrics ===

impl QueueMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register("adds", "Count of keys added", metrics.adds.clone());
        prom.register(
            "retries",
            "Count of keys re-added after a backoff",
            metrics.retries.clone(),
        );
        prom.register(
            "processed",
            "Count of keys processed",
            metrics.processed.clone(),
        );
        prom.register(
            "failures",
            "Count of keys whose processing failed",
            metrics.failures.clone(),
        );
        prom.register(
            "depth",
            "The number of keys waiting to be processed",
            metrics.depth.clone(),
        );
        metrics
    }

    pub fn shard(&self, stage: &str, shard: usize) -> ShardMetrics {
        let labels = ShardLabels {
            stage: stage.to_string(),
            shard: shard.to_string(),
        };
        ShardMetrics {
            adds: self.adds.get_or_create(&labels).clone(),
            retries: self.retries.get_or_create(&labels).clone(),
            processed: self.processed.get_or_create(&labels).clone(),
            failures: self.failures.get_or_create(&labels).clone(),
            depth: self.depth.get_or_create(&labels).clone(),
        }
    }
}
