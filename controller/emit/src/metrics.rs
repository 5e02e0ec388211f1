use crate::client::Method;
use meshlb_core::NodeKind;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct EmitMetrics {
    operations: Family<OperationLabels, Counter>,
    rollbacks: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OperationLabels {
    method: String,
    kind: String,
    outcome: String,
}

// === impl EmitMetrics ===

impl EmitMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "operations",
            "Count of operations issued to the remote controller",
            metrics.operations.clone(),
        );
        prom.register(
            "rollbacks",
            "Count of failed emissions whose created objects were rolled back",
            metrics.rollbacks.clone(),
        );
        metrics
    }

    pub(crate) fn record(&self, method: Method, kind: NodeKind, ok: bool) {
        self.operations
            .get_or_create(&OperationLabels {
                method: method.as_str().to_string(),
                kind: kind.as_str().to_string(),
                outcome: if ok { "success" } else { "failure" }.to_string(),
            })
            .inc();
    }

    pub(crate) fn rolled_back(&self) {
        self.rollbacks.inc();
    }
}
