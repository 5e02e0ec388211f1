use kube::ResourceExt;
use kubert::index::NamespacedRemoved;
use parking_lot::RwLock;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;

/// Counts watch events per kind and tracks the number of objects held per namespace.
#[derive(Clone, Debug, Default)]
pub struct IndexMetrics {
    index_size: Family<NamespacedIndexLabels, Gauge>,
    index_applies: Family<NamespacedIndexLabels, Counter>,
    index_deletes: Family<NamespacedIndexLabels, Counter>,
    index_resets: Family<IndexLabels, Counter>,
}

/// Wraps an index so that every event it observes is recorded.
#[derive(Debug)]
pub struct Metered<T> {
    inner: T,
    metrics: IndexMetrics,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespacedIndexLabels {
    namespace: String,
    kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

pub trait SizedIndex<R> {
    fn size(&self, namespace: &str) -> usize;
}

impl<T, R> SizedIndex<R> for Arc<RwLock<T>>
where
    T: SizedIndex<R>,
{
    fn size(&self, namespace: &str) -> usize {
        self.read().size(namespace)
    }
}

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "size",
            "The number of objects held in the config store",
            metrics.index_size.clone(),
        );
        prom.register(
            "applies",
            "Count of objects applied to the config store",
            metrics.index_applies.clone(),
        );
        prom.register(
            "deletes",
            "Count of objects deleted from the config store",
            metrics.index_deletes.clone(),
        );
        prom.register(
            "resets",
            "Count of complete snapshots applied to the config store",
            metrics.index_resets.clone(),
        );
        metrics
    }

    pub fn wrap<T>(&self, inner: T) -> Metered<T> {
        Metered {
            inner,
            metrics: self.clone(),
        }
    }

    fn set_size(&self, kind: &str, namespace: String, size: usize) {
        self.index_size
            .get_or_create(&NamespacedIndexLabels {
                namespace,
                kind: kind.to_string(),
            })
            .set(size as i64);
    }
}

// === impl Metered ===

impl<T> Metered<T> {
    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }
}

impl<R, T> kubert::index::IndexNamespacedResource<R> for Metered<Arc<RwLock<T>>>
where
    T: SizedIndex<R>,
    T: kubert::index::IndexNamespacedResource<R>,
    R: ResourceExt<DynamicType = ()>,
{
    fn apply(&mut self, resource: R) {
        let kind = R::kind(&());
        let namespace = resource.namespace().unwrap_or_default();
        self.metrics
            .index_applies
            .get_or_create(&NamespacedIndexLabels {
                namespace: namespace.clone(),
                kind: kind.to_string(),
            })
            .inc();
        self.inner.write().apply(resource);
        let size = SizedIndex::<R>::size(&self.inner, &namespace);
        self.metrics.set_size(&kind, namespace, size);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let kind = R::kind(&());
        self.metrics
            .index_deletes
            .get_or_create(&NamespacedIndexLabels {
                namespace: namespace.clone(),
                kind: kind.to_string(),
            })
            .inc();
        self.inner.write().delete(namespace.clone(), name);
        let size = SizedIndex::<R>::size(&self.inner, &namespace);
        self.metrics.set_size(&kind, namespace, size);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        let kind = R::kind(&());
        let mut namespaces = resources
            .iter()
            .flat_map(|r| r.namespace())
            .chain(removed.keys().cloned())
            .collect::<Vec<_>>();
        namespaces.sort();
        namespaces.dedup();
        self.metrics
            .index_resets
            .get_or_create(&IndexLabels {
                kind: kind.to_string(),
            })
            .inc();
        self.inner.write().reset(resources, removed);
        for ns in namespaces {
            let size = SizedIndex::<R>::size(&self.inner, &ns);
            self.metrics.set_size(&kind, ns, size);
        }
    }
}
