use crate::{
    convert::{self, IntoConfig},
    diff::{self, Updates, Versions},
    metrics::SizedIndex,
    store::SharedStore,
};
use ahash::AHashSet as HashSet;
use kubert::index::NamespacedRemoved;
use meshlb_core::{ConfigObject, Kind, ObjectKey, ResourceId};
use parking_lot::RwLock;
use std::sync::Arc;

/// Receives the keys of changed configuration objects.
pub trait Enqueue {
    fn enqueue(&self, key: ObjectKey);
}

/// Applies configuration events to the store and enqueues the keys whose versions changed.
///
/// Implements [`kubert::index::IndexNamespacedResource`] for every resource type that converts
/// into a configuration object, so one feed may be shared by several watches.
#[derive(Clone, Debug)]
pub struct Feed<Q> {
    store: SharedStore,
    queue: Q,
}

// === impl Feed ===

impl<Q: Enqueue> Feed<Q> {
    pub fn new(store: SharedStore, queue: Q) -> Self {
        Self { store, queue }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Upserts a single object.
    pub fn apply_object(&self, obj: ConfigObject) {
        let kind = obj.kind();
        let ResourceId { namespace, name } = obj.id.clone();
        let curr = diff::single(&namespace, &name, Some(obj.version.clone()));
        let prev = diff::single(&namespace, &name, self.store.update(obj));
        self.enqueue_updates(kind, diff::calculate_updates(&prev, &curr));
    }

    /// Removes a single object.
    pub fn delete_object(&self, kind: Kind, namespace: &str, name: &str) {
        let prev = diff::single(namespace, name, self.store.version(kind, namespace, name));
        if self.store.delete(kind, namespace, name) {
            self.enqueue_updates(kind, diff::calculate_updates(&prev, &Versions::new()));
        }
    }

    /// Replaces every object of a kind with a complete snapshot.
    ///
    /// Objects absent from the snapshot are deleted. The kind is marked synced once the snapshot
    /// has been applied.
    pub fn apply_snapshot(&self, kind: Kind, objects: impl IntoIterator<Item = ConfigObject>) {
        let prev = self.store.list_versions(kind);

        let mut live = HashSet::new();
        for obj in objects {
            if obj.kind() != kind {
                tracing::warn!(expected = %kind, key = %obj.key(), "Ignoring object of unexpected kind");
                continue;
            }
            live.insert(obj.id.clone());
            self.store.update(obj);
        }
        for (namespace, names) in &prev {
            for name in names.keys() {
                if !live.contains(&ResourceId::new(namespace.as_str(), name.as_str())) {
                    self.store.delete(kind, namespace, name);
                }
            }
        }

        let curr = self.store.list_versions(kind);
        self.store.mark_synced(kind);
        self.enqueue_updates(kind, diff::calculate_updates(&prev, &curr));
    }

    fn enqueue_updates(&self, kind: Kind, updates: Updates) {
        for (namespace, changes) in updates {
            for (name, change) in changes {
                tracing::debug!(%kind, %namespace, %name, ?change, "Changed");
                self.queue
                    .enqueue(ObjectKey::new(kind, namespace.clone(), name));
            }
        }
    }
}

impl<Q, R> kubert::index::IndexNamespacedResource<R> for Feed<Q>
where
    Q: Enqueue,
    R: IntoConfig,
{
    fn apply(&mut self, resource: R) {
        match convert::to_config(&resource) {
            Ok(obj) => self.apply_object(obj),
            Err(error) => {
                let kind = R::KIND;
                let namespace = resource.namespace().unwrap_or_default();
                let name = resource.name_any();
                tracing::warn!(%kind, %namespace, %name, %error, "Ignoring malformed resource");
            }
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_object(R::KIND, &namespace, &name);
    }

    fn reset(&mut self, resources: Vec<R>, _removed: NamespacedRemoved) {
        let kind = R::KIND;
        let objects = resources
            .iter()
            .filter_map(|resource| match convert::to_config(resource) {
                Ok(obj) => Some(obj),
                Err(error) => {
                    let name = resource.name_any();
                    tracing::warn!(%kind, %name, %error, "Ignoring malformed resource");
                    None
                }
            })
            .collect::<Vec<_>>();
        self.apply_snapshot(kind, objects);
    }
}

impl<Q, R: IntoConfig> SizedIndex<R> for Feed<Q> {
    fn size(&self, namespace: &str) -> usize {
        self.store.len(R::KIND, namespace)
    }
}

impl<Q: Enqueue + ?Sized> Enqueue for Arc<Q> {
    fn enqueue(&self, key: ObjectKey) {
        (**self).enqueue(key)
    }
}
