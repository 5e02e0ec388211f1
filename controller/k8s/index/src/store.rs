use crate::{diff::Versions, relationships::RelationshipIndex};
use ahash::AHashMap as HashMap;
use meshlb_core::{ConfigObject, Kind, ResourceId};
use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Holds the latest version of every configuration object, partitioned by kind and namespace.
///
/// Each namespace has its own lock. Updates to objects that declare references re-link the
/// [`RelationshipIndex`] while that lock is held, so a reader never observes an object whose
/// edges are out of date.
#[derive(Debug)]
pub struct ConfigStore {
    kinds: HashMap<Kind, KindStore>,
    relationships: Arc<RelationshipIndex>,
}

pub type SharedStore = Arc<ConfigStore>;

#[derive(Debug, Default)]
struct KindStore {
    namespaces: RwLock<HashMap<String, Arc<NamespaceStore>>>,
    synced: AtomicBool,
}

type NamespaceStore = RwLock<HashMap<String, ConfigObject>>;

// === impl ConfigStore ===

impl ConfigStore {
    pub fn new(relationships: Arc<RelationshipIndex>) -> Self {
        Self {
            kinds: Kind::ALL
                .iter()
                .map(|k| (*k, KindStore::default()))
                .collect(),
            relationships,
        }
    }

    pub fn shared(relationships: Arc<RelationshipIndex>) -> SharedStore {
        Arc::new(Self::new(relationships))
    }

    pub fn relationships(&self) -> &Arc<RelationshipIndex> {
        &self.relationships
    }

    /// Upserts an object, returning the version it replaced.
    pub fn update(&self, obj: ConfigObject) -> Option<String> {
        let ns = self.kind(obj.kind()).namespace_or_default(obj.namespace());
        let mut objects = ns.write();
        self.relationships.link(&obj);
        objects
            .insert(obj.id.name.clone(), obj)
            .map(|prev| prev.version)
    }

    /// Removes an object, returning whether it existed.
    pub fn delete(&self, kind: Kind, namespace: &str, name: &str) -> bool {
        let Some(ns) = self.kind(kind).namespace(namespace) else {
            return false;
        };
        let mut objects = ns.write();
        if !objects.contains_key(name) {
            return false;
        }
        self.relationships
            .unlink(kind, &ResourceId::new(namespace, name));
        objects.remove(name);
        true
    }

    pub fn get(&self, kind: Kind, namespace: &str, name: &str) -> Option<ConfigObject> {
        let ns = self.kind(kind).namespace(namespace)?;
        let objects = ns.read();
        objects.get(name).cloned()
    }

    /// Re-applies an object's declared references under its namespace lock and returns it.
    pub fn relink(&self, kind: Kind, namespace: &str, name: &str) -> Option<ConfigObject> {
        let ns = self.kind(kind).namespace(namespace)?;
        let objects = ns.write();
        let obj = objects.get(name)?;
        self.relationships.link(obj);
        Some(obj.clone())
    }

    pub fn version(&self, kind: Kind, namespace: &str, name: &str) -> Option<String> {
        let ns = self.kind(kind).namespace(namespace)?;
        let objects = ns.read();
        objects.get(name).map(|o| o.version.clone())
    }

    /// Lists the objects of a kind in a namespace, ordered by name.
    pub fn list(&self, kind: Kind, namespace: &str) -> Vec<ConfigObject> {
        let Some(ns) = self.kind(kind).namespace(namespace) else {
            return Vec::new();
        };
        let mut objects = ns.read().values().cloned().collect::<Vec<_>>();
        objects.sort_by(|a, b| a.id.name.cmp(&b.id.name));
        objects
    }

    /// Snapshots the version of every object of a kind.
    pub fn list_versions(&self, kind: Kind) -> Versions {
        let namespaces = self.kind(kind).namespaces.read().clone();
        let mut versions = Versions::new();
        for (namespace, ns) in namespaces {
            let objects = ns.read();
            if objects.is_empty() {
                continue;
            }
            versions.insert(
                namespace,
                objects
                    .iter()
                    .map(|(name, obj)| (name.clone(), obj.version.clone()))
                    .collect(),
            );
        }
        versions
    }

    pub fn len(&self, kind: Kind, namespace: &str) -> usize {
        self.kind(kind)
            .namespace(namespace)
            .map(|ns| ns.read().len())
            .unwrap_or(0)
    }

    /// Records that the initial list of a kind has been applied.
    pub fn mark_synced(&self, kind: Kind) {
        if !self.kind(kind).synced.swap(true, Ordering::AcqRel) {
            tracing::debug!(%kind, "Synced");
        }
    }

    pub fn is_synced(&self, kind: Kind) -> bool {
        self.kind(kind).synced.load(Ordering::Acquire)
    }

    fn kind(&self, kind: Kind) -> &KindStore {
        // Every kind is populated on construction.
        &self.kinds[&kind]
    }
}

// === impl KindStore ===

impl KindStore {
    fn namespace(&self, namespace: &str) -> Option<Arc<NamespaceStore>> {
        self.namespaces.read().get(namespace).cloned()
    }

    fn namespace_or_default(&self, namespace: &str) -> Arc<NamespaceStore> {
        if let Some(ns) = self.namespace(namespace) {
            return ns;
        }
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }
}
