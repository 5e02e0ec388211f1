use ahash::AHashMap as HashMap;
use meshlb_core::{Checksum, NodeKind, RemoteKey, ResourceId};
use parking_lot::RwLock;
use std::sync::Arc;

/// Records the last state successfully applied to the remote controller.
///
/// Entries are partitioned by the namespace of the root that owns them, so that roots in
/// different namespaces never contend on the same lock.
#[derive(Debug, Default)]
pub struct ReconciliationCache {
    partitions: RwLock<HashMap<String, Arc<Partition>>>,
}

type Partition = RwLock<HashMap<RemoteKey, CacheEntry>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// The identifier assigned by the remote controller.
    pub remote_id: String,
    pub checksum: Checksum,
    /// The node's role in its graph.
    pub key: Checksum,
    pub root: ResourceId,
    /// Set only on a root's virtual service: every child published with it.
    pub children: Vec<ChildKey>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChildKey {
    pub kind: NodeKind,
    pub key: Checksum,
    pub name: String,
}

// === impl ReconciliationCache ===

impl ReconciliationCache {
    /// Returns every entry owned by a root.
    pub fn owned_by(&self, root: &ResourceId) -> Vec<(RemoteKey, CacheEntry)> {
        let Some(partition) = self.partition(&root.namespace) else {
            return Vec::new();
        };
        let mut owned = partition
            .read()
            .iter()
            .filter(|(_, e)| e.root == *root)
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect::<Vec<_>>();
        owned.sort_by(|(a, _), (b, _)| a.cmp(b));
        owned
    }

    /// Returns the children last published with a root.
    pub fn child_keys(&self, root: &ResourceId) -> Vec<ChildKey> {
        let Some(partition) = self.partition(&root.namespace) else {
            return Vec::new();
        };
        let entries = partition.read();
        entries
            .iter()
            .find(|(k, e)| k.kind == NodeKind::VirtualService && e.root == *root)
            .map(|(_, e)| e.children.clone())
            .unwrap_or_default()
    }

    /// Commits the outcome of a successful emission for a root.
    pub fn commit(
        &self,
        root: &ResourceId,
        applied: impl IntoIterator<Item = (RemoteKey, CacheEntry)>,
        removed: impl IntoIterator<Item = RemoteKey>,
    ) {
        let partition = self.partition_or_default(&root.namespace);
        let mut entries = partition.write();
        for key in removed {
            entries.remove(&key);
        }
        entries.extend(applied);
    }

    pub fn len(&self) -> usize {
        let partitions = self.partitions.read();
        partitions.values().map(|p| p.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn partition(&self, namespace: &str) -> Option<Arc<Partition>> {
        self.partitions.read().get(namespace).cloned()
    }

    fn partition_or_default(&self, namespace: &str) -> Arc<Partition> {
        if let Some(p) = self.partition(namespace) {
            return p;
        }
        self.partitions
            .write()
            .entry(namespace.to_string())
            .or_default()
            .clone()
    }
}
