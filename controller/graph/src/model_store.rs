use ahash::AHashMap as HashMap;
use meshlb_core::{ObjectGraph, ResourceId};
use parking_lot::RwLock;
use std::sync::Arc;

/// Holds the most recently published graph of each root.
#[derive(Debug, Default)]
pub struct ModelStore {
    graphs: RwLock<HashMap<ResourceId, Arc<ObjectGraph>>>,
}

impl ModelStore {
    pub fn get(&self, root: &ResourceId) -> Option<Arc<ObjectGraph>> {
        self.graphs.read().get(root).cloned()
    }

    /// Publishes a graph unless the published graph has the same checksum.
    ///
    /// Returns true if the graph was published.
    pub fn publish(&self, graph: ObjectGraph) -> bool {
        let mut graphs = self.graphs.write();
        if let Some(published) = graphs.get(graph.root()) {
            if published.checksum() == graph.checksum() {
                return false;
            }
        }
        graphs.insert(graph.root().clone(), Arc::new(graph));
        true
    }

    /// Withdraws a root's graph, returning true if one was published.
    pub fn withdraw(&self, root: &ResourceId) -> bool {
        self.graphs.write().remove(root).is_some()
    }

    pub fn len(&self) -> usize {
        self.graphs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
