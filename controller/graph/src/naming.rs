use crate::cache::ChildKey;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use meshlb_core::{Checksum, NodeKind, ObjectGraph};

/// Assigns names to the nodes of a graph.
///
/// A node whose role was already published keeps its previous name: first as recorded by the
/// reconciliation cache, then as found in the last published graph. Other nodes get a name
/// derived from their key. No name is assigned twice within a graph.
#[derive(Debug, Default)]
pub struct Namer {
    previous: HashMap<(NodeKind, Checksum), String>,
    used: HashSet<(NodeKind, String)>,
}

impl Namer {
    pub fn new(cached: &[ChildKey], published: Option<&ObjectGraph>) -> Self {
        let mut previous = HashMap::new();
        if let Some(graph) = published {
            for node in graph.nodes() {
                previous.insert((node.kind(), node.key()), node.name().to_string());
            }
        }
        // Cached names take precedence over those of a graph that may never have been applied.
        for child in cached {
            previous.insert((child.kind, child.key), child.name.clone());
        }
        Self {
            previous,
            used: HashSet::new(),
        }
    }

    /// Returns the name for a node, minting one from `base` if the node is new.
    pub fn name(&mut self, kind: NodeKind, key: Checksum, base: &str) -> String {
        if let Some(name) = self.previous.get(&(kind, key)) {
            if self.used.insert((kind, name.clone())) {
                return name.clone();
            }
        }

        let minted = mint(base, key);
        let mut name = minted.clone();
        let mut n = 2;
        while !self.used.insert((kind, name.clone())) {
            name = format!("{minted}-{n}");
            n += 1;
        }
        name
    }

    /// Reserves a fixed name.
    pub fn reserve(&mut self, kind: NodeKind, name: &str) {
        self.used.insert((kind, name.to_string()));
    }
}

fn mint(base: &str, key: Checksum) -> String {
    let key = key.to_string();
    format!("{base}-{}", &key[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_cached_names() {
        let key = Checksum::of("pg");
        let cached = vec![ChildKey {
            kind: NodeKind::PoolGroup,
            key,
            name: "legacy-name".to_string(),
        }];
        let mut namer = Namer::new(&cached, None);
        assert_eq!(namer.name(NodeKind::PoolGroup, key, "root-pg"), "legacy-name");

        // A second node can never take the same name.
        let name = namer.name(NodeKind::PoolGroup, key, "root-pg");
        assert_ne!(name, "legacy-name");
        assert!(name.starts_with("root-pg-"), "{name}");
    }

    #[test]
    fn minted_names_are_stable() {
        let key = Checksum::of("pool");
        let a = Namer::default().name(NodeKind::Pool, key, "root-pool");
        let b = Namer::default().name(NodeKind::Pool, key, "root-pool");
        assert_eq!(a, b);

        let mut namer = Namer::default();
        let first = namer.name(NodeKind::Pool, key, "root-pool");
        let second = namer.name(NodeKind::Pool, key, "root-pool");
        assert_eq!(second, format!("{first}-2"));
    }
}
