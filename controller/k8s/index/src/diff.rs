use std::collections::BTreeMap;

/// Object versions by namespace and name.
pub type Versions = BTreeMap<String, BTreeMap<String, String>>;

/// Changed object names by namespace, ordered by name.
pub type Updates = BTreeMap<String, Vec<(String, Change)>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Change {
    Add,
    Update,
    Delete,
}

/// Compares two version snapshots.
///
/// An object whose version is unchanged is not reported. Namespaces without changes are omitted.
pub fn calculate_updates(prev: &Versions, curr: &Versions) -> Updates {
    let mut updates = Updates::new();

    for (ns, names) in curr {
        let before = prev.get(ns);
        for (name, version) in names {
            let change = match before.and_then(|b| b.get(name)) {
                None => Change::Add,
                Some(v) if v != version => Change::Update,
                Some(_) => continue,
            };
            updates
                .entry(ns.clone())
                .or_default()
                .push((name.clone(), change));
        }
    }

    for (ns, names) in prev {
        let after = curr.get(ns);
        for name in names.keys() {
            if after.map_or(true, |a| !a.contains_key(name)) {
                updates
                    .entry(ns.clone())
                    .or_default()
                    .push((name.clone(), Change::Delete));
            }
        }
    }

    for changes in updates.values_mut() {
        changes.sort_by(|(a, _), (b, _)| a.cmp(b));
    }
    updates
}

/// A snapshot holding at most one object.
pub(crate) fn single(namespace: &str, name: &str, version: Option<String>) -> Versions {
    let mut versions = Versions::new();
    if let Some(version) = version {
        versions
            .entry(namespace.to_string())
            .or_default()
            .insert(name.to_string(), version);
    }
    versions
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn versions(ns: &str, entries: &[(&str, &str)]) -> Versions {
        btreemap! {
            ns.to_string() => entries
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn add_update_delete() {
        let prev = versions("ns", &[("a", "1"), ("b", "2")]);
        let curr = versions("ns", &[("a", "2"), ("c", "1")]);
        let updates = calculate_updates(&prev, &curr);
        assert_eq!(
            updates,
            btreemap! {
                "ns".to_string() => vec![
                    ("a".to_string(), Change::Update),
                    ("b".to_string(), Change::Delete),
                    ("c".to_string(), Change::Add),
                ],
            }
        );
    }

    #[test]
    fn unchanged_versions_are_omitted() {
        let snap = versions("ns", &[("a", "1")]);
        assert!(calculate_updates(&snap, &snap).is_empty());
        assert!(calculate_updates(&Versions::new(), &Versions::new()).is_empty());
    }

    #[test]
    fn whole_namespaces() {
        let prev = versions("ns-0", &[("a", "1")]);
        let curr = versions("ns-1", &[("a", "1")]);
        let updates = calculate_updates(&prev, &curr);
        assert_eq!(updates["ns-0"], vec![("a".to_string(), Change::Delete)]);
        assert_eq!(updates["ns-1"], vec![("a".to_string(), Change::Add)]);
    }

    #[test]
    fn order_independent() {
        let a = versions("ns", &[("x", "1"), ("y", "1"), ("z", "1")]);
        let b = versions("ns", &[("z", "2"), ("w", "1")]);
        let forward = calculate_updates(&a, &b);
        let reverse = calculate_updates(&b, &a);
        let adds = |u: &Updates| {
            u["ns"]
                .iter()
                .filter(|(_, c)| *c == Change::Add)
                .map(|(n, _)| n.clone())
                .collect::<Vec<_>>()
        };
        let deletes = |u: &Updates| {
            u["ns"]
                .iter()
                .filter(|(_, c)| *c == Change::Delete)
                .map(|(n, _)| n.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(adds(&forward), deletes(&reverse));
        assert_eq!(deletes(&forward), adds(&reverse));
    }
}
