//! Bidirectional edges between owners and the objects they reference.
//!
//! Each [`Relation`] holds a forward map (owner to targets) and a reverse map (target to owners).
//! Targets that an owner stops referencing are remembered as *stale* until the tracer takes them,
//! so that roots which lost a dependent are still rebuilt once.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use meshlb_core::{ConfigObject, Kind, Payload, ResourceId};
use meshlb_k8s_api::networking::{
    DestinationRuleSpec, GatewaySpec, VirtualServiceSpec, MESH_GATEWAY,
};
use parking_lot::RwLock;
use std::collections::BTreeSet;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Relation {
    /// A virtual service is bound to a gateway.
    GatewayVirtualService,
    /// A virtual service routes to a service.
    ServiceVirtualService,
    /// A destination rule configures a service.
    ServiceDestinationRule,
    /// A gateway terminates TLS with a secret.
    SecretGateway,
}

pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

#[derive(Debug)]
pub struct RelationshipIndex {
    relations: RwLock<HashMap<Relation, EdgeSet>>,
    cluster_domain: String,
}

#[derive(Debug, Default)]
struct EdgeSet {
    forward: HashMap<ResourceId, HashSet<ResourceId>>,
    reverse: HashMap<ResourceId, HashSet<ResourceId>>,
    stale: HashMap<ResourceId, HashSet<ResourceId>>,
}

// === impl Relation ===

impl Relation {
    pub const ALL: [Relation; 4] = [
        Relation::GatewayVirtualService,
        Relation::ServiceVirtualService,
        Relation::ServiceDestinationRule,
        Relation::SecretGateway,
    ];

    pub fn owner_kind(&self) -> Kind {
        match self {
            Self::GatewayVirtualService | Self::ServiceVirtualService => Kind::VirtualService,
            Self::ServiceDestinationRule => Kind::DestinationRule,
            Self::SecretGateway => Kind::Gateway,
        }
    }
}

// === impl RelationshipIndex ===

impl RelationshipIndex {
    pub fn new(cluster_domain: impl Into<String>) -> Self {
        Self {
            relations: Default::default(),
            cluster_domain: cluster_domain.into(),
        }
    }

    /// Resolves a destination host to the service it names, relative to `namespace`.
    pub fn service_host(&self, host: &str, namespace: &str) -> Option<ResourceId> {
        service_host(host, namespace, &self.cluster_domain)
    }

    /// Replaces the targets of `owner`. Targets that are no longer referenced become stale.
    pub fn update_refs(
        &self,
        relation: Relation,
        owner: &ResourceId,
        targets: impl IntoIterator<Item = ResourceId>,
    ) {
        let targets = targets.into_iter().collect::<HashSet<_>>();
        let mut relations = self.relations.write();
        let edges = relations.entry(relation).or_default();

        let previous = edges.forward.remove(owner).unwrap_or_default();
        for removed in previous.difference(&targets) {
            edges.unlink_reverse(removed, owner);
            edges
                .stale
                .entry(owner.clone())
                .or_default()
                .insert(removed.clone());
        }
        for target in &targets {
            edges
                .reverse
                .entry(target.clone())
                .or_default()
                .insert(owner.clone());
        }
        if !targets.is_empty() {
            edges.forward.insert(owner.clone(), targets);
        }
    }

    /// Removes every edge of `owner`, remembering its targets as stale.
    pub fn delete_refs(&self, relation: Relation, owner: &ResourceId) {
        let mut relations = self.relations.write();
        let Some(edges) = relations.get_mut(&relation) else {
            return;
        };
        let Some(previous) = edges.forward.remove(owner) else {
            return;
        };
        for target in &previous {
            edges.unlink_reverse(target, owner);
        }
        edges.stale.entry(owner.clone()).or_default().extend(previous);
    }

    /// Takes the targets `owner` stopped referencing since the last call.
    pub fn take_stale(&self, relation: Relation, owner: &ResourceId) -> BTreeSet<ResourceId> {
        let mut relations = self.relations.write();
        relations
            .get_mut(&relation)
            .and_then(|edges| edges.stale.remove(owner))
            .map(|stale| stale.into_iter().collect())
            .unwrap_or_default()
    }

    /// Returns the owners that reference `target`.
    pub fn dependents(&self, relation: Relation, target: &ResourceId) -> BTreeSet<ResourceId> {
        let relations = self.relations.read();
        relations
            .get(&relation)
            .and_then(|edges| edges.reverse.get(target))
            .map(|owners| owners.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the targets that `owner` references.
    pub fn references(&self, relation: Relation, owner: &ResourceId) -> BTreeSet<ResourceId> {
        let relations = self.relations.read();
        relations
            .get(&relation)
            .and_then(|edges| edges.forward.get(owner))
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Walks reverse edges from an object of any kind to the gateways it affects.
    pub fn resolve_roots(&self, kind: Kind, id: &ResourceId) -> BTreeSet<ResourceId> {
        match kind {
            Kind::Gateway => std::iter::once(id.clone()).collect(),
            Kind::VirtualService => self.references(Relation::GatewayVirtualService, id),
            Kind::DestinationRule => self
                .references(Relation::ServiceDestinationRule, id)
                .iter()
                .flat_map(|svc| self.service_roots(svc))
                .collect(),
            // Endpoints share their service's identity.
            Kind::Service | Kind::Endpoints => self.service_roots(id),
            Kind::Secret => self.dependents(Relation::SecretGateway, id),
            Kind::Pod => BTreeSet::new(),
        }
    }

    pub(crate) fn service_roots(&self, svc: &ResourceId) -> BTreeSet<ResourceId> {
        self.dependents(Relation::ServiceVirtualService, svc)
            .iter()
            .flat_map(|vs| self.references(Relation::GatewayVirtualService, vs))
            .collect()
    }

    /// Records the references an object declares.
    pub fn link(&self, obj: &ConfigObject) {
        match &obj.payload {
            Payload::VirtualService(vs) => {
                self.update_refs(
                    Relation::GatewayVirtualService,
                    &obj.id,
                    gateway_refs(obj.namespace(), vs),
                );
                self.update_refs(
                    Relation::ServiceVirtualService,
                    &obj.id,
                    service_refs(obj.namespace(), vs, &self.cluster_domain),
                );
            }
            Payload::DestinationRule(dr) => {
                self.update_refs(
                    Relation::ServiceDestinationRule,
                    &obj.id,
                    destination_rule_service(obj.namespace(), dr, &self.cluster_domain),
                );
            }
            Payload::Gateway(gw) => {
                self.update_refs(
                    Relation::SecretGateway,
                    &obj.id,
                    secret_refs(obj.namespace(), gw),
                );
            }
            _ => {}
        }
    }

    /// Drops every edge owned by an object.
    pub fn unlink(&self, kind: Kind, id: &ResourceId) {
        for relation in Relation::ALL {
            if relation.owner_kind() == kind {
                self.delete_refs(relation, id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_symmetric(&self) -> bool {
        let relations = self.relations.read();
        relations.values().all(|edges| {
            let forward_ok = edges.forward.iter().all(|(owner, targets)| {
                targets.iter().all(|t| {
                    edges
                        .reverse
                        .get(t)
                        .map_or(false, |owners| owners.contains(owner))
                })
            });
            let reverse_ok = edges.reverse.iter().all(|(target, owners)| {
                owners.iter().all(|o| {
                    edges
                        .forward
                        .get(o)
                        .map_or(false, |targets| targets.contains(target))
                })
            });
            forward_ok && reverse_ok
        })
    }
}

// === impl EdgeSet ===

impl EdgeSet {
    fn unlink_reverse(&mut self, target: &ResourceId, owner: &ResourceId) {
        if let Some(owners) = self.reverse.get_mut(target) {
            owners.remove(owner);
            if owners.is_empty() {
                self.reverse.remove(target);
            }
        }
    }
}

impl Default for RelationshipIndex {
    fn default() -> Self {
        Self::new(DEFAULT_CLUSTER_DOMAIN)
    }
}

// === reference parsing ===

/// Resolves a virtual service's `gateways` entries. `mesh` binds to sidecars and is ignored.
pub fn gateway_refs(namespace: &str, vs: &VirtualServiceSpec) -> Vec<ResourceId> {
    vs.gateways
        .iter()
        .filter(|gw| gw.as_str() != MESH_GATEWAY)
        .filter_map(|gw| match gw.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                Some(ResourceId::new(ns, name))
            }
            Some(_) => None,
            None => Some(ResourceId::new(namespace, gw.as_str())),
        })
        .collect()
}

/// Resolves the services that a virtual service's routes send traffic to.
pub fn service_refs(
    namespace: &str,
    vs: &VirtualServiceSpec,
    cluster_domain: &str,
) -> Vec<ResourceId> {
    vs.http
        .iter()
        .flat_map(|rule| rule.route.iter())
        .filter_map(|dst| service_host(&dst.destination.host, namespace, cluster_domain))
        .collect()
}

pub fn destination_rule_service(
    namespace: &str,
    dr: &DestinationRuleSpec,
    cluster_domain: &str,
) -> Option<ResourceId> {
    service_host(&dr.host, namespace, cluster_domain)
}

/// Gateway credentials are looked up in the gateway's namespace.
pub fn secret_refs(namespace: &str, gw: &GatewaySpec) -> Vec<ResourceId> {
    gw.servers
        .iter()
        .filter_map(|srv| srv.terminating_credential())
        .map(|name| ResourceId::new(namespace, name))
        .collect()
}

/// Parses a service host of the form `svc`, `svc.ns`, `svc.ns.svc` or `svc.ns.svc.<domain>`.
///
/// Any other host (including wildcards and other domains) is not a cluster service.
pub fn service_host(host: &str, namespace: &str, cluster_domain: &str) -> Option<ResourceId> {
    if host.is_empty() || host.contains('*') {
        return None;
    }
    let mut parts = host.splitn(4, '.');
    let name = parts.next().filter(|s| !s.is_empty())?;
    match (parts.next(), parts.next(), parts.next()) {
        (None, _, _) => Some(ResourceId::new(namespace, name)),
        (Some(ns), None, _) if !ns.is_empty() => Some(ResourceId::new(ns, name)),
        (Some(ns), Some("svc"), None) if !ns.is_empty() => Some(ResourceId::new(ns, name)),
        (Some(ns), Some("svc"), Some(domain))
            if !ns.is_empty() && domain.trim_end_matches('.') == cluster_domain =>
        {
            Some(ResourceId::new(ns, name))
        }
        _ => None,
    }
}

