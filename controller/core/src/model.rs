//! The remote load balancer's object model.
//!
//! A root gateway is translated into an [`ObjectGraph`] of [`ModelNode`]s. Every node carries a
//! checksum over its semantic fields only, so two passes over the same configuration produce equal
//! checksums no matter how names were assigned or in which order set-like fields were listed.

use crate::{Checksum, ResourceId};
use meshlb_k8s_api::networking::HttpMatchRequest;
use serde::Serialize;
use std::{fmt, net::IpAddr};

/// A remote object of a known kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Node<S> {
    pub name: String,
    pub tenant: String,

    /// Identifies the node's role in the graph across passes, independently of its name and
    /// content. Used to reuse names for semantically identical children.
    #[serde(skip)]
    pub key: Checksum,

    #[serde(skip)]
    pub checksum: Checksum,

    #[serde(flatten)]
    pub spec: S,
}

pub trait NodeSpec: Serialize {
    const KIND: NodeKind;

    /// Puts set-valued fields into a canonical order.
    fn normalize(&mut self) {}
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum NodeKind {
    Pool,
    PoolGroup,
    HttpPolicySet,
    TlsKeyCert,
    VirtualService,
    SniChild,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModelNode {
    VirtualService(Node<VirtualServiceSpec>),
    SniChild(Node<SniChildSpec>),
    PoolGroup(Node<PoolGroupSpec>),
    Pool(Node<PoolSpec>),
    HttpPolicySet(Node<HttpPolicySetSpec>),
    TlsKeyCert(Node<TlsKeyCertSpec>),
}

/// Identifies an object in the remote controller.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteKey {
    pub kind: NodeKind,
    pub tenant: String,
    pub name: String,
}

/// References a parent virtual service by identity rather than by ownership.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ParentRef {
    pub tenant: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VirtualServiceSpec {
    pub listeners: Vec<Listener>,

    /// Pool groups in rule-evaluation order.
    pub pool_groups: Vec<String>,

    pub http_policy_sets: Vec<String>,

    /// Certificates presented for listeners terminating TLS. Set when the virtual service hosts
    /// SNI children.
    pub ssl_key_certs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Listener {
    pub port: u16,
    pub protocol: ListenerProtocol,
    pub tls: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListenerProtocol {
    Http,
    Https,
    Tcp,
}

/// A virtual host served behind a TLS-terminating parent, selected by SNI.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SniChildSpec {
    pub parent: ParentRef,
    pub hosts: Vec<String>,
    pub ssl_key_cert: String,
    pub pool_groups: Vec<String>,
    pub http_policy_sets: Vec<String>,
}

/// Routes requests matching a rule to a weighted set of pools.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoolGroupSpec {
    #[serde(rename = "match")]
    pub match_rule: MatchRule,
    pub members: Vec<PoolGroupMember>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MatchRule {
    pub hosts: Vec<String>,
    pub matches: Vec<HttpMatchRequest>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PoolGroupMember {
    pub pool: String,
    pub weight: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoolSpec {
    pub service: ResourceId,
    pub port: u16,
    pub subset: Option<String>,
    pub lb_algorithm: LbAlgorithm,
    pub servers: Vec<ServerAddr>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LbAlgorithm {
    RoundRobin,
    LeastConnections,
    Random,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ServerAddr {
    pub ip: IpAddr,
    pub port: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HttpPolicySetSpec {
    pub rules: Vec<PolicyRule>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PolicyRule {
    #[serde(rename = "match")]
    pub match_rule: MatchRule,
    pub action: PolicyAction,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Redirect {
        scheme: Option<String>,
        host: Option<String>,
        port: Option<u16>,
        path: Option<String>,
        status_code: u16,
    },
    Rewrite {
        host: Option<String>,
        path: Option<String>,
    },
}

#[derive(Clone, PartialEq, Serialize)]
pub struct TlsKeyCertSpec {
    pub secret: ResourceId,
    pub certificate: String,
    pub key: String,
}

/// A fully built graph for a root, with an aggregate checksum over all nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectGraph {
    root: ResourceId,
    nodes: Vec<ModelNode>,
    checksum: Checksum,
}

// === impl Node ===

impl<S: NodeSpec> Node<S> {
    pub fn new(
        name: impl Into<String>,
        tenant: impl Into<String>,
        key: Checksum,
        mut spec: S,
    ) -> Self {
        spec.normalize();
        let checksum = Checksum::of(&spec);
        Self {
            name: name.into(),
            tenant: tenant.into(),
            key,
            checksum,
            spec,
        }
    }

    pub fn remote_key(&self) -> RemoteKey {
        RemoteKey {
            kind: S::KIND,
            tenant: self.tenant.clone(),
            name: self.name.clone(),
        }
    }
}

// === impl NodeKind ===

impl NodeKind {
    /// Kinds in the order they must be created so that every reference resolves.
    pub const CREATE_ORDER: [NodeKind; 6] = [
        NodeKind::Pool,
        NodeKind::PoolGroup,
        NodeKind::HttpPolicySet,
        NodeKind::TlsKeyCert,
        NodeKind::VirtualService,
        NodeKind::SniChild,
    ];

    pub fn create_rank(&self) -> usize {
        match self {
            Self::Pool => 0,
            Self::PoolGroup => 1,
            Self::HttpPolicySet => 2,
            Self::TlsKeyCert => 3,
            Self::VirtualService => 4,
            Self::SniChild => 5,
        }
    }

    /// Whether objects of this kind hold references to other objects.
    pub fn references_others(&self) -> bool {
        !matches!(self, Self::Pool | Self::TlsKeyCert)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pool => "pool",
            Self::PoolGroup => "poolgroup",
            Self::HttpPolicySet => "httppolicyset",
            Self::TlsKeyCert => "sslkeyandcertificate",
            Self::VirtualService => "virtualservice",
            Self::SniChild => "virtualservice-child",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl ModelNode ===

impl ModelNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::VirtualService(_) => NodeKind::VirtualService,
            Self::SniChild(_) => NodeKind::SniChild,
            Self::PoolGroup(_) => NodeKind::PoolGroup,
            Self::Pool(_) => NodeKind::Pool,
            Self::HttpPolicySet(_) => NodeKind::HttpPolicySet,
            Self::TlsKeyCert(_) => NodeKind::TlsKeyCert,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::VirtualService(n) => &n.name,
            Self::SniChild(n) => &n.name,
            Self::PoolGroup(n) => &n.name,
            Self::Pool(n) => &n.name,
            Self::HttpPolicySet(n) => &n.name,
            Self::TlsKeyCert(n) => &n.name,
        }
    }

    pub fn tenant(&self) -> &str {
        match self {
            Self::VirtualService(n) => &n.tenant,
            Self::SniChild(n) => &n.tenant,
            Self::PoolGroup(n) => &n.tenant,
            Self::Pool(n) => &n.tenant,
            Self::HttpPolicySet(n) => &n.tenant,
            Self::TlsKeyCert(n) => &n.tenant,
        }
    }

    pub fn key(&self) -> Checksum {
        match self {
            Self::VirtualService(n) => n.key,
            Self::SniChild(n) => n.key,
            Self::PoolGroup(n) => n.key,
            Self::Pool(n) => n.key,
            Self::HttpPolicySet(n) => n.key,
            Self::TlsKeyCert(n) => n.key,
        }
    }

    pub fn checksum(&self) -> Checksum {
        match self {
            Self::VirtualService(n) => n.checksum,
            Self::SniChild(n) => n.checksum,
            Self::PoolGroup(n) => n.checksum,
            Self::Pool(n) => n.checksum,
            Self::HttpPolicySet(n) => n.checksum,
            Self::TlsKeyCert(n) => n.checksum,
        }
    }

    pub fn remote_key(&self) -> RemoteKey {
        RemoteKey {
            kind: self.kind(),
            tenant: self.tenant().to_string(),
            name: self.name().to_string(),
        }
    }

    /// Renders the node as the request body for the remote controller.
    pub fn to_body(&self) -> serde_json::Value {
        let body = match self {
            Self::VirtualService(n) => serde_json::to_value(n),
            Self::SniChild(n) => serde_json::to_value(n),
            Self::PoolGroup(n) => serde_json::to_value(n),
            Self::Pool(n) => serde_json::to_value(n),
            Self::HttpPolicySet(n) => serde_json::to_value(n),
            Self::TlsKeyCert(n) => serde_json::to_value(n),
        };
        body.expect("model nodes must serialize with string map keys")
    }
}

// === impl ObjectGraph ===

impl ObjectGraph {
    /// Seals a graph. The checksum is computed once, after every node has been added.
    pub fn new(root: ResourceId, nodes: Vec<ModelNode>) -> Self {
        let checksum = Checksum::combine(nodes.iter().map(ModelNode::checksum));
        Self {
            root,
            nodes,
            checksum,
        }
    }

    pub fn root(&self) -> &ResourceId {
        &self.root
    }

    pub fn nodes(&self) -> &[ModelNode] {
        &self.nodes
    }

    pub fn checksum(&self) -> Checksum {
        self.checksum
    }

    pub fn root_node(&self) -> Option<&Node<VirtualServiceSpec>> {
        self.nodes.iter().find_map(|n| match n {
            ModelNode::VirtualService(vs) => Some(vs),
            _ => None,
        })
    }

    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.iter().filter(|n| n.kind() == kind).count()
    }

    /// Returns the graph's nodes sorted into creation order. Within a kind, nodes keep their
    /// build order.
    pub fn in_create_order(&self) -> Vec<&ModelNode> {
        let mut nodes = self.nodes.iter().collect::<Vec<_>>();
        nodes.sort_by_key(|n| n.kind().create_rank());
        nodes
    }
}

// === NodeSpec impls ===

impl NodeSpec for VirtualServiceSpec {
    const KIND: NodeKind = NodeKind::VirtualService;

    fn normalize(&mut self) {
        self.listeners.sort();
        self.listeners.dedup();
        self.ssl_key_certs.sort();
        self.ssl_key_certs.dedup();
    }
}

impl NodeSpec for SniChildSpec {
    const KIND: NodeKind = NodeKind::SniChild;

    fn normalize(&mut self) {
        self.hosts.sort();
        self.hosts.dedup();
    }
}

impl NodeSpec for PoolGroupSpec {
    const KIND: NodeKind = NodeKind::PoolGroup;

    fn normalize(&mut self) {
        self.match_rule.normalize();
        self.members.sort();
    }
}

impl NodeSpec for PoolSpec {
    const KIND: NodeKind = NodeKind::Pool;

    fn normalize(&mut self) {
        self.servers.sort();
        self.servers.dedup();
    }
}

impl NodeSpec for HttpPolicySetSpec {
    const KIND: NodeKind = NodeKind::HttpPolicySet;

    fn normalize(&mut self) {
        for rule in self.rules.iter_mut() {
            rule.match_rule.normalize();
        }
    }
}

impl NodeSpec for TlsKeyCertSpec {
    const KIND: NodeKind = NodeKind::TlsKeyCert;
}

// === impl MatchRule ===

impl MatchRule {
    /// Hosts and match alternatives are both unordered sets.
    pub fn normalize(&mut self) {
        self.hosts.sort();
        self.hosts.dedup();
        self.matches.sort();
        self.matches.dedup();
    }
}

impl fmt::Debug for TlsKeyCertSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsKeyCertSpec")
            .field("secret", &self.secret)
            .field("certificate", &format_args!("<{} bytes>", self.certificate.len()))
            .field("key", &format_args!("<redacted>"))
            .finish()
    }
}
