use crate::{context::ReconciliationContext, naming::Namer};
use ahash::AHashMap as HashMap;
use meshlb_core::{
    config::{SecretInfo, ServicePortInfo},
    model::{
        HttpPolicySetSpec, LbAlgorithm, Listener, ListenerProtocol, MatchRule, Node, ParentRef,
        PolicyAction, PolicyRule, PoolGroupMember, PoolGroupSpec, PoolSpec, ServerAddr,
        SniChildSpec, TlsKeyCertSpec, VirtualServiceSpec as RootSpec,
    },
    Checksum, ConfigObject, Kind, ModelNode, NodeKind, ObjectGraph, ResourceId,
};
use meshlb_k8s_api::{
    labels::Selector,
    networking::{Destination, GatewaySpec, HttpRedirect, Protocol, Server, SimpleLb},
};
use meshlb_k8s_index::relationships::Relation;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("{0} objects have not been synced")]
    NotSynced(Kind),
}

/// Builds the object graph for a gateway.
///
/// Returns `None` when the gateway does not exist. The same configuration always produces the
/// same graph: nodes that were published before keep their names, and new nodes are named
/// deterministically from their role.
pub fn build(
    ctx: &ReconciliationContext,
    root: &ResourceId,
) -> Result<Option<ObjectGraph>, BuildError> {
    for kind in [
        Kind::Gateway,
        Kind::VirtualService,
        Kind::DestinationRule,
        Kind::Service,
        Kind::Endpoints,
    ] {
        require_synced(ctx, kind)?;
    }

    let Some(gateway) = ctx.store.get(Kind::Gateway, &root.namespace, &root.name) else {
        return Ok(None);
    };
    let Some(spec) = gateway.as_gateway() else {
        return Ok(None);
    };

    let published = ctx.models.get(root);
    let cached = ctx.cache.child_keys(root);
    let builder = Builder {
        ctx,
        root,
        tenant: ctx.settings.tenant_for(&root.namespace),
        root_name: ctx.settings.root_name(root),
        namer: Namer::new(&cached, published.as_deref()),
        nodes: Vec::new(),
        built: HashMap::new(),
    };
    builder.build_root(spec).map(Some)
}

struct Builder<'a> {
    ctx: &'a ReconciliationContext,
    root: &'a ResourceId,
    tenant: String,
    root_name: String,
    namer: Namer,
    nodes: Vec<ModelNode>,
    /// Names of the nodes added so far, by role.
    built: HashMap<(NodeKind, Checksum), String>,
}

impl Builder<'_> {
    fn build_root(mut self, gateway: &GatewaySpec) -> Result<ObjectGraph, BuildError> {
        self.namer.reserve(NodeKind::VirtualService, &self.root_name);
        let routes = self.attached_routes();

        let mut root = RootSpec::default();
        let mut root_rules = Vec::new();
        for server in &gateway.servers {
            let Some(listener) = listener(server) else {
                tracing::warn!(gateway = %self.root, port = server.port.number, protocol = ?server.port.protocol, "Skipping unsupported listener");
                continue;
            };

            if server.https_redirect() {
                root_rules.push(PolicyRule {
                    match_rule: MatchRule {
                        hosts: server
                            .hosts
                            .iter()
                            .map(|h| strip_namespace(h).to_string())
                            .collect(),
                        matches: Vec::new(),
                    },
                    action: PolicyAction::Redirect {
                        scheme: Some("https".to_string()),
                        host: None,
                        port: None,
                        path: None,
                        status_code: 301,
                    },
                });
            }

            if let Some(credential) = server.terminating_credential() {
                let Some(cert) = self.tls_key_cert(credential)? else {
                    continue;
                };
                root.listeners.push(listener.clone());
                root.ssl_key_certs.push(cert.clone());
                for vs in &routes {
                    let hosts = matched_hosts(&self.root.namespace, server, vs);
                    if !hosts.is_empty() {
                        self.sni_child(vs, hosts, &cert, listener.port)?;
                    }
                }
                continue;
            }

            root.listeners.push(listener.clone());
            if listener.protocol != ListenerProtocol::Http {
                continue;
            }
            for vs in &routes {
                let hosts = matched_hosts(&self.root.namespace, server, vs);
                if hosts.is_empty() {
                    continue;
                }
                let (groups, rules) = self.http_routes(vs, &hosts, false, listener.port)?;
                for group in groups {
                    if !root.pool_groups.contains(&group) {
                        root.pool_groups.push(group);
                    }
                }
                root_rules.extend(rules);
            }
        }

        if !root_rules.is_empty() {
            let key = Checksum::of(&(self.root, NodeKind::HttpPolicySet));
            root.http_policy_sets.push(self.policy_set(key, root_rules));
        }

        let node = Node::new(
            self.root_name.clone(),
            self.tenant.clone(),
            Checksum::of(self.root),
            root,
        );
        self.nodes.push(ModelNode::VirtualService(node));

        tracing::debug!(gateway = %self.root, nodes = self.nodes.len(), "Built graph");
        Ok(ObjectGraph::new(self.root.clone(), self.nodes))
    }

    /// Returns the virtual services bound to the root, ordered by identity.
    fn attached_routes(&self) -> Vec<ConfigObject> {
        self.ctx
            .relationships()
            .dependents(Relation::GatewayVirtualService, self.root)
            .into_iter()
            .filter_map(|id| {
                self.ctx
                    .store
                    .get(Kind::VirtualService, &id.namespace, &id.name)
            })
            .collect()
    }

    /// Builds a pool group per routing rule and collects redirect and rewrite policies.
    fn http_routes(
        &mut self,
        vs: &ConfigObject,
        hosts: &[String],
        secure: bool,
        port: u16,
    ) -> Result<(Vec<String>, Vec<PolicyRule>), BuildError> {
        let mut groups = Vec::new();
        let mut rules = Vec::new();
        let Some(spec) = vs.as_virtual_service() else {
            return Ok((groups, rules));
        };

        for (idx, rule) in spec.http.iter().enumerate() {
            let matches = rule
                .matches
                .iter()
                .filter(|m| m.port.map_or(true, |p| p == u32::from(port)))
                .cloned()
                .collect::<Vec<_>>();
            if !rule.matches.is_empty() && matches.is_empty() {
                continue;
            }
            let mut match_rule = MatchRule {
                hosts: hosts.to_vec(),
                matches,
            };
            match_rule.normalize();

            if let Some(redirect) = &rule.redirect {
                rules.push(PolicyRule {
                    match_rule,
                    action: redirect_action(redirect),
                });
                continue;
            }
            if let Some(rewrite) = &rule.rewrite {
                rules.push(PolicyRule {
                    match_rule: match_rule.clone(),
                    action: PolicyAction::Rewrite {
                        host: rewrite.authority.clone(),
                        path: rewrite.uri.clone(),
                    },
                });
            }
            if rule.route.is_empty() {
                tracing::warn!(virtualservice = %vs.id, rule = idx, "Skipping rule without destinations");
                continue;
            }

            let key = Checksum::of(&(&vs.id, secure, &match_rule));
            if let Some(name) = self.built.get(&(NodeKind::PoolGroup, key)) {
                groups.push(name.clone());
                continue;
            }

            let implicit = if rule.route.len() == 1 { 100 } else { 0 };
            let mut members = Vec::new();
            for dst in &rule.route {
                let weight = dst.weight.map_or(implicit, |w| w.max(0) as u32);
                if let Some(pool) = self.pool(vs.namespace(), &dst.destination)? {
                    members.push(PoolGroupMember { pool, weight });
                }
            }
            if members.is_empty() {
                tracing::warn!(virtualservice = %vs.id, rule = idx, "Skipping rule without resolvable destinations");
                continue;
            }

            let base = format!("{}-pg", self.root_name);
            let name = self.namer.name(NodeKind::PoolGroup, key, &base);
            let node = Node::new(
                name.clone(),
                self.tenant.clone(),
                key,
                PoolGroupSpec {
                    match_rule,
                    members,
                },
            );
            self.add(ModelNode::PoolGroup(node));
            groups.push(name);
        }

        Ok((groups, rules))
    }

    /// Resolves a route destination into a pool, returning its name.
    fn pool(
        &mut self,
        namespace: &str,
        dst: &Destination,
    ) -> Result<Option<String>, BuildError> {
        let Some(svc_id) = self.ctx.relationships().service_host(&dst.host, namespace) else {
            tracing::warn!(gateway = %self.root, host = %dst.host, "Destination is not a cluster service");
            return Ok(None);
        };
        let Some(svc) = self
            .ctx
            .store
            .get(Kind::Service, &svc_id.namespace, &svc_id.name)
        else {
            tracing::warn!(gateway = %self.root, service = %svc_id, "Service not found");
            return Ok(None);
        };
        let Some(info) = svc.as_service() else {
            return Ok(None);
        };
        let port = match dst.port.map(|p| u16::try_from(p.number)) {
            None => None,
            Some(Ok(port)) => Some(port),
            Some(Err(_)) => {
                tracing::warn!(gateway = %self.root, service = %svc_id, "Destination port is out of range");
                return Ok(None);
            }
        };
        let Some(svc_port) = info.port(port) else {
            tracing::warn!(gateway = %self.root, service = %svc_id, ?port, "Service port not found");
            return Ok(None);
        };

        let key = Checksum::of(&(&svc_id, svc_port.port, &dst.subset, self.root));
        if let Some(name) = self.built.get(&(NodeKind::Pool, key)) {
            return Ok(Some(name.clone()));
        }

        let rule = self.destination_rule(&svc_id);
        let rule = rule.as_ref().and_then(ConfigObject::as_destination_rule);
        let lb_algorithm =
            lb_algorithm(rule.and_then(|dr| dr.load_balancer(dst.subset.as_deref())));

        let selector = match dst.subset.as_deref() {
            None => None,
            Some(subset) => match rule.and_then(|dr| dr.subset(subset)) {
                Some(s) => {
                    require_synced(self.ctx, Kind::Pod)?;
                    Some(Selector::from_map(s.labels.clone()))
                }
                None => {
                    tracing::warn!(gateway = %self.root, service = %svc_id, %subset, "Subset not found");
                    return Ok(None);
                }
            },
        };

        let servers = self.servers(&svc_id, svc_port, selector.as_ref());
        let mut base = format!(
            "{}--{}-{}-{}",
            self.root_name, svc_id.namespace, svc_id.name, svc_port.port
        );
        if let Some(subset) = &dst.subset {
            base.push('-');
            base.push_str(subset);
        }
        let name = self.namer.name(NodeKind::Pool, key, &base);
        let node = Node::new(
            name.clone(),
            self.tenant.clone(),
            key,
            PoolSpec {
                service: svc_id,
                port: svc_port.port,
                subset: dst.subset.clone(),
                lb_algorithm,
                servers,
            },
        );
        self.add(ModelNode::Pool(node));
        Ok(Some(name))
    }

    /// Lists the endpoint addresses backing a service port, restricted to a subset's pods.
    fn servers(
        &self,
        svc_id: &ResourceId,
        svc_port: &ServicePortInfo,
        selector: Option<&Selector>,
    ) -> Vec<ServerAddr> {
        let store = &self.ctx.store;
        let Some(endpoints) = store.get(Kind::Endpoints, &svc_id.namespace, &svc_id.name) else {
            return Vec::new();
        };
        let Some(info) = endpoints.as_endpoints() else {
            return Vec::new();
        };

        let mut servers = Vec::new();
        for subset in &info.subsets {
            let Some(port) = subset.backend_port(svc_port) else {
                continue;
            };
            for addr in &subset.addresses {
                if let Some(selector) = selector {
                    let selected = addr
                        .pod
                        .as_deref()
                        .and_then(|pod| store.get(Kind::Pod, &svc_id.namespace, pod))
                        .map_or(false, |pod| selector.matches(&pod.metadata.labels));
                    if !selected {
                        continue;
                    }
                }
                servers.push(ServerAddr { ip: addr.ip, port });
            }
        }
        servers
    }

    /// Finds the destination rule for a service. When several rules target the same service, the
    /// first by identity wins.
    fn destination_rule(&self, svc_id: &ResourceId) -> Option<ConfigObject> {
        self.ctx
            .relationships()
            .dependents(Relation::ServiceDestinationRule, svc_id)
            .into_iter()
            .find_map(|id| {
                self.ctx
                    .store
                    .get(Kind::DestinationRule, &id.namespace, &id.name)
            })
    }

    fn tls_key_cert(&mut self, credential: &str) -> Result<Option<String>, BuildError> {
        require_synced(self.ctx, Kind::Secret)?;

        let secret_id = ResourceId::new(self.root.namespace.as_str(), credential);
        let key = Checksum::of(&secret_id);
        if let Some(name) = self.built.get(&(NodeKind::TlsKeyCert, key)) {
            return Ok(Some(name.clone()));
        }

        let secret = self
            .ctx
            .store
            .get(Kind::Secret, &secret_id.namespace, &secret_id.name);
        let Some(SecretInfo {
            cert: Some(certificate),
            key: Some(private_key),
        }) = secret.as_ref().and_then(ConfigObject::as_secret)
        else {
            tracing::warn!(gateway = %self.root, secret = %secret_id, "TLS credential not found; skipping listener");
            return Ok(None);
        };

        let base = format!("{}-{}", self.root_name, secret_id.name);
        let name = self.namer.name(NodeKind::TlsKeyCert, key, &base);
        let node = Node::new(
            name.clone(),
            self.tenant.clone(),
            key,
            TlsKeyCertSpec {
                secret: secret_id,
                certificate: certificate.clone(),
                key: private_key.clone(),
            },
        );
        self.add(ModelNode::TlsKeyCert(node));
        Ok(Some(name))
    }

    fn sni_child(
        &mut self,
        vs: &ConfigObject,
        hosts: Vec<String>,
        cert: &str,
        port: u16,
    ) -> Result<(), BuildError> {
        let key = Checksum::of(&(&vs.id, port));
        if self.built.contains_key(&(NodeKind::SniChild, key)) {
            return Ok(());
        }

        let (pool_groups, rules) = self.http_routes(vs, &hosts, true, port)?;
        let mut http_policy_sets = Vec::new();
        if !rules.is_empty() {
            let policy_key = Checksum::of(&(key, NodeKind::HttpPolicySet));
            http_policy_sets.push(self.policy_set(policy_key, rules));
        }

        let base = format!("{}--{}-{}", self.root_name, vs.namespace(), vs.name());
        let name = self.namer.name(NodeKind::SniChild, key, &base);
        let node = Node::new(
            name,
            self.tenant.clone(),
            key,
            SniChildSpec {
                parent: ParentRef {
                    tenant: self.tenant.clone(),
                    name: self.root_name.clone(),
                },
                hosts,
                ssl_key_cert: cert.to_string(),
                pool_groups,
                http_policy_sets,
            },
        );
        self.add(ModelNode::SniChild(node));
        Ok(())
    }

    fn policy_set(&mut self, key: Checksum, rules: Vec<PolicyRule>) -> String {
        if let Some(name) = self.built.get(&(NodeKind::HttpPolicySet, key)) {
            return name.clone();
        }
        let base = format!("{}-hps", self.root_name);
        let name = self.namer.name(NodeKind::HttpPolicySet, key, &base);
        let node = Node::new(
            name.clone(),
            self.tenant.clone(),
            key,
            HttpPolicySetSpec { rules },
        );
        self.add(ModelNode::HttpPolicySet(node));
        name
    }

    fn add(&mut self, node: ModelNode) {
        self.built
            .insert((node.kind(), node.key()), node.name().to_string());
        self.nodes.push(node);
    }
}

fn require_synced(ctx: &ReconciliationContext, kind: Kind) -> Result<(), BuildError> {
    if ctx.store.is_synced(kind) {
        Ok(())
    } else {
        Err(BuildError::NotSynced(kind))
    }
}

fn listener(server: &Server) -> Option<Listener> {
    let port = u16::try_from(server.port.number).ok().filter(|p| *p != 0)?;
    let tls = server.terminating_credential().is_some();
    let protocol = match server.port.protocol {
        Protocol::Http | Protocol::Http2 | Protocol::Grpc if tls => ListenerProtocol::Https,
        Protocol::Http | Protocol::Http2 | Protocol::Grpc => ListenerProtocol::Http,
        Protocol::Https => ListenerProtocol::Https,
        Protocol::Tcp | Protocol::Tls => ListenerProtocol::Tcp,
        Protocol::Unknown => return None,
    };
    Some(Listener {
        port,
        protocol,
        tls,
    })
}

fn lb_algorithm(lb: Option<SimpleLb>) -> LbAlgorithm {
    match lb {
        Some(SimpleLb::LeastConn | SimpleLb::LeastRequest) => LbAlgorithm::LeastConnections,
        Some(SimpleLb::Random) => LbAlgorithm::Random,
        _ => LbAlgorithm::RoundRobin,
    }
}

fn redirect_action(redirect: &HttpRedirect) -> PolicyAction {
    PolicyAction::Redirect {
        scheme: redirect.scheme.clone(),
        host: redirect.authority.clone(),
        port: redirect.port.and_then(|p| u16::try_from(p).ok()),
        path: redirect.uri.clone(),
        status_code: redirect
            .redirect_code
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(301),
    }
}

/// Returns the virtual service's hosts that a listener serves.
///
/// Listener hosts may be scoped to a namespace as `<ns>/<host>`, where `*` is any namespace and
/// `.` is the gateway's namespace.
fn matched_hosts(gateway_ns: &str, server: &Server, vs: &ConfigObject) -> Vec<String> {
    let Some(spec) = vs.as_virtual_service() else {
        return Vec::new();
    };
    let patterns = server
        .hosts
        .iter()
        .filter_map(|h| match h.split_once('/') {
            Some(("*", host)) => Some(host),
            Some((".", host)) if vs.namespace() == gateway_ns => Some(host),
            Some((ns, host)) if ns == vs.namespace() => Some(host),
            Some(_) => None,
            None => Some(h.as_str()),
        })
        .collect::<Vec<_>>();

    let mut hosts = spec
        .hosts
        .iter()
        .filter_map(|host| patterns.iter().find_map(|p| intersect(p, host)))
        .collect::<Vec<_>>();
    hosts.sort();
    hosts.dedup();
    hosts
}

/// Returns the more specific of two hosts if either covers the other.
fn intersect(pattern: &str, host: &str) -> Option<String> {
    if pattern == host || pattern == "*" {
        return Some(host.to_string());
    }
    if host == "*" {
        return Some(pattern.to_string());
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        if host.ends_with(suffix) {
            return Some(host.to_string());
        }
    }
    if let Some(suffix) = host.strip_prefix('*') {
        if pattern.ends_with(suffix) {
            return Some(pattern.to_string());
        }
    }
    None
}

fn strip_namespace(host: &str) -> &str {
    host.split_once('/').map_or(host, |(_, h)| h)
}
