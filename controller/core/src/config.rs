//! Configuration objects as held by the config store.
//!
//! Mesh resources keep their full spec; orchestrator resources are reduced to the parts the
//! translator reads.

use crate::{Kind, ObjectKey, ResourceId};
use chrono::{DateTime, Utc};
use meshlb_k8s_api::{
    labels::Selector,
    networking::{DestinationRuleSpec, GatewaySpec, VirtualServiceSpec},
    Labels,
};
use std::{collections::BTreeMap, net::IpAddr};

/// A versioned configuration object.
///
/// The version is an opaque resource version; a changed version is the only signal that the
/// payload changed.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigObject {
    pub id: ResourceId,
    pub version: String,
    pub metadata: Metadata,
    pub payload: Payload,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    pub labels: Labels,
    pub annotations: BTreeMap<String, String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Gateway(GatewaySpec),
    VirtualService(VirtualServiceSpec),
    DestinationRule(DestinationRuleSpec),
    Service(ServiceInfo),
    Endpoints(EndpointsInfo),
    Pod(PodInfo),
    Secret(SecretInfo),
}

/// The important parts of a `Service`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ServiceInfo {
    pub ports: Vec<ServicePortInfo>,
    pub selector: Selector,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServicePortInfo {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: TargetPort,
}

/// References a container port by number or by name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TargetPort {
    Number(u16),
    Name(String),
}

/// The important parts of an `Endpoints`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EndpointsInfo {
    pub subsets: Vec<EndpointSubsetInfo>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EndpointSubsetInfo {
    pub addresses: Vec<EndpointAddr>,
    pub ports: Vec<EndpointPortInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointAddr {
    pub ip: IpAddr,
    /// The name of the pod backing this address, if it is a pod.
    pub pod: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointPortInfo {
    pub name: Option<String>,
    pub port: u16,
}

/// The important parts of a `Pod`. Labels are held in the object's metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PodInfo {
    pub ip: Option<IpAddr>,
}

/// The TLS material of a `kubernetes.io/tls` secret.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretInfo {
    pub cert: Option<String>,
    pub key: Option<String>,
}

// === impl ConfigObject ===

impl ConfigObject {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            id: ResourceId::new(namespace, name),
            version: version.into(),
            metadata: Metadata::default(),
            payload,
        }
    }

    pub fn with_labels(mut self, labels: Labels) -> Self {
        self.metadata.labels = labels;
        self
    }

    pub fn kind(&self) -> Kind {
        self.payload.kind()
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            kind: self.kind(),
            id: self.id.clone(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.id.namespace
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn as_gateway(&self) -> Option<&GatewaySpec> {
        match &self.payload {
            Payload::Gateway(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_virtual_service(&self) -> Option<&VirtualServiceSpec> {
        match &self.payload {
            Payload::VirtualService(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_destination_rule(&self) -> Option<&DestinationRuleSpec> {
        match &self.payload {
            Payload::DestinationRule(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceInfo> {
        match &self.payload {
            Payload::Service(svc) => Some(svc),
            _ => None,
        }
    }

    pub fn as_endpoints(&self) -> Option<&EndpointsInfo> {
        match &self.payload {
            Payload::Endpoints(ep) => Some(ep),
            _ => None,
        }
    }

    pub fn as_pod(&self) -> Option<&PodInfo> {
        match &self.payload {
            Payload::Pod(pod) => Some(pod),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&SecretInfo> {
        match &self.payload {
            Payload::Secret(secret) => Some(secret),
            _ => None,
        }
    }
}

// === impl Payload ===

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Gateway(_) => Kind::Gateway,
            Self::VirtualService(_) => Kind::VirtualService,
            Self::DestinationRule(_) => Kind::DestinationRule,
            Self::Service(_) => Kind::Service,
            Self::Endpoints(_) => Kind::Endpoints,
            Self::Pod(_) => Kind::Pod,
            Self::Secret(_) => Kind::Secret,
        }
    }
}

// === impl ServiceInfo ===

impl ServiceInfo {
    /// Selects the service port a route destination refers to.
    ///
    /// Without an explicit port, a single-port service resolves to its only port.
    pub fn port(&self, port: Option<u16>) -> Option<&ServicePortInfo> {
        match port {
            Some(port) => self.ports.iter().find(|p| p.port == port),
            None if self.ports.len() == 1 => self.ports.first(),
            None => None,
        }
    }
}

// === impl EndpointSubsetInfo ===

impl EndpointSubsetInfo {
    /// Finds the endpoint port that backs the given service port.
    ///
    /// Named service ports are matched by name; otherwise the target port number is used.
    pub fn backend_port(&self, svc_port: &ServicePortInfo) -> Option<u16> {
        if let Some(name) = svc_port.name.as_deref() {
            if let Some(p) = self.ports.iter().find(|p| p.name.as_deref() == Some(name)) {
                return Some(p.port);
            }
        }
        match &svc_port.target_port {
            TargetPort::Number(n) => self.ports.iter().find(|p| p.port == *n).map(|p| p.port),
            TargetPort::Name(name) => self
                .ports
                .iter()
                .find(|p| p.name.as_deref() == Some(name.as_str()))
                .map(|p| p.port),
        }
    }
}

impl std::fmt::Debug for SecretInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretInfo")
            .field("cert", &self.cert.as_ref().map(|c| c.len()))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: Option<&str>, port: u16, target: TargetPort) -> ServicePortInfo {
        ServicePortInfo {
            name: name.map(Into::into),
            port,
            target_port: target,
        }
    }

    #[test]
    fn service_port_selection() {
        let single = ServiceInfo {
            ports: vec![port(None, 80, TargetPort::Number(8080))],
            ..Default::default()
        };
        assert_eq!(single.port(None).map(|p| p.port), Some(80));
        assert_eq!(single.port(Some(80)).map(|p| p.port), Some(80));
        assert!(single.port(Some(81)).is_none());

        let multi = ServiceInfo {
            ports: vec![
                port(Some("http"), 80, TargetPort::Number(8080)),
                port(Some("admin"), 9990, TargetPort::Name("admin".into())),
            ],
            ..Default::default()
        };
        assert!(multi.port(None).is_none(), "ambiguous without a port");
        assert_eq!(multi.port(Some(9990)).map(|p| p.port), Some(9990));
    }

    #[test]
    fn endpoint_backend_port() {
        let subset = EndpointSubsetInfo {
            addresses: vec![],
            ports: vec![
                EndpointPortInfo {
                    name: Some("http".into()),
                    port: 8080,
                },
                EndpointPortInfo {
                    name: Some("admin-http".into()),
                    port: 9990,
                },
            ],
        };
        assert_eq!(
            subset.backend_port(&port(Some("http"), 80, TargetPort::Number(1))),
            Some(8080),
            "named service ports match by name"
        );
        assert_eq!(
            subset.backend_port(&port(None, 80, TargetPort::Number(9990))),
            Some(9990)
        );
        assert_eq!(
            subset.backend_port(&port(None, 80, TargetPort::Name("admin-http".into()))),
            Some(9990)
        );
        assert_eq!(
            subset.backend_port(&port(None, 80, TargetPort::Number(7000))),
            None
        );
    }
}
