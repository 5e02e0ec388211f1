//! Reduces Kubernetes resources to configuration objects.

use meshlb_core::{
    config::{
        EndpointAddr, EndpointPortInfo, EndpointSubsetInfo, EndpointsInfo, PodInfo, SecretInfo,
        ServiceInfo, ServicePortInfo, TargetPort,
    },
    ConfigObject, Kind, Metadata, Payload, ResourceId,
};
use meshlb_k8s_api::{
    self as k8s,
    labels::Selector,
    networking::{DestinationRule, Gateway, VirtualService},
    IntOrString, ResourceExt, Time,
};
use std::net::IpAddr;

/// A resource that can be held in the config store.
pub trait IntoConfig: ResourceExt<DynamicType = ()> {
    const KIND: Kind;

    fn payload(&self) -> Result<Payload, ConvertError>;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("{0} is missing a namespace")]
    MissingNamespace(Kind),

    #[error("port {0} is out of range")]
    InvalidPort(i32),

    #[error("invalid IP address {0:?}")]
    InvalidIp(String),

    #[error("secret key {0:?} is not valid UTF-8")]
    InvalidSecretData(&'static str),
}

pub fn to_config<R: IntoConfig>(resource: &R) -> Result<ConfigObject, ConvertError> {
    let namespace = resource
        .namespace()
        .ok_or(ConvertError::MissingNamespace(R::KIND))?;
    let meta = resource.meta();
    Ok(ConfigObject {
        id: ResourceId::new(namespace, resource.name_any()),
        version: meta.resource_version.clone().unwrap_or_default(),
        metadata: Metadata {
            labels: meta.labels.clone().into(),
            annotations: meta.annotations.clone().unwrap_or_default(),
            creation_timestamp: meta.creation_timestamp.as_ref().map(|Time(t)| *t),
        },
        payload: resource.payload()?,
    })
}

impl IntoConfig for Gateway {
    const KIND: Kind = Kind::Gateway;

    fn payload(&self) -> Result<Payload, ConvertError> {
        Ok(Payload::Gateway(self.spec.clone()))
    }
}

impl IntoConfig for VirtualService {
    const KIND: Kind = Kind::VirtualService;

    fn payload(&self) -> Result<Payload, ConvertError> {
        Ok(Payload::VirtualService(self.spec.clone()))
    }
}

impl IntoConfig for DestinationRule {
    const KIND: Kind = Kind::DestinationRule;

    fn payload(&self) -> Result<Payload, ConvertError> {
        Ok(Payload::DestinationRule(self.spec.clone()))
    }
}

impl IntoConfig for k8s::Service {
    const KIND: Kind = Kind::Service;

    fn payload(&self) -> Result<Payload, ConvertError> {
        let spec = self.spec.as_ref();
        let ports = spec
            .and_then(|s| s.ports.as_ref())
            .into_iter()
            .flatten()
            .map(|p| {
                let port = port(p.port)?;
                let target_port = match &p.target_port {
                    Some(IntOrString::Int(n)) => TargetPort::Number(self::port(*n)?),
                    Some(IntOrString::String(name)) => TargetPort::Name(name.clone()),
                    None => TargetPort::Number(port),
                };
                Ok(ServicePortInfo {
                    name: p.name.clone(),
                    port,
                    target_port,
                })
            })
            .collect::<Result<Vec<_>, ConvertError>>()?;
        let selector = spec
            .and_then(|s| s.selector.clone())
            .map(Selector::from_map)
            .unwrap_or_default();
        Ok(Payload::Service(ServiceInfo { ports, selector }))
    }
}

impl IntoConfig for k8s::Endpoints {
    const KIND: Kind = Kind::Endpoints;

    fn payload(&self) -> Result<Payload, ConvertError> {
        let subsets = self
            .subsets
            .iter()
            .flatten()
            .map(|subset| {
                let addresses = subset
                    .addresses
                    .iter()
                    .flatten()
                    .map(|addr| {
                        let ip = addr
                            .ip
                            .parse::<IpAddr>()
                            .map_err(|_| ConvertError::InvalidIp(addr.ip.clone()))?;
                        let pod = addr
                            .target_ref
                            .as_ref()
                            .filter(|r| r.kind.as_deref() == Some("Pod"))
                            .and_then(|r| r.name.clone());
                        Ok(EndpointAddr { ip, pod })
                    })
                    .collect::<Result<Vec<_>, ConvertError>>()?;
                let ports = subset
                    .ports
                    .iter()
                    .flatten()
                    .map(|p| {
                        Ok(EndpointPortInfo {
                            name: p.name.clone(),
                            port: port(p.port)?,
                        })
                    })
                    .collect::<Result<Vec<_>, ConvertError>>()?;
                Ok(EndpointSubsetInfo { addresses, ports })
            })
            .collect::<Result<Vec<_>, ConvertError>>()?;
        Ok(Payload::Endpoints(EndpointsInfo { subsets }))
    }
}

impl IntoConfig for k8s::Pod {
    const KIND: Kind = Kind::Pod;

    fn payload(&self) -> Result<Payload, ConvertError> {
        let ip = match self.status.as_ref().and_then(|s| s.pod_ip.as_deref()) {
            Some(ip) => Some(
                ip.parse::<IpAddr>()
                    .map_err(|_| ConvertError::InvalidIp(ip.to_string()))?,
            ),
            None => None,
        };
        Ok(Payload::Pod(PodInfo { ip }))
    }
}

impl IntoConfig for k8s::Secret {
    const KIND: Kind = Kind::Secret;

    fn payload(&self) -> Result<Payload, ConvertError> {
        Ok(Payload::Secret(SecretInfo {
            cert: secret_value(self, "tls.crt")?,
            key: secret_value(self, "tls.key")?,
        }))
    }
}

fn secret_value(secret: &k8s::Secret, key: &'static str) -> Result<Option<String>, ConvertError> {
    if let Some(k8s::ByteString(bytes)) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(bytes.clone())
            .map(Some)
            .map_err(|_| ConvertError::InvalidSecretData(key));
    }
    Ok(secret
        .string_data
        .as_ref()
        .and_then(|d| d.get(key))
        .cloned())
}

fn port(port: i32) -> Result<u16, ConvertError> {
    u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or(ConvertError::InvalidPort(port))
}
