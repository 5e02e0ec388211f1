use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes a load balancer operating at the edge of the mesh, receiving incoming connections.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "networking.istio.io",
    version = "v1beta1",
    kind = "Gateway",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    #[serde(default)]
    pub servers: Vec<Server>,

    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

/// A listener exposed by the gateway.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub port: Port,

    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ServerTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Port {
    pub number: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub protocol: Protocol,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
    Http2,
    Grpc,
    Tcp,
    Tls,
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTls {
    #[serde(default)]
    pub https_redirect: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<TlsMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_name: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TlsMode {
    Passthrough,
    Simple,
    Mutual,
    AutoPassthrough,
    IstioMutual,
    OptionalMutual,
    #[serde(other)]
    Unknown,
}

// === impl Protocol ===

impl Protocol {
    /// Returns true if the protocol carries HTTP traffic once TLS, if any, is terminated.
    pub fn is_http(&self) -> bool {
        matches!(self, Self::Http | Self::Https | Self::Http2 | Self::Grpc)
    }
}

// === impl Server ===

impl Server {
    /// Returns the credential used to terminate TLS on this listener, if it terminates TLS.
    pub fn terminating_credential(&self) -> Option<&str> {
        let tls = self.tls.as_ref()?;
        match tls.mode? {
            TlsMode::Simple | TlsMode::Mutual | TlsMode::OptionalMutual => {
                tls.credential_name.as_deref()
            }
            _ => None,
        }
    }

    pub fn https_redirect(&self) -> bool {
        self.tls.as_ref().map(|tls| tls.https_redirect).unwrap_or(false)
    }
}
