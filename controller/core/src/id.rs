use serde::Serialize;
use std::{fmt, str::FromStr};

/// The kinds of configuration objects tracked by the translator.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Gateway,
    VirtualService,
    DestinationRule,
    Service,
    Endpoints,
    Pod,
    Secret,
}

/// Identifies a namespaced object of an implied kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

/// Identifies a configuration object across kinds.
///
/// Keys are rendered as `<kind>/<namespace>/<name>` on every work queue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub kind: Kind,
    pub id: ResourceId,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("malformed key {0:?}: expected <kind>/<namespace>/<name>")]
    Malformed(String),

    #[error("unknown kind {0:?}")]
    UnknownKind(String),
}

// === impl Kind ===

impl Kind {
    pub const ALL: [Kind; 7] = [
        Kind::Gateway,
        Kind::VirtualService,
        Kind::DestinationRule,
        Kind::Service,
        Kind::Endpoints,
        Kind::Pod,
        Kind::Secret,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gateway => "gateway",
            Self::VirtualService => "virtualservice",
            Self::DestinationRule => "destinationrule",
            Self::Service => "service",
            Self::Endpoints => "endpoints",
            Self::Pod => "pod",
            Self::Secret => "secret",
        }
    }

    /// Gateways are the only kind from which object graphs are built.
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Gateway)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| KeyError::UnknownKind(s.to_string()))
    }
}

// === impl ResourceId ===

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// === impl ObjectKey ===

impl ObjectKey {
    pub fn new(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id: ResourceId::new(namespace, name),
        }
    }

    pub fn gateway(id: ResourceId) -> Self {
        Self {
            kind: Kind::Gateway,
            id,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.id.namespace
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.id.namespace, self.id.name)
    }
}

impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(ns), Some(name)) if !ns.is_empty() && !name.is_empty() => {
                Ok(Self::new(kind.parse()?, ns, name))
            }
            _ => Err(KeyError::Malformed(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format() {
        let key = ObjectKey::new(Kind::Gateway, "default", "my-gateway");
        assert_eq!(key.to_string(), "gateway/default/my-gateway");
        assert_eq!("gateway/default/my-gateway".parse::<ObjectKey>(), Ok(key));

        let key = "virtualservice/ns-0/reviews".parse::<ObjectKey>().unwrap();
        assert_eq!(key.kind, Kind::VirtualService);
        assert_eq!(key.namespace(), "ns-0");
        assert_eq!(key.name(), "reviews");
    }

    #[test]
    fn key_errors() {
        assert_eq!(
            "gateway/default".parse::<ObjectKey>(),
            Err(KeyError::Malformed("gateway/default".into()))
        );
        assert_eq!(
            "gateway//gw".parse::<ObjectKey>(),
            Err(KeyError::Malformed("gateway//gw".into()))
        );
        assert_eq!(
            "ingress/default/gw".parse::<ObjectKey>(),
            Err(KeyError::UnknownKind("ingress".into()))
        );
    }

    #[test]
    fn kinds_round_trip_through_strings() {
        for kind in Kind::ALL {
            assert_eq!(kind.as_str().parse::<Kind>(), Ok(kind));
        }
    }
}
