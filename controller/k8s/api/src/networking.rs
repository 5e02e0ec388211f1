//! Mesh networking resources (`networking.istio.io/v1beta1`).
//!
//! Only the fields the translator reads are modeled; unknown fields are ignored on decode.

pub mod destination_rule;
pub mod gateway;
pub mod virtual_service;

pub use self::{
    destination_rule::{
        DestinationRule, DestinationRuleSpec, LoadBalancerSettings, SimpleLb, Subset,
        TrafficPolicy,
    },
    gateway::{Gateway, GatewaySpec, Port, Protocol, Server, ServerTls, TlsMode},
    virtual_service::{
        Destination, HttpMatchRequest, HttpRedirect, HttpRewrite, HttpRoute,
        HttpRouteDestination, PortSelector, VirtualService, VirtualServiceSpec,
    },
};
use serde::{Deserialize, Serialize};

pub const API_GROUP: &str = "networking.istio.io";

/// The reserved gateway name that binds a virtual service to sidecars rather than to a gateway.
pub const MESH_GATEWAY: &str = "mesh";

/// Matches a string value, as used for URIs and headers.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}
