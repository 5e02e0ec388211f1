#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod checksum;
pub mod config;
mod id;
pub mod model;

pub use self::{
    checksum::Checksum,
    config::{ConfigObject, Metadata, Payload},
    id::{Kind, KeyError, ObjectKey, ResourceId},
    model::{ModelNode, NodeKind, ObjectGraph, RemoteKey},
};
