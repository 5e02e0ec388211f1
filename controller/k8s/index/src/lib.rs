//! Configuration state for the translator.
//!
//! Every watched object is reduced to a [`ConfigObject`](meshlb_core::ConfigObject) and held in the
//! [`ConfigStore`], partitioned by kind and namespace. Objects that reference others (virtual
//! services, destination rules and gateways) maintain edges in the [`RelationshipIndex`] so that a
//! change to any object can be traced back to the gateways whose graphs it affects:
//!
//! ```text
//! [ Secret ] <- [ Gateway ] <- [ VirtualService ] -> [ Service ] <- [ DestinationRule ]
//!                                                        ^
//!                                          [ Endpoints ] + [ Pod ]
//! ```
//!
//! The [`Feed`] applies watch events and snapshots to the store, diffs object versions and enqueues
//! the keys of changed objects for tracing.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod convert;
pub mod diff;
mod feed;
pub mod metrics;
pub mod relationships;
mod store;
mod trace;

#[cfg(test)]
mod tests;

pub use self::{
    convert::IntoConfig,
    diff::{calculate_updates, Change, Updates, Versions},
    feed::{Enqueue, Feed},
    metrics::IndexMetrics,
    relationships::{Relation, RelationshipIndex},
    store::{ConfigStore, SharedStore},
    trace::{trace, TraceError, TraceResult},
};
