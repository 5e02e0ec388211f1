//! Emits published object graphs to the remote load-balancer controller.
//!
//! Objects are created in dependency order (pools before the pool groups that reference them,
//! and so on up to the SNI children) and deleted in the reverse order.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod client;
mod emitter;
mod metrics;

#[cfg(test)]
mod tests;

pub use self::{
    client::{DryRun, Method, RemoteClient, RemoteError, RemoteObject, RemoteOp},
    emitter::{EmitError, Emitter, Outcome},
    metrics::EmitMetrics,
};
