//! Builds the remote object graph for each gateway and tracks what has been applied.
//!
//! A graph is rebuilt from the config store whenever a key traced to its root changes. Published
//! graphs are held in the [`ModelStore`] until the emission stage applies them, after which the
//! [`ReconciliationCache`] records the remote identity and checksum of every object.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod builder;
mod cache;
mod context;
mod model_store;
mod naming;

#[cfg(test)]
mod tests;

pub use self::{
    builder::{build, BuildError},
    cache::{CacheEntry, ChildKey, ReconciliationCache},
    context::{BuildSettings, ReconciliationContext, TenantMode, DEFAULT_TENANT},
    model_store::ModelStore,
    naming::Namer,
};

// === impl BuildError ===

impl BuildError {
    /// Missing synchronization resolves once the watches catch up, so the key should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotSynced(_))
    }
}
