use crate::{cache::ReconciliationCache, model_store::ModelStore};
use meshlb_core::ResourceId;
use meshlb_k8s_index::{RelationshipIndex, SharedStore};
use std::sync::Arc;

pub const DEFAULT_TENANT: &str = "admin";

/// The state shared by every stage of the pipeline.
#[derive(Clone, Debug)]
pub struct ReconciliationContext {
    pub store: SharedStore,
    pub models: Arc<ModelStore>,
    pub cache: Arc<ReconciliationCache>,
    pub settings: Arc<BuildSettings>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildSettings {
    /// Prefixes the names of all remote objects so that several clusters may share a controller.
    pub cluster_name: String,
    pub tenant: TenantMode,
}

/// Determines the remote tenant that owns a root's objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TenantMode {
    Fixed(String),
    PerNamespace,
}

// === impl ReconciliationContext ===

impl ReconciliationContext {
    pub fn new(store: SharedStore, settings: BuildSettings) -> Self {
        Self {
            store,
            models: Default::default(),
            cache: Default::default(),
            settings: Arc::new(settings),
        }
    }

    pub fn relationships(&self) -> &Arc<RelationshipIndex> {
        self.store.relationships()
    }
}

// === impl BuildSettings ===

impl BuildSettings {
    pub fn tenant_for(&self, namespace: &str) -> String {
        match &self.tenant {
            TenantMode::Fixed(tenant) => tenant.clone(),
            TenantMode::PerNamespace => namespace.to_string(),
        }
    }

    /// The name of the remote virtual service built for a gateway.
    pub fn root_name(&self, root: &ResourceId) -> String {
        format!("{}--{}-{}", self.cluster_name, root.namespace, root.name)
    }
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            cluster_name: "cluster".to_string(),
            tenant: TenantMode::Fixed(DEFAULT_TENANT.to_string()),
        }
    }
}
