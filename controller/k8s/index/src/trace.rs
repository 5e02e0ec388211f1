use crate::{relationships::Relation, store::ConfigStore};
use meshlb_core::{Kind, ObjectKey, ResourceId};
use std::collections::BTreeSet;

/// The roots affected by a change to a single object.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceResult {
    pub roots: BTreeSet<ResourceId>,

    /// Set when the traced object is itself a root that no longer exists.
    pub root_deleted: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("{0} objects have not been synced")]
    NotSynced(Kind),
}

/// Maps a changed object to the gateways whose graphs it may affect.
///
/// Owners are re-linked from their current declaration before resolving, and targets they
/// dropped since the last trace are included so that the roots that lost them are rebuilt.
pub fn trace(store: &ConfigStore, key: &ObjectKey) -> Result<TraceResult, TraceError> {
    let index = store.relationships();
    let current = store.relink(key.kind, key.namespace(), key.name());

    let mut result = TraceResult::default();
    match key.kind {
        Kind::Gateway => {
            result.roots.insert(key.id.clone());
            result.root_deleted = current.is_none();
        }

        Kind::VirtualService => {
            result.roots = index.references(Relation::GatewayVirtualService, &key.id);
            result
                .roots
                .extend(index.take_stale(Relation::GatewayVirtualService, &key.id));
            // Dropped services do not change which roots are affected.
            index.take_stale(Relation::ServiceVirtualService, &key.id);
        }

        Kind::DestinationRule => {
            let mut services = index.references(Relation::ServiceDestinationRule, &key.id);
            services.extend(index.take_stale(Relation::ServiceDestinationRule, &key.id));
            result.roots = services
                .iter()
                .flat_map(|svc| index.service_roots(svc))
                .collect();
        }

        Kind::Service | Kind::Endpoints | Kind::Secret => {
            result.roots = index.resolve_roots(key.kind, &key.id);
        }

        Kind::Pod => {
            if !store.is_synced(Kind::Service) {
                return Err(TraceError::NotSynced(Kind::Service));
            }
            if let Some(pod) = current.as_ref() {
                result.roots = selecting_services(store, key.namespace(), pod)
                    .iter()
                    .flat_map(|svc| index.service_roots(svc))
                    .collect();
            }
        }
    }

    if key.kind == Kind::Gateway {
        // Secrets a gateway stopped using no longer affect any root.
        index.take_stale(Relation::SecretGateway, &key.id);
    }

    tracing::trace!(%key, roots = result.roots.len(), root_deleted = result.root_deleted);
    Ok(result)
}

fn selecting_services(
    store: &ConfigStore,
    namespace: &str,
    pod: &meshlb_core::ConfigObject,
) -> Vec<ResourceId> {
    store
        .list(Kind::Service, namespace)
        .into_iter()
        .filter(|svc| {
            svc.as_service().map_or(false, |info| {
                !info.selector.is_empty() && info.selector.matches(&pod.metadata.labels)
            })
        })
        .map(|svc| svc.id)
        .collect()
}

impl TraceError {
    /// Trace errors clear once the missing state is synced.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotSynced(_))
    }
}
