use crate::{
    client::{Method, RemoteClient, RemoteError, RemoteObject, RemoteOp},
    metrics::EmitMetrics,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use meshlb_core::{NodeKind, ObjectGraph, RemoteKey, ResourceId};
use meshlb_graph::{CacheEntry, ChildKey, ReconciliationContext};

/// Applies published graphs to the remote controller and records the outcome in the
/// reconciliation cache.
#[derive(Debug)]
pub struct Emitter<C> {
    ctx: ReconciliationContext,
    client: C,
    metrics: EmitMetrics,
}

#[derive(Debug, thiserror::Error)]
#[error("{method} {kind} {tenant}/{name} failed: {source}")]
pub struct EmitError {
    pub method: Method,
    pub kind: NodeKind,
    pub tenant: String,
    pub name: String,
    #[source]
    pub source: RemoteError,
}

/// Counts the operations of a successful emission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

// === impl Emitter ===

impl<C: RemoteClient> Emitter<C> {
    pub fn new(ctx: ReconciliationContext, client: C, metrics: EmitMetrics) -> Self {
        Self {
            ctx,
            client,
            metrics,
        }
    }

    /// Brings the remote objects owned by a root in line with its published graph.
    ///
    /// When no graph is published, every object the root owns is deleted. The cache is only
    /// updated once every operation has succeeded.
    pub async fn emit(&self, root: &ResourceId) -> Result<Outcome, EmitError> {
        match self.ctx.models.get(root) {
            Some(graph) => self.apply(root, &graph).await,
            None => self.delete_root(root).await,
        }
    }

    async fn apply(&self, root: &ResourceId, graph: &ObjectGraph) -> Result<Outcome, EmitError> {
        let owned = self
            .ctx
            .cache
            .owned_by(root)
            .into_iter()
            .collect::<HashMap<_, _>>();

        let mut outcome = Outcome::default();
        // Objects created by this batch that no live object references yet.
        let mut unreferenced = Vec::new();
        let mut applied = Vec::with_capacity(graph.nodes().len());
        for node in graph.in_create_order() {
            let key = node.remote_key();
            let remote_id = owned.get(&key).map(|e| e.remote_id.clone());
            let op = RemoteOp {
                method: if remote_id.is_some() {
                    Method::Put
                } else {
                    Method::Post
                },
                kind: key.kind,
                tenant: key.tenant.clone(),
                name: key.name.clone(),
                remote_id,
                body: Some(node.to_body()),
            };

            let obj = match self.execute(&op).await {
                Ok(obj) => obj,
                Err(error) => {
                    self.abort(root, graph, unreferenced, applied).await;
                    return Err(error);
                }
            };
            if op.method == Method::Post {
                outcome.created += 1;
                unreferenced.push(RemoteOp {
                    method: Method::Delete,
                    remote_id: Some(obj.uuid.clone()),
                    body: None,
                    ..op
                });
            } else {
                outcome.updated += 1;
                if key.kind.references_others() {
                    // The updated object may now reference anything created before it.
                    unreferenced.clear();
                }
            }
            applied.push((
                key,
                CacheEntry {
                    remote_id: obj.uuid,
                    checksum: node.checksum(),
                    key: node.key(),
                    root: root.clone(),
                    children: Vec::new(),
                },
            ));
        }
        record_children(graph, &mut applied);

        let live = applied.iter().map(|(k, _)| k).collect::<HashSet<_>>();
        let orphans = owned
            .iter()
            .filter(|(k, _)| !live.contains(k))
            .map(|(k, e)| (k.clone(), e.remote_id.clone()))
            .collect::<Vec<_>>();
        let removed = match self.delete_all(orphans).await {
            Ok(removed) => removed,
            Err(error) => {
                // Every node has been applied, so nothing created is left unreferenced. Orphans
                // stay cached and are deleted by the retry.
                self.abort(root, graph, unreferenced, applied).await;
                return Err(error);
            }
        };
        outcome.deleted = removed.len();

        self.ctx.cache.commit(root, applied, removed);
        tracing::debug!(%root, created = outcome.created, updated = outcome.updated, deleted = outcome.deleted, "Emitted");
        Ok(outcome)
    }

    async fn delete_root(&self, root: &ResourceId) -> Result<Outcome, EmitError> {
        let owned = self
            .ctx
            .cache
            .owned_by(root)
            .into_iter()
            .map(|(k, e)| (k, e.remote_id))
            .collect::<Vec<_>>();
        if owned.is_empty() {
            return Ok(Outcome::default());
        }

        let removed = self.delete_all(owned).await?;
        let outcome = Outcome {
            deleted: removed.len(),
            ..Outcome::default()
        };
        self.ctx.cache.commit(root, [], removed);
        tracing::info!(%root, deleted = outcome.deleted, "Deleted remote objects");
        Ok(outcome)
    }

    /// Deletes objects in reverse dependency order, returning their keys.
    ///
    /// Objects that no longer exist remotely count as deleted.
    async fn delete_all(
        &self,
        mut objects: Vec<(RemoteKey, String)>,
    ) -> Result<Vec<RemoteKey>, EmitError> {
        objects.sort_by(|(a, _), (b, _)| {
            b.kind
                .create_rank()
                .cmp(&a.kind.create_rank())
                .then_with(|| a.cmp(b))
        });

        let mut removed = Vec::with_capacity(objects.len());
        for (key, remote_id) in objects {
            let op = RemoteOp {
                method: Method::Delete,
                kind: key.kind,
                tenant: key.tenant.clone(),
                name: key.name.clone(),
                remote_id: Some(remote_id),
                body: None,
            };
            match self.execute(&op).await {
                Ok(_) => {}
                Err(EmitError {
                    source: RemoteError::NotFound,
                    ..
                }) => {
                    tracing::debug!(kind = %key.kind, tenant = %key.tenant, name = %key.name, "Already deleted");
                }
                Err(error) => return Err(error),
            }
            removed.push(key);
        }
        Ok(removed)
    }

    /// Unwinds a failed emission.
    ///
    /// Created objects that nothing live references are deleted, newest first. Objects that an
    /// updated object already references stay in place and are cached, so that the retry updates
    /// them instead of creating them again.
    async fn abort(
        &self,
        root: &ResourceId,
        graph: &ObjectGraph,
        unreferenced: Vec<RemoteOp>,
        mut applied: Vec<(RemoteKey, CacheEntry)>,
    ) {
        let updated_parent = applied.iter().any(|(key, _)| {
            key.kind.references_others() && !unreferenced.iter().any(|op| op.remote_key() == *key)
        });

        if !unreferenced.is_empty() {
            self.metrics.rolled_back();
            for op in unreferenced.iter().rev() {
                if let Err(error) = self.execute(op).await {
                    tracing::warn!(%root, %error, "Failed to roll back created object");
                }
            }
        }

        if updated_parent {
            applied.retain(|(key, _)| !unreferenced.iter().any(|op| op.remote_key() == *key));
            record_children(graph, &mut applied);
            self.ctx.cache.commit(root, applied, []);
        }
    }

    async fn execute(&self, op: &RemoteOp) -> Result<RemoteObject, EmitError> {
        let res = self.client.execute(op).await;
        self.metrics.record(op.method, op.kind, res.is_ok());
        res.map_err(|source| EmitError {
            method: op.method,
            kind: op.kind,
            tenant: op.tenant.clone(),
            name: op.name.clone(),
            source,
        })
    }
}

/// Gives the root's entry every child of the graph so that a rebuild can reuse their names.
fn record_children(graph: &ObjectGraph, applied: &mut [(RemoteKey, CacheEntry)]) {
    let children = graph
        .nodes()
        .iter()
        .filter(|n| n.kind() != NodeKind::VirtualService)
        .map(|n| ChildKey {
            kind: n.kind(),
            key: n.key(),
            name: n.name().to_string(),
        })
        .collect::<Vec<_>>();
    if let Some((_, entry)) = applied
        .iter_mut()
        .find(|(k, _)| k.kind == NodeKind::VirtualService)
    {
        entry.children = children;
    }
}
