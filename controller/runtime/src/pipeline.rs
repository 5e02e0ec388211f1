use crate::{
    metrics::QueueMetrics,
    queue::{Backoff, ShardedQueue, WorkQueue},
};
use anyhow::{bail, Result};
use meshlb_core::{Kind, ObjectKey};
use meshlb_emit::{EmitError, EmitMetrics, Emitter, RemoteClient};
use meshlb_graph::{BuildError, ReconciliationContext};
use meshlb_k8s_index::{TraceError, TraceResult};
use std::{num::NonZeroUsize, sync::Arc};
use tracing::{info_span, Instrument};

/// Shard counts and retry delays of the three stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub ingestion_shards: NonZeroUsize,
    pub graph_shards: NonZeroUsize,
    pub emission_shards: NonZeroUsize,
    pub backoff: Backoff,
}

/// Moves changed configuration keys through tracing, graph building and emission.
///
/// ```text
/// config key --> [ingestion] --trace--> root key --> [graph] --build/publish--> [emission]
/// ```
///
/// Ingestion is partitioned by namespace; graph building and emission are partitioned by root,
/// so a root is never built or emitted by two workers at once.
#[derive(Debug)]
pub struct Pipeline<C> {
    ctx: ReconciliationContext,
    ingestion: Arc<ShardedQueue>,
    graph: Arc<ShardedQueue>,
    emission: Arc<ShardedQueue>,
    emitter: Emitter<C>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Stage {
    Ingestion,
    Graph,
    Emission,
}

// === impl PipelineConfig ===

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ingestion_shards: NonZeroUsize::MIN.saturating_add(3),
            graph_shards: NonZeroUsize::MIN.saturating_add(3),
            emission_shards: NonZeroUsize::MIN.saturating_add(1),
            backoff: Backoff::default(),
        }
    }
}

// === impl Pipeline ===

impl<C> Pipeline<C>
where
    C: RemoteClient + 'static,
{
    pub fn new(
        ctx: ReconciliationContext,
        client: C,
        config: &PipelineConfig,
        queue_metrics: &QueueMetrics,
        emit_metrics: EmitMetrics,
    ) -> Self {
        let queue = |stage, shards| {
            Arc::new(ShardedQueue::new(
                stage,
                shards,
                config.backoff,
                queue_metrics,
            ))
        };
        Self {
            ingestion: queue("ingestion", config.ingestion_shards),
            graph: queue("graph", config.graph_shards),
            emission: queue("emission", config.emission_shards),
            emitter: Emitter::new(ctx.clone(), client, emit_metrics),
            ctx,
        }
    }

    pub fn context(&self) -> &ReconciliationContext {
        &self.ctx
    }

    /// The queue that watches feed changed keys into.
    pub fn ingestion(&self) -> &Arc<ShardedQueue> {
        &self.ingestion
    }

    pub fn graph(&self) -> &Arc<ShardedQueue> {
        &self.graph
    }

    pub fn emission(&self) -> &Arc<ShardedQueue> {
        &self.emission
    }

    /// Traces a changed configuration key to the roots it affects and enqueues them for building.
    pub fn process_ingestion_key(&self, key: &str) -> Result<()> {
        let key = key.parse::<ObjectKey>()?;
        let TraceResult {
            roots,
            root_deleted,
        } = meshlb_k8s_index::trace(&self.ctx.store, &key)?;
        if root_deleted {
            tracing::debug!(%key, "Root deleted; withdrawing its graph");
        }
        for root in roots {
            let partition = root.to_string();
            self.graph
                .add(&partition, ObjectKey::gateway(root).to_string());
        }
        Ok(())
    }

    /// Rebuilds a root's graph and enqueues it for emission if it changed.
    pub fn process_graph_key(&self, key: &str) -> Result<()> {
        let key = key.parse::<ObjectKey>()?;
        if !key.kind.is_root() {
            bail!("{key} does not identify a root");
        }
        let root = &key.id;

        // A deleted gateway needs no build, so its withdrawal does not wait on other kinds to sync.
        let store = &self.ctx.store;
        let deleted = store.is_synced(Kind::Gateway)
            && store.get(Kind::Gateway, &root.namespace, &root.name).is_none();
        let graph = if deleted {
            tracing::debug!(%root, "Gateway deleted");
            None
        } else {
            meshlb_graph::build(&self.ctx, root)?
        };

        let changed = match graph {
            Some(graph) => {
                let checksum = graph.checksum();
                let published = self.ctx.models.publish(graph);
                if published {
                    tracing::debug!(%root, %checksum, "Published graph");
                } else {
                    tracing::trace!(%root, %checksum, "Graph unchanged");
                }
                published
            }
            // Remote objects may remain from an emission that has not completed yet.
            None => self.ctx.models.withdraw(root) || !self.ctx.cache.owned_by(root).is_empty(),
        };
        if changed {
            self.emission.add(&root.to_string(), key.to_string());
        }
        Ok(())
    }

    /// Applies a root's published graph to the remote controller.
    pub async fn process_emission_key(&self, key: &str) -> Result<()> {
        let key = key.parse::<ObjectKey>()?;
        let outcome = self.emitter.emit(&key.id).await?;
        tracing::debug!(%key, ?outcome, "Emitted");
        Ok(())
    }

    /// Runs a worker per shard of each stage until the drain is signaled.
    ///
    /// Workers finish their in-flight key before exiting.
    pub async fn run(self: Arc<Self>, drain: drain::Watch) {
        let mut workers = Vec::new();
        for (stage, queue) in [
            (Stage::Ingestion, &self.ingestion),
            (Stage::Graph, &self.graph),
            (Stage::Emission, &self.emission),
        ] {
            for (shard, work) in queue.shards().iter().enumerate() {
                let worker = self
                    .clone()
                    .work(stage, work.clone())
                    .instrument(info_span!("worker", stage = queue.stage(), shard));
                workers.push(tokio::spawn(worker));
            }
        }
        tracing::info!(workers = workers.len(), "Pipeline started");

        let release = drain.signaled().await;
        tracing::debug!("Shutting down pipeline");
        self.shut_down();
        release
            .release_after(async move {
                for worker in workers {
                    if let Err(error) = worker.await {
                        tracing::error!(%error, "Worker failed");
                    }
                }
            })
            .await;
    }

    pub fn shut_down(&self) {
        self.ingestion.shut_down();
        self.graph.shut_down();
        self.emission.shut_down();
    }

    async fn work(self: Arc<Self>, stage: Stage, queue: Arc<WorkQueue>) {
        while let Some(key) = queue.get().await {
            let res = match stage {
                Stage::Ingestion => self.process_ingestion_key(&key),
                Stage::Graph => self.process_graph_key(&key),
                Stage::Emission => self.process_emission_key(&key).await,
            };
            match res {
                Ok(()) => queue.forget(&key),
                Err(error) if is_retryable(&error) => {
                    queue.record_failure();
                    tracing::info!(%key, %error, retries = queue.num_requeues(&key), "Retrying");
                    queue.add_rate_limited(key.clone());
                }
                Err(error) => {
                    queue.record_failure();
                    tracing::warn!(%key, %error, "Dropping key");
                    queue.forget(&key);
                }
            }
            queue.done(&key);
        }
    }
}

/// Unsynced state resolves on its own and remote failures may be temporary; anything else would
/// fail the same way again.
fn is_retryable(error: &anyhow::Error) -> bool {
    if let Some(e) = error.downcast_ref::<TraceError>() {
        return e.is_transient();
    }
    if let Some(e) = error.downcast_ref::<BuildError>() {
        return e.is_transient();
    }
    error.is::<EmitError>()
}
