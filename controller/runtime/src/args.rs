use crate::{
    metrics::QueueMetrics,
    pipeline::{Pipeline, PipelineConfig},
    queue::Backoff,
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use meshlb_core::Kind;
use meshlb_emit::{DryRun, EmitMetrics};
use meshlb_graph::{BuildSettings, ReconciliationContext, TenantMode};
use meshlb_k8s_api::{
    self as k8s,
    networking::{DestinationRule, Gateway, VirtualService},
    Client, Resource,
};
use meshlb_k8s_index::{ConfigStore, Feed, IndexMetrics, RelationshipIndex};
use prometheus_client::registry::Registry;
use std::{num::NonZeroUsize, sync::Arc};
use tokio::time::Duration;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "meshlb",
    about = "Translates mesh gateway configuration into load-balancer objects"
)]
pub struct Args {
    #[clap(long, default_value = "meshlb=info,warn", env = "MESHLB_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Prefixes the names of all remote objects.
    #[clap(long, default_value = "cluster")]
    cluster_name: String,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,

    /// The remote tenant that owns all objects, unless tenants follow namespaces.
    #[clap(long, default_value = meshlb_graph::DEFAULT_TENANT)]
    tenant: String,

    /// Places each gateway's objects in a tenant named after its namespace.
    #[clap(long)]
    tenant_per_namespace: bool,

    #[clap(long, default_value = "4")]
    ingestion_shards: NonZeroUsize,

    #[clap(long, default_value = "4")]
    graph_shards: NonZeroUsize,

    #[clap(long, default_value = "2")]
    emission_shards: NonZeroUsize,

    #[clap(long, default_value = "100")]
    backoff_base_ms: u64,

    #[clap(long, default_value = "30000")]
    backoff_max_ms: u64,

    /// Watches the mesh resources. When disabled, or when their CRDs are not installed, no
    /// gateways are built.
    #[clap(long, default_value = "true", action = clap::ArgAction::Set)]
    watch_mesh_crds: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            cluster_name,
            cluster_domain,
            tenant,
            tenant_per_namespace,
            ingestion_shards,
            graph_shards,
            emission_shards,
            backoff_base_ms,
            backoff_max_ms,
            watch_mesh_crds,
        } = self;

        if backoff_base_ms == 0 || backoff_max_ms < backoff_base_ms {
            bail!("--backoff-max-ms must be at least --backoff-base-ms, which must not be zero");
        }
        let config = PipelineConfig {
            ingestion_shards,
            graph_shards,
            emission_shards,
            backoff: Backoff {
                base: Duration::from_millis(backoff_base_ms),
                max: Duration::from_millis(backoff_max_ms),
            },
        };
        let settings = BuildSettings {
            cluster_name,
            tenant: if tenant_per_namespace {
                TenantMode::PerNamespace
            } else {
                TenantMode::Fixed(tenant)
            },
        };

        let mut prom = <Registry>::default();
        let index_metrics = IndexMetrics::register(prom.sub_registry_with_prefix("config_index"));
        let queue_metrics = QueueMetrics::register(prom.sub_registry_with_prefix("work_queue"));
        let emit_metrics = EmitMetrics::register(prom.sub_registry_with_prefix("emit"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let store = ConfigStore::shared(Arc::new(RelationshipIndex::new(cluster_domain)));
        let ctx = ReconciliationContext::new(store.clone(), settings);
        let pipeline = Arc::new(Pipeline::new(
            ctx,
            DryRun::default(),
            &config,
            &queue_metrics,
            emit_metrics,
        ));

        // Every watch feeds the same store and ingestion queue.
        let feed = index_metrics
            .wrap(Feed::new(store.clone(), pipeline.ingestion().clone()).shared())
            .shared();

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(feed.clone(), services).instrument(info_span!("services")),
        );

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(feed.clone(), endpoints)
                .instrument(info_span!("endpoints")),
        );

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(kubert::index::namespaced(feed.clone(), pods).instrument(info_span!("pods")));

        let secrets = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(feed.clone(), secrets).instrument(info_span!("secrets")),
        );

        let client = runtime.client();
        if watch_mesh_crds && api_resource_exists::<Gateway>(&client).await {
            let gateways = runtime.watch_all::<Gateway>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(feed.clone(), gateways)
                    .instrument(info_span!("gateways.networking.istio.io")),
            );
        } else {
            tracing::warn!("gateways.networking.istio.io not watched; no graphs will be built");
            store.mark_synced(Kind::Gateway);
        }

        if watch_mesh_crds && api_resource_exists::<VirtualService>(&client).await {
            let virtual_services = runtime.watch_all::<VirtualService>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(feed.clone(), virtual_services)
                    .instrument(info_span!("virtualservices.networking.istio.io")),
            );
        } else {
            tracing::warn!("virtualservices.networking.istio.io not watched");
            store.mark_synced(Kind::VirtualService);
        }

        if watch_mesh_crds && api_resource_exists::<DestinationRule>(&client).await {
            let destination_rules =
                runtime.watch_all::<DestinationRule>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(feed, destination_rules)
                    .instrument(info_span!("destinationrules.networking.istio.io")),
            );
        } else {
            tracing::warn!("destinationrules.networking.istio.io not watched");
            store.mark_synced(Kind::DestinationRule);
        }

        tokio::spawn(
            pipeline
                .run(runtime.shutdown_handle())
                .instrument(info_span!("pipeline")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background
        // tasks to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
