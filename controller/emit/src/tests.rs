use crate::{
    DryRun, EmitMetrics, Emitter, Method, Outcome, RemoteClient, RemoteError, RemoteObject,
    RemoteOp,
};
use meshlb_core::{
    model::{
        LbAlgorithm, Listener, ListenerProtocol, MatchRule, Node, ParentRef, PoolGroupMember,
        PoolGroupSpec, PoolSpec, ServerAddr, SniChildSpec, VirtualServiceSpec,
    },
    Checksum, ModelNode, NodeKind, ObjectGraph, ResourceId,
};
use meshlb_graph::{BuildSettings, ReconciliationContext};
use meshlb_k8s_index::{ConfigStore, RelationshipIndex};
use parking_lot::Mutex;
use prometheus_client::registry::Registry;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Records operations, optionally failing every operation on one kind with one method.
#[derive(Debug, Default)]
struct Recording {
    ops: Mutex<Vec<RemoteOp>>,
    next: AtomicUsize,
    fail: Mutex<Option<(Method, NodeKind)>>,
}

#[async_trait::async_trait]
impl RemoteClient for Recording {
    async fn execute(&self, op: &RemoteOp) -> Result<RemoteObject, RemoteError> {
        self.ops.lock().push(op.clone());
        if *self.fail.lock() == Some((op.method, op.kind)) {
            return Err(RemoteError::Unavailable("connection refused".into()));
        }
        let uuid = match &op.remote_id {
            Some(id) => id.clone(),
            None => format!("{}-{}", op.kind, self.next.fetch_add(1, Ordering::Relaxed)),
        };
        Ok(RemoteObject { uuid })
    }
}

impl Recording {
    fn take(&self) -> Vec<(Method, NodeKind)> {
        std::mem::take(&mut *self.ops.lock())
            .into_iter()
            .map(|op| (op.method, op.kind))
            .collect()
    }
}

fn root() -> ResourceId {
    ResourceId::new("ns-0", "gw-1")
}

fn mk_ctx() -> ReconciliationContext {
    let store = ConfigStore::shared(Arc::new(RelationshipIndex::default()));
    ReconciliationContext::new(store, BuildSettings::default())
}

fn pool() -> ModelNode {
    ModelNode::Pool(Node::new(
        "root--ns-0-svc-1-80",
        "admin",
        Checksum::of("pool"),
        PoolSpec {
            service: ResourceId::new("ns-0", "svc-1"),
            port: 80,
            subset: None,
            lb_algorithm: LbAlgorithm::RoundRobin,
            servers: vec![ServerAddr {
                ip: "10.0.0.1".parse().unwrap(),
                port: 8080,
            }],
        },
    ))
}

fn pool_group() -> ModelNode {
    pool_group_named("root-pg", "pg")
}

fn pool_group_named(name: &str, key: &str) -> ModelNode {
    ModelNode::PoolGroup(Node::new(
        name,
        "admin",
        Checksum::of(key),
        PoolGroupSpec {
            match_rule: MatchRule {
                hosts: vec!["foo.example.com".into()],
                matches: vec![],
            },
            members: vec![PoolGroupMember {
                pool: "root--ns-0-svc-1-80".into(),
                weight: 100,
            }],
        },
    ))
}

fn root_vs(pool_groups: &[&str]) -> ModelNode {
    ModelNode::VirtualService(Node::new(
        "root",
        "admin",
        Checksum::of(&root()),
        VirtualServiceSpec {
            listeners: vec![Listener {
                port: 80,
                protocol: ListenerProtocol::Http,
                tls: false,
            }],
            pool_groups: pool_groups.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        },
    ))
}

fn full_graph() -> ObjectGraph {
    // Listed out of order; emission sorts by dependency.
    ObjectGraph::new(root(), vec![root_vs(&["root-pg"]), pool_group(), pool()])
}

#[tokio::test(flavor = "current_thread")]
async fn creates_in_dependency_order() {
    let ctx = mk_ctx();
    let client = Arc::new(Recording::default());
    let emitter = Emitter::new(ctx.clone(), client.clone(), EmitMetrics::default());

    ctx.models.publish(full_graph());
    let outcome = emitter.emit(&root()).await.expect("emission must succeed");
    assert_eq!(
        outcome,
        Outcome {
            created: 3,
            updated: 0,
            deleted: 0
        }
    );
    assert_eq!(
        client.take(),
        vec![
            (Method::Post, NodeKind::Pool),
            (Method::Post, NodeKind::PoolGroup),
            (Method::Post, NodeKind::VirtualService),
        ]
    );

    assert_eq!(ctx.cache.len(), 3);
    let children = ctx.cache.child_keys(&root());
    assert_eq!(children.len(), 2);
    assert!(children
        .iter()
        .any(|c| c.kind == NodeKind::Pool && c.name == "root--ns-0-svc-1-80"));

    // A second pass updates everything in place.
    emitter.emit(&root()).await.expect("emission must succeed");
    let ops = std::mem::take(&mut *client.ops.lock());
    assert!(ops.iter().all(|op| op.method == Method::Put));
    assert_eq!(ops[0].remote_id.as_deref(), Some("pool-0"));
    assert_eq!(ops[0].path(), "/api/pool/pool-0");
}

#[tokio::test(flavor = "current_thread")]
async fn orphans_are_deleted_in_reverse_order() {
    let ctx = mk_ctx();
    let client = Arc::new(Recording::default());
    let emitter = Emitter::new(ctx.clone(), client.clone(), EmitMetrics::default());
    ctx.models.publish(full_graph());
    emitter.emit(&root()).await.unwrap();
    client.take();

    ctx.models
        .publish(ObjectGraph::new(root(), vec![root_vs(&[])]));
    let outcome = emitter.emit(&root()).await.unwrap();
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.deleted, 2);
    assert_eq!(
        client.take(),
        vec![
            (Method::Put, NodeKind::VirtualService),
            (Method::Delete, NodeKind::PoolGroup),
            (Method::Delete, NodeKind::Pool),
        ]
    );
    assert_eq!(ctx.cache.len(), 1);
    assert!(ctx.cache.child_keys(&root()).is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn failures_roll_back_created_objects() {
    let ctx = mk_ctx();
    let client = Arc::new(Recording::default());
    let mut prom = Registry::default();
    let metrics = EmitMetrics::register(&mut prom);
    let emitter = Emitter::new(ctx.clone(), client.clone(), metrics);

    *client.fail.lock() = Some((Method::Post, NodeKind::VirtualService));
    ctx.models.publish(full_graph());
    let error = emitter.emit(&root()).await.expect_err("emission must fail");
    assert_eq!(error.method, Method::Post);
    assert_eq!(error.kind, NodeKind::VirtualService);
    assert!(matches!(error.source, RemoteError::Unavailable(_)));

    assert_eq!(
        client.take(),
        vec![
            (Method::Post, NodeKind::Pool),
            (Method::Post, NodeKind::PoolGroup),
            (Method::Post, NodeKind::VirtualService),
            (Method::Delete, NodeKind::PoolGroup),
            (Method::Delete, NodeKind::Pool),
        ]
    );
    assert!(ctx.cache.is_empty(), "failed emissions leave the cache untouched");

    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).unwrap();
    assert!(text.contains("outcome=\"failure\""), "{text}");
    assert!(text.contains("rollbacks_total 1"), "{text}");

    // Once the remote recovers, a retry creates everything again.
    *client.fail.lock() = None;
    emitter.emit(&root()).await.expect("retry must succeed");
    assert_eq!(ctx.cache.len(), 3);
}

#[tokio::test(flavor = "current_thread")]
async fn objects_referenced_by_updates_survive_failures() {
    let ctx = mk_ctx();
    let client = Arc::new(Recording::default());
    let emitter = Emitter::new(ctx.clone(), client.clone(), EmitMetrics::default());
    ctx.models.publish(full_graph());
    emitter.emit(&root()).await.unwrap();
    client.take();

    // The route changes, so the virtual service moves to a new pool group. Deleting the old one
    // fails after the virtual service already references the new one.
    *client.fail.lock() = Some((Method::Delete, NodeKind::PoolGroup));
    ctx.models.publish(ObjectGraph::new(
        root(),
        vec![
            root_vs(&["root-pg-2"]),
            pool_group_named("root-pg-2", "pg-2"),
            pool(),
        ],
    ));
    let error = emitter.emit(&root()).await.expect_err("emission must fail");
    assert_eq!(error.method, Method::Delete);
    assert_eq!(
        client.take(),
        vec![
            (Method::Put, NodeKind::Pool),
            (Method::Post, NodeKind::PoolGroup),
            (Method::Put, NodeKind::VirtualService),
            (Method::Delete, NodeKind::PoolGroup),
        ],
        "the new pool group must not be rolled back"
    );
    let names = ctx
        .cache
        .owned_by(&root())
        .into_iter()
        .map(|(k, _)| k.name)
        .collect::<Vec<_>>();
    assert!(names.contains(&"root-pg".to_string()), "{names:?}");
    assert!(names.contains(&"root-pg-2".to_string()), "{names:?}");

    // The retry updates the new pool group in place and deletes the old one.
    *client.fail.lock() = None;
    let outcome = emitter.emit(&root()).await.expect("retry must succeed");
    assert_eq!(outcome.created, 0);
    assert_eq!(outcome.deleted, 1);
    let ops = std::mem::take(&mut *client.ops.lock());
    assert_eq!(ops.last().map(|op| op.name.as_str()), Some("root-pg"));
    assert_eq!(ctx.cache.len(), 3);
}

#[tokio::test(flavor = "current_thread")]
async fn later_failures_keep_objects_an_update_references() {
    let ctx = mk_ctx();
    let client = Arc::new(Recording::default());
    let emitter = Emitter::new(ctx.clone(), client.clone(), EmitMetrics::default());
    ctx.models.publish(ObjectGraph::new(root(), vec![root_vs(&[])]));
    emitter.emit(&root()).await.unwrap();
    client.take();

    // The pool and pool group are created and the virtual service is updated to use them; the
    // SNI child after it fails.
    *client.fail.lock() = Some((Method::Post, NodeKind::SniChild));
    let mut nodes = full_graph().nodes().to_vec();
    nodes.push(ModelNode::SniChild(Node::new(
        "root-sni",
        "admin",
        Checksum::of("sni"),
        SniChildSpec {
            parent: ParentRef {
                tenant: "admin".into(),
                name: "root".into(),
            },
            hosts: vec!["foo.example.com".into()],
            ssl_key_cert: "root-cert".into(),
            pool_groups: vec!["root-pg".into()],
            http_policy_sets: vec![],
        },
    )));
    ctx.models.publish(ObjectGraph::new(root(), nodes));
    emitter.emit(&root()).await.expect_err("emission must fail");
    assert_eq!(
        client.take(),
        vec![
            (Method::Post, NodeKind::Pool),
            (Method::Post, NodeKind::PoolGroup),
            (Method::Put, NodeKind::VirtualService),
            (Method::Post, NodeKind::SniChild),
        ]
    );
    assert_eq!(ctx.cache.len(), 3);
}

#[tokio::test(flavor = "current_thread")]
async fn withdrawn_roots_are_deleted() {
    let ctx = mk_ctx();
    let client = Arc::new(Recording::default());
    let emitter = Emitter::new(ctx.clone(), client.clone(), EmitMetrics::default());
    ctx.models.publish(full_graph());
    emitter.emit(&root()).await.unwrap();
    client.take();

    assert!(ctx.models.withdraw(&root()));
    let outcome = emitter.emit(&root()).await.unwrap();
    assert_eq!(outcome.deleted, 3);
    assert_eq!(
        client.take(),
        vec![
            (Method::Delete, NodeKind::VirtualService),
            (Method::Delete, NodeKind::PoolGroup),
            (Method::Delete, NodeKind::Pool),
        ]
    );
    assert!(ctx.cache.is_empty());

    // Nothing left to delete.
    assert_eq!(emitter.emit(&root()).await.unwrap(), Outcome::default());
    assert!(client.take().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn dry_run_mints_stable_ids() {
    let ctx = mk_ctx();
    let emitter = Emitter::new(ctx.clone(), DryRun::default(), EmitMetrics::default());
    ctx.models.publish(full_graph());
    emitter.emit(&root()).await.unwrap();

    let before = ctx.cache.owned_by(&root());
    assert_eq!(before.len(), 3);
    assert!(before
        .iter()
        .all(|(k, e)| e.remote_id.starts_with(k.kind.as_str())));

    emitter.emit(&root()).await.unwrap();
    let after = ctx.cache.owned_by(&root());
    assert_eq!(
        before.iter().map(|(_, e)| &e.remote_id).collect::<Vec<_>>(),
        after.iter().map(|(_, e)| &e.remote_id).collect::<Vec<_>>(),
    );
}
