use crate::metrics::{QueueMetrics, ShardMetrics};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use meshlb_core::ObjectKey;
use meshlb_k8s_index::Enqueue;
use parking_lot::Mutex;
use std::{collections::VecDeque, num::NonZeroUsize, sync::Arc};
use tokio::{sync::Notify, time::Duration};

/// A FIFO of keys that never hands the same key to two workers at once.
///
/// A key added while it is pending is coalesced; a key added while it is being processed is held
/// back until [`WorkQueue::done`] is called for it.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
    backoff: Backoff,
    metrics: ShardMetrics,
}

/// Exponential per-key retry delays.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

/// Routes keys to one of several work queues by partition.
///
/// Every key of a partition lands on the same shard, so a partition is only ever processed by one
/// worker at a time.
#[derive(Debug)]
pub struct ShardedQueue {
    stage: &'static str,
    shards: Vec<Arc<WorkQueue>>,
    hasher: ahash::RandomState,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

// Fixed so that the shard of a partition is stable across restarts.
const SHARD_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

// === impl WorkQueue ===

impl WorkQueue {
    pub fn new(backoff: Backoff, metrics: ShardMetrics) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            backoff,
            metrics,
        }
    }

    pub fn add(&self, item: String) {
        let mut state = self.state.lock();
        if state.shutting_down || !state.dirty.insert(item.clone()) {
            return;
        }
        self.metrics.adds.inc();
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        self.metrics.depth.set(state.queue.len() as i64);
        drop(state);
        self.notify.notify_one();
    }

    /// Waits for the next item. Returns `None` once the queue has been shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    self.metrics.depth.set(state.queue.len() as i64);
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Marks an item as processed, releasing it if it was added again in the meantime.
    pub fn done(&self, item: &str) {
        let mut state = self.state.lock();
        state.processing.remove(item);
        self.metrics.processed.inc();
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.to_string());
            self.metrics.depth.set(state.queue.len() as i64);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Adds an item after its backoff delay, which doubles with each consecutive retry.
    pub fn add_rate_limited(self: &Arc<Self>, item: String) {
        let delay = {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            let failures = state.failures.entry(item.clone()).or_default();
            let delay = self.backoff.delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.metrics.retries.inc();

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Resets an item's backoff.
    pub fn forget(&self, item: &str) {
        self.state.lock().failures.remove(item);
    }

    pub fn num_requeues(&self, item: &str) -> u32 {
        self.state.lock().failures.get(item).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops handing out items. Workers finish their in-flight item and then observe `None`.
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub(crate) fn record_failure(&self) {
        self.metrics.failures.inc();
    }
}

// === impl Backoff ===

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
        }
    }
}

// === impl ShardedQueue ===

impl ShardedQueue {
    pub fn new(
        stage: &'static str,
        shards: NonZeroUsize,
        backoff: Backoff,
        metrics: &QueueMetrics,
    ) -> Self {
        let shards = (0..shards.get())
            .map(|shard| Arc::new(WorkQueue::new(backoff, metrics.shard(stage, shard))))
            .collect();
        let [k0, k1, k2, k3] = SHARD_SEEDS;
        Self {
            stage,
            shards,
            hasher: ahash::RandomState::with_seeds(k0, k1, k2, k3),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn shard_of(&self, partition: &str) -> usize {
        (self.hasher.hash_one(partition) % self.shards.len() as u64) as usize
    }

    pub fn add(&self, partition: &str, key: String) {
        let shard = self.shard_of(partition);
        tracing::trace!(stage = self.stage, shard, %key, "Enqueued");
        self.shards[shard].add(key);
    }

    pub fn shards(&self) -> &[Arc<WorkQueue>] {
        &self.shards
    }

    pub fn shut_down(&self) {
        for shard in &self.shards {
            shard.shut_down();
        }
    }
}

/// Changed configuration keys are partitioned by namespace.
impl Enqueue for ShardedQueue {
    fn enqueue(&self, key: ObjectKey) {
        self.add(key.namespace(), key.to_string());
    }
}
