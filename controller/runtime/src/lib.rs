//! Wires the configuration watches, the staged work queues and the emitter into a controller.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use meshlb_core as core;
pub use meshlb_emit as emit;
pub use meshlb_graph as graph;
pub use meshlb_k8s_api as k8s;
pub use meshlb_k8s_index as index;

mod args;
mod metrics;
mod pipeline;
mod queue;


pub use self::{
    args::Args,
    metrics::QueueMetrics,
    pipeline::{Pipeline, PipelineConfig},
    queue::{Backoff, ShardedQueue, WorkQueue},
};
