//! State model, graph definition, executor, and content pipelines.
//!
//! A pipeline is a [`Graph`] of [`Node`]s over a [`PipelineState`] whose
//! fields each carry a [`Reducer`]. The [`PipelineExecutor`] runs one node
//! at a time, merges its [`Delta`], and asks the graph for the next node
//! until a router returns `END`.

pub mod batch;
pub mod config;
pub mod engine;
pub mod events;
pub mod gate;
pub mod graph;
pub mod node;
pub mod pipelines;
pub mod sink;
pub mod state;

pub use batch::{run_batch, BatchOutcome};
pub use config::{CertificationChannel, ChannelMap, ChannelMapStore, PipelineSettings, TtlCache};
pub use engine::{
    Execution, ExecutionStep, ExecutorConfig, PipelineExecutor, PipelineRun, REASON_FIELD,
    STATUS_FIELD,
};
pub use events::{EventEmitter, PipelineEvent};
pub use gate::{route_on_gate, AttemptDecision, AttemptPolicy, GateStatus};
pub use graph::{Graph, GraphBuilder, Route, Router, END, START};
pub use node::{FnNode, Node, NodeContext};
pub use pipelines::{PipelineKind, Services};
pub use sink::{slugify, unique_id, ContentSink, JsonFileSink};
pub use state::{Delta, PipelineState, Reducer, StateSchema};
