//! Node trait and the context handed to each invocation.

use async_trait::async_trait;

use inkflow_types::Result;

use crate::events::{EventEmitter, PipelineEvent};
use crate::state::{Delta, PipelineState};

// ---------------------------------------------------------------------------
// NodeContext
// ---------------------------------------------------------------------------

/// Per-invocation context: which run and node this is, and where notes go.
#[derive(Debug, Clone)]
pub struct NodeContext {
    run_id: String,
    node: String,
    emitter: EventEmitter,
}

impl NodeContext {
    pub fn new(run_id: impl Into<String>, node: impl Into<String>, emitter: EventEmitter) -> Self {
        Self {
            run_id: run_id.into(),
            node: node.into(),
            emitter,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Emit a structured note. Notes never reach the state.
    pub fn note(&self, message: impl Into<String>, data: serde_json::Value) {
        self.emitter.emit(PipelineEvent::NodeNote {
            run_id: self.run_id.clone(),
            node: self.node.clone(),
            message: message.into(),
            data,
        });
    }
}

// ---------------------------------------------------------------------------
// Node trait
// ---------------------------------------------------------------------------

/// A processing stage: reads a snapshot, returns a partial update.
///
/// Expected failures (generation errors, unreachable sources, failed test
/// executions) belong in the returned delta. An `Err` ends the run.
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, state: &PipelineState, ctx: &NodeContext) -> Result<Delta>;
}

// ---------------------------------------------------------------------------
// FnNode: synchronous closures as nodes
// ---------------------------------------------------------------------------

/// Wraps a pure function of the state. Used for validation gates and
/// terminal bookkeeping nodes that make no external calls.
pub struct FnNode<F> {
    f: F,
}

impl<F> FnNode<F>
where
    F: Fn(&PipelineState) -> Result<Delta> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Node for FnNode<F>
where
    F: Fn(&PipelineState) -> Result<Delta> + Send + Sync,
{
    async fn run(&self, state: &PipelineState, _ctx: &NodeContext) -> Result<Delta> {
        (self.f)(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateSchema;
    use serde_json::json;

    #[tokio::test]
    async fn fn_node_runs_closure() {
        let state = StateSchema::new()
            .overwrite("n")
            .init(json!({"n": 2}))
            .unwrap();
        let node = FnNode::new(|s: &PipelineState| {
            let n = s.get_u64("n").unwrap_or(0);
            Ok(Delta::new().with("n", n * 10))
        });
        let ctx = NodeContext::new("r1", "double", EventEmitter::default());
        let delta = node.run(&state, &ctx).await.unwrap();
        assert_eq!(delta.get("n"), Some(&json!(20)));
    }

    #[tokio::test]
    async fn note_is_emitted_as_event() {
        let emitter = EventEmitter::new(8);
        let mut rx = emitter.subscribe();
        let ctx = NodeContext::new("r1", "find_source", emitter);
        ctx.note("excluded entity", json!({"entity": "Acme"}));

        match rx.recv().await.unwrap() {
            PipelineEvent::NodeNote {
                node, message, data, ..
            } => {
                assert_eq!(node, "find_source");
                assert_eq!(message, "excluded entity");
                assert_eq!(data["entity"], "Acme");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
