//! Pipeline executor: the single-threaded traversal loop.
//!
//! One node is in flight at a time. After each node the delta is merged and
//! the next node is chosen from the just-merged state. Every step is handed
//! to the caller as it is produced: pull-based through [`Execution`], pushed
//! through [`PipelineExecutor::stream`], or collected by
//! [`PipelineExecutor::run`].

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use inkflow_types::{FlowError, Result, RunStatus};

use crate::events::{EventEmitter, PipelineEvent};
use crate::graph::{Graph, Route};
use crate::node::NodeContext;
use crate::state::{Delta, PipelineState};

/// Conventional field carrying the run outcome.
pub const STATUS_FIELD: &str = "status";
/// Conventional field explaining a skipped or failed run.
pub const REASON_FIELD: &str = "reason";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Node invocations allowed per run before it is aborted.
    pub max_steps: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_steps: 200 }
    }
}

/// One node invocation's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStep {
    /// 0-based position in the run.
    pub index: usize,
    pub node: String,
    pub delta: Delta,
}

/// A finished run: every step in order plus the final merged state.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub graph: String,
    pub steps: Vec<ExecutionStep>,
    pub state: PipelineState,
    pub duration_ms: u64,
}

impl PipelineRun {
    /// Outcome recorded in the `status` field; `Pending` when absent.
    pub fn status(&self) -> RunStatus {
        self.state
            .get_as::<RunStatus>(STATUS_FIELD)
            .ok()
            .flatten()
            .unwrap_or(RunStatus::Pending)
    }

    pub fn reason(&self) -> Option<&str> {
        self.state.get_str(REASON_FIELD)
    }

    /// Node names in visiting order.
    pub fn visited(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.node.as_str()).collect()
    }

    /// How many times `node` ran.
    pub fn visits(&self, node: &str) -> usize {
        self.steps.iter().filter(|s| s.node == node).count()
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

/// Drives runs over one graph. Cheap to share: runs never share state.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    graph: Arc<Graph>,
    config: ExecutorConfig,
    emitter: EventEmitter,
}

impl PipelineExecutor {
    pub fn new(graph: Graph) -> Self {
        Self {
            graph: Arc::new(graph),
            config: ExecutorConfig::default(),
            emitter: EventEmitter::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = emitter;
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Build an initial state against this graph's schema.
    pub fn initial_state(&self, initial: serde_json::Value) -> Result<PipelineState> {
        self.graph.schema().init(initial)
    }

    /// Begin a run and step it manually with [`Execution::next_step`].
    pub fn start(&self, initial: PipelineState) -> Result<Execution> {
        self.graph.schema().check(&initial)?;
        let run_id = uuid::Uuid::new_v4().to_string();

        tracing::info!(run_id = %run_id, graph = %self.graph.name(), "Run started");
        self.emitter.emit(PipelineEvent::RunStarted {
            run_id: run_id.clone(),
            graph: self.graph.name().to_string(),
            node_count: self.graph.node_names().len(),
        });

        Ok(Execution {
            graph: self.graph.clone(),
            config: self.config.clone(),
            emitter: self.emitter.clone(),
            run_id,
            state: initial,
            next: Some(self.graph.entry().to_string()),
            steps_taken: 0,
            started: Instant::now(),
            finished: false,
        })
    }

    /// Run to END and return every step plus the final state.
    pub async fn run(&self, initial: PipelineState) -> Result<PipelineRun> {
        let mut execution = self.start(initial)?;
        let mut steps = Vec::new();
        while let Some(step) = execution.next_step().await {
            steps.push(step?);
        }
        Ok(PipelineRun {
            run_id: execution.run_id.clone(),
            graph: self.graph.name().to_string(),
            steps,
            duration_ms: execution.started.elapsed().as_millis() as u64,
            state: execution.state,
        })
    }

    /// Run on a spawned task, yielding each step as it is produced.
    ///
    /// The stream ends after the last step, or right after the first error.
    pub fn stream(
        &self,
        initial: PipelineState,
    ) -> impl futures_core::Stream<Item = Result<ExecutionStep>> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let started = self.start(initial);
        tokio::spawn(async move {
            let mut execution = match started {
                Ok(execution) => execution,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            while let Some(step) = execution.next_step().await {
                let failed = step.is_err();
                if tx.send(step).await.is_err() || failed {
                    break;
                }
            }
        });
        tokio_stream::wrappers::ReceiverStream::new(rx)
    }
}

// ---------------------------------------------------------------------------
// Execution: one in-progress run
// ---------------------------------------------------------------------------

/// A run in progress. Owns its state; nothing is shared with other runs.
pub struct Execution {
    graph: Arc<Graph>,
    config: ExecutorConfig,
    emitter: EventEmitter,
    run_id: String,
    state: PipelineState,
    next: Option<String>,
    steps_taken: usize,
    started: Instant,
    finished: bool,
}

impl Execution {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// State after the most recent step.
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn into_state(self) -> PipelineState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn fail(&mut self, node: Option<&str>, error: FlowError) -> Option<Result<ExecutionStep>> {
        self.finished = true;
        self.next = None;
        tracing::error!(
            run_id = %self.run_id,
            graph = %self.graph.name(),
            node = node.unwrap_or("-"),
            error = %error,
            "Run failed"
        );
        self.emitter.emit(PipelineEvent::RunFailed {
            run_id: self.run_id.clone(),
            graph: self.graph.name().to_string(),
            node: node.map(str::to_string),
            error: error.to_string(),
        });
        Some(Err(error))
    }

    /// Invoke the next node, merge its delta, and pick its successor.
    ///
    /// Returns `None` once END has been reached or after an error.
    pub async fn next_step(&mut self) -> Option<Result<ExecutionStep>> {
        if self.finished {
            return None;
        }
        let Some(current) = self.next.clone() else {
            self.finished = true;
            return None;
        };

        if self.steps_taken >= self.config.max_steps {
            let steps = self.config.max_steps;
            return self.fail(Some(&current), FlowError::StepLimitExceeded { steps });
        }

        let Some(node) = self.graph.node(&current).cloned() else {
            return self.fail(
                Some(&current),
                FlowError::GraphConfig(format!("node '{current}' is not declared")),
            );
        };

        // Execute
        self.emitter.emit(PipelineEvent::StageStarted {
            run_id: self.run_id.clone(),
            node: current.clone(),
        });
        tracing::debug!(run_id = %self.run_id, node = %current, "Executing node");
        let stage_start = Instant::now();
        let ctx = NodeContext::new(&self.run_id, &current, self.emitter.clone());
        let delta = match node.run(&self.state, &ctx).await {
            Ok(delta) => delta,
            Err(e) => return self.fail(Some(&current), e),
        };

        // Merge
        self.state = match self.graph.schema().merge(&self.state, &delta) {
            Ok(state) => state,
            Err(e) => return self.fail(Some(&current), e),
        };
        let index = self.steps_taken;
        self.steps_taken += 1;
        self.emitter.emit(PipelineEvent::StageCompleted {
            run_id: self.run_id.clone(),
            node: current.clone(),
            fields: delta.fields().map(str::to_string).collect(),
            duration_ms: stage_start.elapsed().as_millis() as u64,
        });

        // Select next
        let route = match self.graph.next(&current, &self.state) {
            Ok(route) => route,
            Err(e) => return self.fail(Some(&current), e),
        };
        tracing::debug!(run_id = %self.run_id, from = %current, to = %route.target(), "Edge selected");
        self.emitter.emit(PipelineEvent::EdgeSelected {
            run_id: self.run_id.clone(),
            from: current.clone(),
            to: route.target().to_string(),
        });

        match route {
            Route::To(name) => self.next = Some(name),
            Route::End => {
                self.next = None;
                let status = self
                    .state
                    .get_str(STATUS_FIELD)
                    .unwrap_or("pending")
                    .to_string();
                let duration_ms = self.started.elapsed().as_millis() as u64;
                tracing::info!(
                    run_id = %self.run_id,
                    graph = %self.graph.name(),
                    status = %status,
                    steps = self.steps_taken,
                    duration_ms,
                    "Run completed"
                );
                self.emitter.emit(PipelineEvent::RunCompleted {
                    run_id: self.run_id.clone(),
                    graph: self.graph.name().to_string(),
                    status,
                    steps: self.steps_taken,
                    duration_ms,
                });
            }
        }

        Some(Ok(ExecutionStep {
            index,
            node: current,
            delta,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, END, START};
    use crate::node::{FnNode, Node};
    use crate::state::StateSchema;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    fn schema() -> StateSchema {
        StateSchema::new()
            .overwrite("count")
            .append("trail")
            .overwrite("status")
    }

    fn initial() -> serde_json::Value {
        json!({"count": 0, "trail": [], "status": "pending"})
    }

    fn visit(name: &'static str) -> FnNode<impl Fn(&PipelineState) -> Result<Delta> + Send + Sync> {
        FnNode::new(move |s: &PipelineState| {
            Ok(Delta::new()
                .with("count", s.get_u64("count").unwrap_or(0) + 1)
                .with("trail", json!([name])))
        })
    }

    /// a -> loop on `a` until count reaches 3 -> b -> END
    fn looping_graph() -> Graph {
        GraphBuilder::new("looping", schema())
            .add_node("a", visit("a"))
            .add_node("b", visit("b"))
            .add_edge(START, "a")
            .add_conditional_edges("a", &["a", "b"], |s: &PipelineState| {
                if s.get_u64("count").unwrap_or(0) < 3 {
                    Route::To("a".into())
                } else {
                    Route::To("b".into())
                }
            })
            .add_edge("b", END)
            .build()
            .unwrap()
    }

    // 1. Linear traversal with router loop reaches END
    #[tokio::test]
    async fn run_follows_router_until_end() {
        let executor = PipelineExecutor::new(looping_graph());
        let state = executor.initial_state(initial()).unwrap();
        let run = executor.run(state).await.unwrap();

        assert_eq!(run.visited(), vec!["a", "a", "a", "b"]);
        assert_eq!(run.state.get_u64("count"), Some(4));
        assert_eq!(run.state.get("trail"), Some(&json!(["a", "a", "a", "b"])));
        let indices: Vec<usize> = run.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    // 2. Every transition taken is declared
    #[tokio::test]
    async fn transitions_taken_are_declared() {
        let executor = PipelineExecutor::new(looping_graph());
        let run = executor
            .run(executor.initial_state(initial()).unwrap())
            .await
            .unwrap();
        let graph = executor.graph();
        let mut prev = START.to_string();
        for node in run.visited() {
            assert!(graph.contains(node));
            assert!(graph.is_declared_transition(&prev, node), "{prev} -> {node}");
            prev = node.to_string();
        }
        assert!(graph.is_declared_transition(&prev, END));
    }

    // 3. Pull-based stepping exposes each intermediate state
    #[tokio::test]
    async fn start_yields_steps_one_at_a_time() {
        let executor = PipelineExecutor::new(looping_graph());
        let mut execution = executor
            .start(executor.initial_state(initial()).unwrap())
            .unwrap();

        let first = execution.next_step().await.unwrap().unwrap();
        assert_eq!(first.node, "a");
        assert_eq!(first.delta.get("count"), Some(&json!(1)));
        assert_eq!(execution.state().get_u64("count"), Some(1));

        let mut rest = 0;
        while let Some(step) = execution.next_step().await {
            step.unwrap();
            rest += 1;
        }
        assert_eq!(rest, 3);
        assert!(execution.is_finished());
        assert!(execution.next_step().await.is_none());
    }

    // 4. Stream yields the same steps as run
    #[tokio::test]
    async fn stream_yields_steps_in_order() {
        let executor = PipelineExecutor::new(looping_graph());
        let stream = executor.stream(executor.initial_state(initial()).unwrap());
        tokio::pin!(stream);
        let mut nodes = Vec::new();
        while let Some(step) = stream.next().await {
            nodes.push(step.unwrap().node);
        }
        assert_eq!(nodes, vec!["a", "a", "a", "b"]);
    }

    // 5. Node error propagates and ends the run
    #[tokio::test]
    async fn node_error_propagates() {
        struct Boom;

        #[async_trait]
        impl Node for Boom {
            async fn run(&self, _state: &PipelineState, ctx: &NodeContext) -> Result<Delta> {
                Err(FlowError::node(ctx.node(), "disk on fire"))
            }
        }

        let graph = GraphBuilder::new("boom", schema())
            .add_node("a", visit("a"))
            .add_node("boom", Boom)
            .add_edge(START, "a")
            .add_edge("a", "boom")
            .add_edge("boom", END)
            .build()
            .unwrap();
        let executor = PipelineExecutor::new(graph);
        let mut events = executor.emitter().subscribe();
        let err = executor
            .run(executor.initial_state(initial()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::NodeFailed { ref node, .. } if node == "boom"));

        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let PipelineEvent::RunFailed { node, .. } = event {
                assert_eq!(node.as_deref(), Some("boom"));
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    // 6. Stream stops after the first error
    #[tokio::test]
    async fn stream_ends_after_error() {
        let graph = GraphBuilder::new("bad_delta", schema())
            .add_node(
                "a",
                FnNode::new(|_: &PipelineState| Ok(Delta::new().with("undeclared", 1))),
            )
            .add_edge(START, "a")
            .add_edge("a", END)
            .build()
            .unwrap();
        let executor = PipelineExecutor::new(graph);
        let stream = executor.stream(executor.initial_state(initial()).unwrap());
        tokio::pin!(stream);
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(FlowError::UnknownField { .. })));
        assert!(stream.next().await.is_none());
    }

    // 7. Runaway loops hit the step limit
    #[tokio::test]
    async fn step_limit_aborts_runaway_loop() {
        let graph = GraphBuilder::new("forever", schema())
            .add_node("spin", visit("spin"))
            .add_edge(START, "spin")
            .add_conditional_edges("spin", &["spin", END], |_: &PipelineState| {
                Route::To("spin".into())
            })
            .build()
            .unwrap();
        let executor =
            PipelineExecutor::new(graph).with_config(ExecutorConfig { max_steps: 5 });
        let err = executor
            .run(executor.initial_state(initial()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::StepLimitExceeded { steps: 5 }));
    }

    // 8. Undeclared router result is fatal to the run
    #[tokio::test]
    async fn undeclared_route_is_fatal() {
        let graph = GraphBuilder::new("liar", schema())
            .add_node("a", visit("a"))
            .add_node("b", visit("b"))
            .add_edge(START, "a")
            .add_conditional_edges("a", &["b"], |_: &PipelineState| Route::End)
            .add_edge("b", END)
            .build()
            .unwrap();
        let executor = PipelineExecutor::new(graph);
        let err = executor
            .run(executor.initial_state(initial()).unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UndeclaredRoute { ref target, .. } if target == END));
    }

    // 9. A router that names END by string still ends the run
    #[tokio::test]
    async fn router_naming_end_finishes_run() {
        let graph = GraphBuilder::new("named-end", schema())
            .add_node("a", visit("a"))
            .add_edge(START, "a")
            .add_conditional_edges("a", &["a", END], |s: &PipelineState| {
                if s.get_u64("count").unwrap_or(0) < 2 {
                    Route::To("a".into())
                } else {
                    Route::To(END.into())
                }
            })
            .build()
            .unwrap();
        let executor = PipelineExecutor::new(graph);
        let run = executor
            .run(executor.initial_state(initial()).unwrap())
            .await
            .unwrap();
        assert_eq!(run.visited(), vec!["a", "a"]);
    }

    // 10. Initial state must match the schema
    #[tokio::test]
    async fn start_rejects_foreign_state() {
        let executor = PipelineExecutor::new(looping_graph());
        let foreign = StateSchema::new()
            .overwrite("other")
            .init(json!({"other": 1}))
            .unwrap();
        assert!(executor.start(foreign).is_err());
    }

    // 11. Nodes see exactly the previous step's merged state
    #[tokio::test]
    async fn each_node_sees_previous_merged_state() {
        struct Recorder {
            seen: Arc<std::sync::Mutex<Vec<u64>>>,
            calls: AtomicUsize,
        }

        #[async_trait]
        impl Node for Recorder {
            async fn run(&self, state: &PipelineState, _ctx: &NodeContext) -> Result<Delta> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let count = state.get_u64("count").unwrap_or(0);
                self.seen.lock().unwrap().push(count);
                Ok(Delta::new().with("count", count + 10))
            }
        }

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let graph = GraphBuilder::new("chain", schema())
            .add_node("one", Recorder { seen: seen.clone(), calls: AtomicUsize::new(0) })
            .add_node("two", Recorder { seen: seen.clone(), calls: AtomicUsize::new(0) })
            .add_edge(START, "one")
            .add_edge("one", "two")
            .add_edge("two", END)
            .build()
            .unwrap();
        let executor = PipelineExecutor::new(graph);
        let run = executor
            .run(executor.initial_state(initial()).unwrap())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 10]);
        assert_eq!(run.state.get_u64("count"), Some(20));
        assert_eq!(run.status(), RunStatus::Pending);
    }
}
