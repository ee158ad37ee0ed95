//! Concurrent driver for many independent runs.
//!
//! Runs share nothing but the executor's immutable graph. A failing or
//! panicking run becomes a [`BatchOutcome::Failed`] entry; its siblings keep
//! going.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::engine::{PipelineExecutor, PipelineRun};
use crate::state::PipelineState;

#[derive(Debug)]
pub enum BatchOutcome {
    Finished { index: usize, run: PipelineRun },
    Failed { index: usize, error: String },
}

impl BatchOutcome {
    /// Position of the input this outcome belongs to.
    pub fn index(&self) -> usize {
        match self {
            BatchOutcome::Finished { index, .. } | BatchOutcome::Failed { index, .. } => *index,
        }
    }

    pub fn run(&self) -> Option<&PipelineRun> {
        match self {
            BatchOutcome::Finished { run, .. } => Some(run),
            BatchOutcome::Failed { .. } => None,
        }
    }
}

/// Run every input at most `concurrency` at a time. Outcomes come back in
/// input order.
pub async fn run_batch(
    executor: Arc<PipelineExecutor>,
    inputs: Vec<PipelineState>,
    concurrency: usize,
) -> Vec<BatchOutcome> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let total = inputs.len();

    let handles: Vec<_> = inputs
        .into_iter()
        .map(|initial| {
            let executor = executor.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| inkflow_types::FlowError::Other(e.to_string()))?;
                executor.run(initial).await
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(total);
    for (index, handle) in handles.into_iter().enumerate() {
        let outcome = match handle.await {
            Ok(Ok(run)) => BatchOutcome::Finished { index, run },
            Ok(Err(e)) => {
                tracing::warn!(index, error = %e, "Batch run failed");
                BatchOutcome::Failed {
                    index,
                    error: e.to_string(),
                }
            }
            Err(join_err) => {
                tracing::error!(index, error = %join_err, "Batch run panicked");
                BatchOutcome::Failed {
                    index,
                    error: format!("run aborted: {join_err}"),
                }
            }
        };
        outcomes.push(outcome);
    }

    tracing::info!(
        total,
        failed = outcomes
            .iter()
            .filter(|o| matches!(o, BatchOutcome::Failed { .. }))
            .count(),
        "Batch finished"
    );
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, END, START};
    use crate::node::{Node, NodeContext};
    use crate::state::{Delta, StateSchema};
    use async_trait::async_trait;
    use inkflow_types::{FlowError, Result};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Sleeps, tracks peak concurrency, and fails or panics on request.
    struct Worker {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Node for Worker {
        async fn run(&self, state: &PipelineState, ctx: &NodeContext) -> Result<Delta> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            match state.get_str("mode") {
                Some("fail") => Err(FlowError::node(ctx.node(), "asked to fail")),
                Some("panic") => panic!("asked to panic"),
                _ => Ok(Delta::new().with("status", "completed")),
            }
        }
    }

    fn executor(active: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Arc<PipelineExecutor> {
        let graph = GraphBuilder::new("batch", StateSchema::new().overwrite("mode").overwrite("status"))
            .add_node("work", Worker { active, peak })
            .add_edge(START, "work")
            .add_edge("work", END)
            .build()
            .unwrap();
        Arc::new(PipelineExecutor::new(graph))
    }

    fn input(executor: &PipelineExecutor, mode: &str) -> PipelineState {
        executor
            .initial_state(json!({"mode": mode, "status": "pending"}))
            .unwrap()
    }

    #[tokio::test]
    async fn failures_do_not_abort_siblings() {
        let exec = executor(Arc::default(), Arc::default());
        let inputs = vec![
            input(&exec, "ok"),
            input(&exec, "fail"),
            input(&exec, "panic"),
            input(&exec, "ok"),
        ];
        let outcomes = run_batch(exec, inputs, 2).await;

        assert_eq!(outcomes.len(), 4);
        let indices: Vec<usize> = outcomes.iter().map(BatchOutcome::index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(outcomes[0].run().is_some());
        assert!(matches!(&outcomes[1], BatchOutcome::Failed { error, .. } if error.contains("asked to fail")));
        assert!(matches!(&outcomes[2], BatchOutcome::Failed { .. }));
        assert_eq!(
            outcomes[3].run().unwrap().status(),
            inkflow_types::RunStatus::Completed
        );
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let exec = executor(active, peak.clone());
        let inputs = (0..8).map(|_| input(&exec, "ok")).collect();
        let outcomes = run_batch(exec, inputs, 3).await;

        assert!(outcomes.iter().all(|o| o.run().is_some()));
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }
}
