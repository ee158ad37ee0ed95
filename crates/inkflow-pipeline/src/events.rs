//! Run event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! observers (loggers, progress displays, tests) can follow a run without
//! reading node deltas or capturing log output.

use serde::{Deserialize, Serialize};

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    RunStarted {
        run_id: String,
        graph: String,
        node_count: usize,
    },
    StageStarted {
        run_id: String,
        node: String,
    },
    StageCompleted {
        run_id: String,
        node: String,
        fields: Vec<String>,
        duration_ms: u64,
    },
    EdgeSelected {
        run_id: String,
        from: String,
        to: String,
    },
    /// Structured note from inside a node body.
    NodeNote {
        run_id: String,
        node: String,
        message: String,
        data: serde_json::Value,
    },
    RunCompleted {
        run_id: String,
        graph: String,
        status: String,
        steps: usize,
        duration_ms: u64,
    },
    RunFailed {
        run_id: String,
        graph: String,
        node: Option<String>,
        error: String,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> &str {
        match self {
            PipelineEvent::RunStarted { run_id, .. }
            | PipelineEvent::StageStarted { run_id, .. }
            | PipelineEvent::StageCompleted { run_id, .. }
            | PipelineEvent::EdgeSelected { run_id, .. }
            | PipelineEvent::NodeNote { run_id, .. }
            | PipelineEvent::RunCompleted { run_id, .. }
            | PipelineEvent::RunFailed { run_id, .. } => run_id,
        }
    }
}

/// Event emitter wrapping a broadcast sender.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
