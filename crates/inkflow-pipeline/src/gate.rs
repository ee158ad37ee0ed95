//! Retry and validation-gate conventions layered on plain nodes and routers.
//!
//! A generating node bumps its attempt counter on every invocation and
//! writes either a result or an error marker. Its router uses
//! [`AttemptPolicy`] to go forward, retry, or give up. A validation gate
//! writes a [`GateStatus`] computed only from existing state, and its router
//! dispatches on that field with [`route_on_gate`].

use serde::{Deserialize, Serialize};

use crate::graph::Route;
use crate::state::PipelineState;

// ---------------------------------------------------------------------------
// AttemptPolicy
// ---------------------------------------------------------------------------

/// What a generating node's router should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDecision {
    Proceed,
    Retry,
    GiveUp,
}

/// Bounded retry budget for one generating node.
///
/// `max_attempts` is the total number of invocations allowed, so the node
/// runs at most `max_attempts` times in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptPolicy {
    pub counter_field: String,
    pub max_attempts: u64,
}

impl AttemptPolicy {
    pub fn new(counter_field: impl Into<String>, max_attempts: u64) -> Self {
        Self {
            counter_field: counter_field.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Attempts made so far.
    pub fn attempts(&self, state: &PipelineState) -> u64 {
        state.get_u64(&self.counter_field).unwrap_or(0)
    }

    /// Counter value the generating node writes for the attempt it is making.
    pub fn next_attempt(&self, state: &PipelineState) -> u64 {
        self.attempts(state) + 1
    }

    pub fn decide(&self, state: &PipelineState, success_present: bool) -> AttemptDecision {
        if success_present {
            AttemptDecision::Proceed
        } else if self.attempts(state) < self.max_attempts {
            AttemptDecision::Retry
        } else {
            AttemptDecision::GiveUp
        }
    }

    /// Router body: `forward` on success, `retry` while budget remains,
    /// `fallback` once `attempts >= max_attempts`.
    pub fn route(
        &self,
        state: &PipelineState,
        success_present: bool,
        forward: &str,
        retry: &str,
        fallback: &str,
    ) -> Route {
        match self.decide(state, success_present) {
            AttemptDecision::Proceed => Route::named(forward),
            AttemptDecision::Retry => Route::named(retry),
            AttemptDecision::GiveUp => Route::named(fallback),
        }
    }
}

// ---------------------------------------------------------------------------
// GateStatus
// ---------------------------------------------------------------------------

/// Tri-state verdict of a validation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Approved,
    Skip,
    Error,
}

impl GateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GateStatus::Approved => "approved",
            GateStatus::Skip => "skip",
            GateStatus::Error => "error",
        }
    }

    /// Read a gate field. Anything unrecognized reads as `Error`.
    pub fn read(state: &PipelineState, field: &str) -> GateStatus {
        state
            .get(field)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(GateStatus::Error)
    }
}

impl From<GateStatus> for serde_json::Value {
    fn from(status: GateStatus) -> Self {
        serde_json::Value::String(status.as_str().to_string())
    }
}

/// Router body for a validation gate: dispatch purely on `field`.
pub fn route_on_gate(
    state: &PipelineState,
    field: &str,
    approved: &str,
    skip: &str,
    error: &str,
) -> Route {
    match GateStatus::read(state, field) {
        GateStatus::Approved => Route::named(approved),
        GateStatus::Skip => Route::named(skip),
        GateStatus::Error => Route::named(error),
    }
}
