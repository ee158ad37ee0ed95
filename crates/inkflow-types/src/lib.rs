//! Shared types and errors for the inkflow pipeline engine.
//!
//! This crate provides the foundational types used across all other inkflow crates:
//! - `FlowError`: unified error taxonomy for fatal run failures
//! - `RunStatus`: terminal status every pipeline run resolves to
//! - `TestCase`: a generated test case and its verification record

use serde::{Deserialize, Serialize};

/// Unified error type for all inkflow subsystems.
///
/// Only *unexpected* failures are represented here. Expected failures
/// (generation errors, unreachable sources, failed executions) live in
/// pipeline state and are routed around rather than returned.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    // === Graph / State Errors ===
    #[error("Graph configuration error: {0}")]
    GraphConfig(String),

    #[error("Unknown state field '{field}'")]
    UnknownField { field: String },

    #[error("State field '{field}' has no initial value")]
    MissingField { field: String },

    #[error("Cannot apply {reducer} reducer to field '{field}': {message}")]
    ReducerMismatch {
        field: String,
        reducer: String,
        message: String,
    },

    // === Run Errors ===
    #[error("Router for node '{node}' returned undeclared target '{target}'")]
    UndeclaredRoute { node: String, target: String },

    #[error("Node '{node}' failed: {message}")]
    NodeFailed { node: String, message: String },

    #[error("Run exceeded the step limit of {steps} node executions")]
    StepLimitExceeded { steps: usize },

    // === Configuration ===
    #[error("Configuration error: {0}")]
    Config(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FlowError {
    /// Returns `true` if re-running the whole pipeline may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowError::NodeFailed { .. } | FlowError::Io(_))
    }

    /// Returns `true` if the error comes from a wiring or configuration
    /// mistake and every future run will fail the same way.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowError::GraphConfig(_)
                | FlowError::UnknownField { .. }
                | FlowError::MissingField { .. }
                | FlowError::ReducerMismatch { .. }
                | FlowError::UndeclaredRoute { .. }
                | FlowError::Config(_)
        )
    }

    /// Shorthand for a node failure.
    pub fn node(node: impl Into<String>, message: impl Into<String>) -> Self {
        FlowError::NodeFailed {
            node: node.into(),
            message: message.into(),
        }
    }
}

/// A convenience alias for `Result<T, FlowError>`.
pub type Result<T> = std::result::Result<T, FlowError>;

// ---------------------------------------------------------------------------
// RunStatus: what a pipeline run resolved to
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run has not reached a terminal node yet.
    Pending,
    Completed,
    Skipped,
    Error,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Completed => "completed",
            RunStatus::Skipped => "skipped",
            RunStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TestCase: generated test case plus verification record
// ---------------------------------------------------------------------------

/// A single test case for a generated coding challenge.
///
/// `id`, `input` and `expected_output` come from the content generator.
/// `actual_output`, `matched` and `execution_error` are only ever written by
/// the test verifier. After a successful verification `expected_output`
/// holds the executed output, not the generator's claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    /// Arguments for the entry point: an array is passed positionally, an
    /// object as keyword arguments, anything else as a single argument.
    pub input: serde_json::Value,
    /// Canonical JSON text of the expected return value.
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_error: Option<String>,
}

impl TestCase {
    pub fn new(
        id: impl Into<String>,
        input: serde_json::Value,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            input,
            expected_output: expected_output.into(),
            actual_output: None,
            matched: None,
            execution_error: None,
        }
    }

    /// `true` once the verifier has executed this case successfully.
    pub fn is_verified(&self) -> bool {
        self.actual_output.is_some() && self.execution_error.is_none()
    }
}
