//! Typed failures returned by content generation.

use crate::Operation;

/// Why a generation call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection or protocol error before a response arrived.
    Transport,
    /// The request did not finish within the configured timeout.
    Timeout,
    /// The backend answered with a non-success HTTP status.
    Provider,
    /// The payload is not the declared shape for the operation.
    Malformed,
    /// The payload has the declared shape but required content is empty.
    Incomplete,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Timeout => "timeout",
            FailureKind::Provider => "provider",
            FailureKind::Malformed => "malformed",
            FailureKind::Incomplete => "incomplete",
        }
    }
}

/// A failed call to the content generator.
///
/// Callers treat every kind the same way (count an attempt, maybe retry);
/// the kind only feeds diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation} generation failed ({}): {message}", .kind.as_str())]
pub struct GenerationFailure {
    pub operation: Operation,
    pub kind: FailureKind,
    pub message: String,
}

impl GenerationFailure {
    pub fn new(operation: Operation, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(operation: Operation, message: impl Into<String>) -> Self {
        Self::new(operation, FailureKind::Malformed, message)
    }

    pub fn incomplete(operation: Operation, missing: &[&str]) -> Self {
        Self::new(
            operation,
            FailureKind::Incomplete,
            format!("missing or empty: {}", missing.join(", ")),
        )
    }

    pub fn from_reqwest(operation: Operation, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else {
            FailureKind::Transport
        };
        Self::new(operation, kind, err.to_string())
    }
}
