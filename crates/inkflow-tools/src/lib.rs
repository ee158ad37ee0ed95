//! Side-effecting collaborators used by pipeline nodes: URL reachability,
//! sandboxed code execution, and self-correcting test verification.

pub mod reachability;
pub mod sandbox;
pub mod verifier;

pub use reachability::{status_counts_as_reachable, ReachabilityCheck, ReachabilityValidator};
pub use sandbox::{CodeExecutor, ExecutionFailure, SandboxConfig, SandboxHarness};
pub use verifier::{outputs_match, TestVerifier, VerificationReport};
