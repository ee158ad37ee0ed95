//! Self-correcting verification of generated test cases.
//!
//! The reference solution is ground truth: when it runs, its output replaces
//! the generator's declared expectation whether or not they agreed. When it
//! does not run, the declared expectation is kept and the failure recorded.

use std::sync::Arc;
use std::time::Duration;

use inkflow_types::TestCase;
use serde::{Deserialize, Serialize};

use crate::sandbox::{CodeExecutor, SandboxHarness};

/// Outcome of verifying one batch of test cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Every input case, in input order, with its verification record.
    pub cases: Vec<TestCase>,
    /// Executed and equal to the declared expectation.
    pub matched: usize,
    /// Executed, disagreed, and rewritten to the executed output.
    pub corrected: usize,
    /// Could not be executed; declared expectation retained.
    pub failed: usize,
}

impl VerificationReport {
    /// Cases whose expected output now comes from an actual execution.
    pub fn verified(&self) -> usize {
        self.matched + self.corrected
    }

    pub fn all_executed(&self) -> bool {
        self.failed == 0
    }
}

/// Compare a declared expectation against an executed value.
///
/// Declared text that parses as JSON is compared structurally, with numbers
/// compared by value so `2` equals `2.0`. Anything else is compared against
/// the executed value's text form.
pub fn outputs_match(declared: &str, actual: &serde_json::Value) -> bool {
    match serde_json::from_str::<serde_json::Value>(declared.trim()) {
        Ok(expected) => json_equal(&expected, actual),
        Err(_) => match actual {
            serde_json::Value::String(s) => s == declared,
            other => other.to_string() == declared.trim(),
        },
    }
}

fn json_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (a, b) {
        // Integers compare exactly; floats only when either side is one.
        (Value::Number(x), Value::Number(y)) => {
            if x.is_f64() || y.is_f64() {
                x.as_f64() == y.as_f64()
            } else if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x == y
            } else {
                x.as_u64() == y.as_u64()
            }
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| json_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Runs a reference solution against each test case.
#[derive(Clone)]
pub struct TestVerifier {
    executor: Arc<dyn CodeExecutor>,
    timeout: Duration,
}

impl std::fmt::Debug for TestVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestVerifier")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TestVerifier {
    pub fn new(executor: Arc<dyn CodeExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    /// Verifier over a sandbox harness, using the harness's default timeout.
    pub fn from_harness(harness: SandboxHarness) -> Self {
        let timeout = harness.config().default_timeout;
        Self::new(Arc::new(harness), timeout)
    }

    pub async fn verify(
        &self,
        solution: &str,
        entry_point: &str,
        cases: Vec<TestCase>,
    ) -> VerificationReport {
        let mut report = VerificationReport {
            cases: Vec::with_capacity(cases.len()),
            matched: 0,
            corrected: 0,
            failed: 0,
        };

        for mut case in cases {
            match self
                .executor
                .execute(solution, entry_point, &case.input, self.timeout)
                .await
            {
                Ok(actual) => {
                    let matched = outputs_match(&case.expected_output, &actual);
                    if matched {
                        report.matched += 1;
                    } else {
                        report.corrected += 1;
                        tracing::info!(
                            case = %case.id,
                            declared = %case.expected_output,
                            executed = %actual,
                            "Declared output replaced by executed output"
                        );
                    }
                    case.expected_output = actual.to_string();
                    case.actual_output = Some(actual);
                    case.matched = Some(matched);
                    case.execution_error = None;
                }
                Err(failure) => {
                    report.failed += 1;
                    tracing::warn!(case = %case.id, error = %failure, "Test case execution failed");
                    case.actual_output = None;
                    case.matched = None;
                    case.execution_error = Some(failure.to_string());
                }
            }
            report.cases.push(case);
        }

        tracing::debug!(
            matched = report.matched,
            corrected = report.corrected,
            failed = report.failed,
            "Verification finished"
        );
        report
    }
}
