//! Coding challenge pipeline: draft a challenge with a reference solution,
//! execute the solution against its own test cases, keep what checks out.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use inkflow_llm::{CodingChallenge, GenerationFailure, GenerationOutput, GenerationRequest, Operation};
use inkflow_tools::TestVerifier;
use inkflow_types::{FlowError, Result, TestCase};

use crate::gate::{route_on_gate, AttemptPolicy, GateStatus};
use crate::graph::{Graph, GraphBuilder, END, START};
use crate::node::{FnNode, Node, NodeContext};
use crate::sink::unique_id;
use crate::state::{Delta, PipelineState, StateSchema};

use super::common::{
    self, fail_node, outcome_fields, required, required_str, skip_node, slot_fields, verdict,
    GenerateNode, PublishNode, Slot, FAIL, PUBLISH, REVIEW_GATE, SKIP, TOPIC,
};
use super::Services;

pub const NAME: &str = "coding-challenge";

pub const DIFFICULTY: &str = "difficulty";
pub const TEST_CASES: &str = "test_cases";
pub const VERIFICATION: &str = "verification";
pub const DEFAULT_DIFFICULTY: &str = "medium";

pub const CHALLENGE: Slot = Slot {
    output: "challenge",
    attempts: "challenge_attempts",
    errors: "challenge_errors",
};

pub const WRITE_CHALLENGE: &str = "write_challenge";
pub const VERIFY_TESTS: &str = "verify_tests";
pub const REVIEW_CHALLENGE: &str = "review_challenge";

/// Counts written by `verify_tests`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub matched: usize,
    pub corrected: usize,
    pub failed: usize,
}

impl VerificationSummary {
    pub fn verified(&self) -> usize {
        self.matched + self.corrected
    }
}

pub fn schema() -> StateSchema {
    slot_fields(outcome_fields(StateSchema::new()), CHALLENGE)
        .overwrite(TOPIC)
        .overwrite(DIFFICULTY)
        .overwrite(TEST_CASES)
        .overwrite(VERIFICATION)
}

pub fn initial_state(params: &serde_json::Value) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    common::outcome_initial(&mut map);
    common::slot_initial(&mut map, CHALLENGE);
    map.insert(TOPIC.into(), json!(common::required_param(params, TOPIC)?));
    let difficulty = params
        .get(DIFFICULTY)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_DIFFICULTY);
    map.insert(DIFFICULTY.into(), json!(difficulty));
    map.insert(TEST_CASES.into(), json!([]));
    map.insert(VERIFICATION.into(), json!(null));
    Ok(serde_json::Value::Object(map))
}

fn request(state: &PipelineState, node: &str) -> Result<GenerationRequest> {
    Ok(GenerationRequest::CodingChallenge {
        topic: required_str(state, TOPIC, node)?.to_string(),
        difficulty: state
            .get_str(DIFFICULTY)
            .unwrap_or(DEFAULT_DIFFICULTY)
            .to_string(),
    })
}

fn read(output: GenerationOutput) -> std::result::Result<serde_json::Value, GenerationFailure> {
    common::result_json(Operation::CodingChallenge, output.into_coding_challenge()?)
}

// ---------------------------------------------------------------------------
// verify_tests
// ---------------------------------------------------------------------------

/// Runs the reference solution on every generated case. Expected outputs
/// that disagree with the executed result are replaced by it.
pub struct VerifyTestsNode {
    verifier: TestVerifier,
}

impl VerifyTestsNode {
    pub fn new(verifier: TestVerifier) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl Node for VerifyTestsNode {
    async fn run(&self, state: &PipelineState, ctx: &NodeContext) -> Result<Delta> {
        let challenge: CodingChallenge = required(state, CHALLENGE.output, ctx.node())?;
        let cases = challenge.test_cases();
        let report = self
            .verifier
            .verify(&challenge.reference_solution, &challenge.entry_point, cases)
            .await;

        let summary = VerificationSummary {
            total: report.cases.len(),
            matched: report.matched,
            corrected: report.corrected,
            failed: report.failed,
        };
        tracing::info!(
            node = %ctx.node(),
            total = summary.total,
            matched = summary.matched,
            corrected = summary.corrected,
            failed = summary.failed,
            "Test cases verified"
        );
        ctx.note("test cases verified", serde_json::to_value(summary)?);

        let mut delta = Delta::new();
        delta.set_json(TEST_CASES, &report.cases)?;
        delta.set_json(VERIFICATION, &summary)?;
        Ok(delta)
    }
}

// ---------------------------------------------------------------------------
// review_challenge / publish
// ---------------------------------------------------------------------------

fn review_node(min_verified: usize) -> impl Node {
    FnNode::new(move |state: &PipelineState| {
        let summary: Option<VerificationSummary> = state.get_as(VERIFICATION)?;
        let Some(summary) = summary else {
            return Ok(verdict(GateStatus::Error, REVIEW_GATE, Some("test cases were never verified".into())));
        };
        let verified = summary.verified();
        Ok(if summary.total == 0 {
            verdict(GateStatus::Error, REVIEW_GATE, Some("challenge has no test cases".into()))
        } else if verified == 0 {
            verdict(
                GateStatus::Error,
                REVIEW_GATE,
                Some(format!("reference solution failed all {} test cases", summary.total)),
            )
        } else if verified < min_verified {
            verdict(
                GateStatus::Skip,
                REVIEW_GATE,
                Some(format!("only {verified} verified test cases, need {min_verified}")),
            )
        } else {
            verdict(GateStatus::Approved, REVIEW_GATE, None)
        })
    })
}

/// Only cases the solution actually ran are published.
fn payload(state: &PipelineState, node: &str) -> Result<(String, serde_json::Value)> {
    let challenge: CodingChallenge = required(state, CHALLENGE.output, node)?;
    let cases: Vec<TestCase> = required(state, TEST_CASES, node)?;
    let cases: Vec<TestCase> = cases.into_iter().filter(TestCase::is_verified).collect();
    if cases.is_empty() {
        return Err(FlowError::node(node, "no verified test cases to publish"));
    }
    Ok((
        unique_id(&challenge.title),
        json!({
            "topic": state.get_str(TOPIC),
            "difficulty": state.get_str(DIFFICULTY),
            "title": challenge.title,
            "description": challenge.description,
            "entry_point": challenge.entry_point,
            "reference_solution": challenge.reference_solution,
            "test_cases": cases,
        }),
    ))
}

pub fn build(services: &Services) -> Result<Graph> {
    let verifier = services
        .verifier
        .clone()
        .ok_or_else(|| FlowError::Config(format!("{NAME}: a test verifier is required")))?;
    let policy = AttemptPolicy::new(CHALLENGE.attempts, services.settings.max_attempts);

    GraphBuilder::new(NAME, schema())
        .add_node(
            WRITE_CHALLENGE,
            GenerateNode::new(services.generator.clone(), CHALLENGE, request, read),
        )
        .add_node(VERIFY_TESTS, VerifyTestsNode::new(verifier))
        .add_node(REVIEW_CHALLENGE, review_node(services.settings.min_verified_cases))
        .add_node(PUBLISH, PublishNode::new(services.sink.clone(), "coding-challenge", payload))
        .add_node(SKIP, skip_node())
        .add_node(FAIL, fail_node(CHALLENGE))
        .add_edge(START, WRITE_CHALLENGE)
        .add_conditional_edges(WRITE_CHALLENGE, &[VERIFY_TESTS, WRITE_CHALLENGE, FAIL], move |s| {
            policy.route(s, s.is_set(CHALLENGE.output), VERIFY_TESTS, WRITE_CHALLENGE, FAIL)
        })
        .add_edge(VERIFY_TESTS, REVIEW_CHALLENGE)
        .add_conditional_edges(REVIEW_CHALLENGE, &[PUBLISH, SKIP, FAIL], |s| {
            route_on_gate(s, REVIEW_GATE, PUBLISH, SKIP, FAIL)
        })
        .add_edge(PUBLISH, END)
        .add_edge(SKIP, END)
        .add_edge(FAIL, END)
        .build()
}
