//! Certification question pipeline: resolve the certification's channel,
//! draft a multiple-choice question, review it, publish it.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use inkflow_llm::{CertificationQuestion, GenerationFailure, GenerationOutput, GenerationRequest, Operation};
use inkflow_types::{FlowError, Result};

use crate::config::{CertificationChannel, ChannelMapStore};
use crate::gate::{route_on_gate, AttemptPolicy, GateStatus};
use crate::graph::{Graph, GraphBuilder, END, START};
use crate::node::{FnNode, Node, NodeContext};
use crate::state::{Delta, PipelineState, StateSchema};

use super::common::{
    self, fail_node, outcome_fields, required, required_param, skip_node, slot_fields, verdict,
    GenerateNode, PublishNode, Slot, FAIL, PUBLISH, REVIEW_GATE, SKIP,
};
use super::Services;

pub const NAME: &str = "certification";

pub const CERTIFICATION: &str = "certification";
pub const CHANNEL: &str = "channel";
pub const CHANNEL_GATE: &str = "channel_gate";

pub const QUESTION: Slot = Slot {
    output: "question",
    attempts: "question_attempts",
    errors: "question_errors",
};

pub const RESOLVE_CHANNEL: &str = "resolve_channel";
pub const WRITE_QUESTION: &str = "write_question";
pub const REVIEW_QUESTION: &str = "review_question";

pub fn schema() -> StateSchema {
    slot_fields(outcome_fields(StateSchema::new()), QUESTION)
        .overwrite(CERTIFICATION)
        .overwrite(CHANNEL)
        .overwrite(CHANNEL_GATE)
}

pub fn initial_state(params: &serde_json::Value) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    common::outcome_initial(&mut map);
    common::slot_initial(&mut map, QUESTION);
    map.insert(CERTIFICATION.into(), json!(required_param(params, CERTIFICATION)?));
    map.insert(CHANNEL.into(), json!(null));
    map.insert(CHANNEL_GATE.into(), json!(null));
    Ok(serde_json::Value::Object(map))
}

// ---------------------------------------------------------------------------
// resolve_channel
// ---------------------------------------------------------------------------

/// Looks the certification up in the channel map. Unknown certifications
/// are skipped, not failed: the map simply has no channel for them yet.
pub struct ResolveChannelNode {
    store: Arc<ChannelMapStore>,
}

impl ResolveChannelNode {
    pub fn new(store: Arc<ChannelMapStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Node for ResolveChannelNode {
    async fn run(&self, state: &PipelineState, ctx: &NodeContext) -> Result<Delta> {
        let id = common::required_str(state, CERTIFICATION, ctx.node())?;
        let map = self.store.current().await;
        match map.lookup(id) {
            Some(entry) => {
                tracing::debug!(node = %ctx.node(), certification = %id, channel = %entry.channel, "Channel resolved");
                let mut delta = verdict(GateStatus::Approved, CHANNEL_GATE, None);
                delta.set_json(CHANNEL, entry)?;
                Ok(delta)
            }
            None => {
                ctx.note("certification has no channel", json!({ "certification": id }));
                Ok(verdict(
                    GateStatus::Skip,
                    CHANNEL_GATE,
                    Some(format!("no channel mapped for certification '{id}'")),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// write_question / review_question / publish
// ---------------------------------------------------------------------------

fn request(state: &PipelineState, node: &str) -> Result<GenerationRequest> {
    let channel: CertificationChannel = required(state, CHANNEL, node)?;
    Ok(GenerationRequest::CertificationQuestion {
        certification: channel.name,
        channel: channel.channel,
    })
}

fn read(output: GenerationOutput) -> std::result::Result<serde_json::Value, GenerationFailure> {
    common::result_json(
        Operation::CertificationQuestion,
        output.into_certification_question()?,
    )
}

/// Why a question is unusable, if it is.
fn question_problem(question: &CertificationQuestion, options: usize) -> Option<String> {
    if question.question.trim().is_empty() {
        return Some("question text is blank".into());
    }
    if question.options.len() != options {
        return Some(format!(
            "question has {} options, expected {options}",
            question.options.len()
        ));
    }
    let mut seen = BTreeSet::new();
    for option in &question.options {
        let key = option.trim().to_lowercase();
        if key.is_empty() {
            return Some("question has a blank option".into());
        }
        if !seen.insert(key) {
            return Some(format!("option '{}' appears twice", option.trim()));
        }
    }
    if question.answer_index >= question.options.len() {
        return Some(format!(
            "answer index {} is out of range",
            question.answer_index
        ));
    }
    if question.explanation.trim().is_empty() {
        return Some("question has no explanation".into());
    }
    None
}

fn review_node(options: usize) -> impl Node {
    FnNode::new(move |state: &PipelineState| {
        let Some(question) = state.get_as::<CertificationQuestion>(QUESTION.output)? else {
            return Ok(verdict(GateStatus::Error, REVIEW_GATE, Some("no question to review".into())));
        };
        Ok(match question_problem(&question, options) {
            None => verdict(GateStatus::Approved, REVIEW_GATE, None),
            Some(reason) => verdict(GateStatus::Skip, REVIEW_GATE, Some(reason)),
        })
    })
}

fn payload(state: &PipelineState, node: &str) -> Result<(String, serde_json::Value)> {
    let question: CertificationQuestion = required(state, QUESTION.output, node)?;
    let channel: CertificationChannel = required(state, CHANNEL, node)?;
    let id = crate::sink::unique_id(&channel.id);
    let answer = question
        .options
        .get(question.answer_index)
        .cloned()
        .ok_or_else(|| FlowError::node(node, "answer index is out of range"))?;
    Ok((
        id,
        json!({
            "certification": channel.id,
            "certification_name": channel.name,
            "channel": channel.channel,
            "question": question.question,
            "options": question.options,
            "answer_index": question.answer_index,
            "answer": answer,
            "explanation": question.explanation,
        }),
    ))
}

pub fn build(services: &Services) -> Result<Graph> {
    let store = services
        .channels
        .clone()
        .ok_or_else(|| FlowError::Config(format!("{NAME}: a channel map is required")))?;
    let policy = AttemptPolicy::new(QUESTION.attempts, services.settings.max_attempts);

    GraphBuilder::new(NAME, schema())
        .add_node(RESOLVE_CHANNEL, ResolveChannelNode::new(store))
        .add_node(
            WRITE_QUESTION,
            GenerateNode::new(services.generator.clone(), QUESTION, request, read),
        )
        .add_node(REVIEW_QUESTION, review_node(services.settings.question_options))
        .add_node(PUBLISH, PublishNode::new(services.sink.clone(), "certification", payload))
        .add_node(SKIP, skip_node())
        .add_node(FAIL, fail_node(QUESTION))
        .add_edge(START, RESOLVE_CHANNEL)
        .add_conditional_edges(RESOLVE_CHANNEL, &[WRITE_QUESTION, SKIP, FAIL], |s| {
            route_on_gate(s, CHANNEL_GATE, WRITE_QUESTION, SKIP, FAIL)
        })
        .add_conditional_edges(WRITE_QUESTION, &[REVIEW_QUESTION, WRITE_QUESTION, FAIL], move |s| {
            policy.route(s, s.is_set(QUESTION.output), REVIEW_QUESTION, WRITE_QUESTION, FAIL)
        })
        .add_conditional_edges(REVIEW_QUESTION, &[PUBLISH, SKIP, FAIL], |s| {
            route_on_gate(s, REVIEW_GATE, PUBLISH, SKIP, FAIL)
        })
        .add_edge(PUBLISH, END)
        .add_edge(SKIP, END)
        .add_edge(FAIL, END)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelMap;
    use crate::events::EventEmitter;

    fn question(options: &[&str], answer_index: usize) -> CertificationQuestion {
        CertificationQuestion {
            question: "Which service stores objects?".into(),
            options: options.iter().map(|o| o.to_string()).collect(),
            answer_index,
            explanation: "S3 is object storage.".into(),
        }
    }

    #[test]
    fn question_review_rules() {
        assert_eq!(question_problem(&question(&["S3", "EBS", "EFS", "RDS"], 0), 4), None);
        assert!(question_problem(&question(&["S3", "EBS", "EFS"], 0), 4)
            .unwrap()
            .contains("3 options"));
        assert!(question_problem(&question(&["S3", " s3 ", "EFS", "RDS"], 0), 4)
            .unwrap()
            .contains("twice"));
        assert!(question_problem(&question(&["S3", "EBS", "EFS", "RDS"], 4), 4)
            .unwrap()
            .contains("out of range"));

        let mut blank = question(&["S3", "EBS", "EFS", "RDS"], 1);
        blank.explanation = "  ".into();
        assert!(question_problem(&blank, 4).is_some());
    }

    #[tokio::test]
    async fn resolve_channel_approves_known_and_skips_unknown() {
        let map = ChannelMap::from_json(
            r#"{"version": 1, "certifications": [
                {"id": "aws-saa", "name": "AWS Solutions Architect Associate", "channel": "aws"}
            ]}"#,
        )
        .unwrap();
        let node = ResolveChannelNode::new(Arc::new(ChannelMapStore::fixed(map)));
        let ctx = NodeContext::new("r1", RESOLVE_CHANNEL, EventEmitter::default());

        let state = schema()
            .init(initial_state(&json!({"certification": "AWS-SAA"})).unwrap())
            .unwrap();
        let delta = node.run(&state, &ctx).await.unwrap();
        assert_eq!(delta.get(CHANNEL_GATE), Some(&json!("approved")));
        assert_eq!(delta.get(CHANNEL).unwrap()["channel"], "aws");

        let state = schema()
            .init(initial_state(&json!({"certification": "cka"})).unwrap())
            .unwrap();
        let delta = node.run(&state, &ctx).await.unwrap();
        assert_eq!(delta.get(CHANNEL_GATE), Some(&json!("skip")));
        assert!(delta
            .get(crate::engine::REASON_FIELD)
            .unwrap()
            .as_str()
            .unwrap()
            .contains("cka"));
    }

    #[test]
    fn payload_id_has_short_unique_suffix() {
        let schema = schema();
        let state = schema
            .init(initial_state(&json!({"certification": "aws-saa"})).unwrap())
            .unwrap();
        let state = schema
            .merge(
                &state,
                &Delta::new()
                    .with(CHANNEL, json!({"id": "aws-saa", "name": "AWS SAA", "channel": "aws"}))
                    .with(QUESTION.output, serde_json::to_value(question(&["a", "b", "c", "d"], 2)).unwrap()),
            )
            .unwrap();
        let (id, payload) = payload(&state, PUBLISH).unwrap();
        assert!(id.starts_with("aws-saa-"));
        assert_eq!(id.len(), "aws-saa-".len() + 8);
        assert_eq!(payload["answer"], "c");
    }
}
