//! RCA blog pipeline: a public incident postmortem retold as a
//! root-cause-analysis post.

use serde_json::json;

use inkflow_llm::{GenerationFailure, GenerationOutput, GenerationRequest, Operation, RcaDraft, Source};
use inkflow_types::Result;

use crate::gate::GateStatus;
use crate::graph::Graph;
use crate::node::{FnNode, Node};
use crate::sink::unique_id;
use crate::state::PipelineState;

use super::common::{self, required, verdict, DRAFT, REVIEW_GATE, SOURCE, TOPIC};
use super::sourced::{self, SourcedWiring};
use super::Services;

pub const NAME: &str = "rca";

pub fn initial_state(params: &serde_json::Value) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    common::outcome_initial(&mut map);
    common::source_initial(&mut map, params)?;
    common::slot_initial(&mut map, DRAFT);
    Ok(serde_json::Value::Object(map))
}

fn request(state: &PipelineState, node: &str) -> Result<GenerationRequest> {
    Ok(GenerationRequest::RcaBlog {
        source: required(state, SOURCE, node)?,
    })
}

fn read(output: GenerationOutput) -> std::result::Result<serde_json::Value, GenerationFailure> {
    common::result_json(Operation::RcaBlog, output.into_rca_draft()?)
}

fn review_node(min_chars: usize) -> impl Node {
    FnNode::new(move |state: &PipelineState| {
        let Some(draft) = state.get_as::<RcaDraft>(DRAFT.output)? else {
            return Ok(verdict(GateStatus::Error, REVIEW_GATE, Some("no RCA draft to review".into())));
        };
        let length = draft.body.trim().chars().count();
        let reason = if length < min_chars {
            Some(format!("RCA body has {length} characters, need at least {min_chars}"))
        } else if draft.root_cause.trim().is_empty() {
            Some("RCA names no root cause".to_string())
        } else if draft.lessons.iter().all(|l| l.trim().is_empty()) {
            Some("RCA lists no lessons learned".to_string())
        } else {
            None
        };
        Ok(match reason {
            None => verdict(GateStatus::Approved, REVIEW_GATE, None),
            Some(reason) => verdict(GateStatus::Skip, REVIEW_GATE, Some(reason)),
        })
    })
}

fn payload(state: &PipelineState, node: &str) -> Result<(String, serde_json::Value)> {
    let draft: RcaDraft = required(state, DRAFT.output, node)?;
    let incident: Source = required(state, SOURCE, node)?;
    let id = unique_id(&draft.title);
    Ok((
        id,
        json!({
            "topic": state.get_str(TOPIC),
            "title": draft.title,
            "root_cause": draft.root_cause,
            "body": draft.body,
            "lessons": draft.lessons,
            "incident": incident,
        }),
    ))
}

pub fn build(services: &Services) -> Result<Graph> {
    sourced::build(
        SourcedWiring {
            name: NAME,
            find: "find_incident",
            search: Operation::RcaSearch,
            write: "write_rca",
            request,
            read,
            review: "review_rca",
            review_node: review_node(services.settings.min_article_chars),
            kind: "rca",
            payload,
        },
        services,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventEmitter;
    use crate::node::NodeContext;
    use crate::state::Delta;

    fn state_with(draft: serde_json::Value) -> PipelineState {
        let schema = sourced::schema();
        let state = schema
            .init(initial_state(&json!({"topic": "dns"})).unwrap())
            .unwrap();
        schema
            .merge(&state, &Delta::new().with(DRAFT.output, draft))
            .unwrap()
    }

    #[tokio::test]
    async fn review_requires_body_cause_and_lessons() {
        let ctx = NodeContext::new("r1", "review_rca", EventEmitter::default());
        let gate = |delta: Delta| delta.get(REVIEW_GATE).cloned().unwrap();

        let good = json!({"title": "t", "root_cause": "TTL", "body": "x".repeat(30), "lessons": ["Lower TTLs gradually"]});
        let delta = review_node(20).run(&state_with(good), &ctx).await.unwrap();
        assert_eq!(gate(delta), json!("approved"));

        let no_lessons = json!({"title": "t", "root_cause": "TTL", "body": "x".repeat(30), "lessons": []});
        let delta = review_node(20).run(&state_with(no_lessons), &ctx).await.unwrap();
        assert_eq!(gate(delta), json!("skip"));

        let no_cause = json!({"title": "t", "root_cause": " ", "body": "x".repeat(30), "lessons": ["l"]});
        let delta = review_node(20).run(&state_with(no_cause), &ctx).await.unwrap();
        assert_eq!(gate(delta), json!("skip"));

        let delta = review_node(20).run(&state_with(json!(null)), &ctx).await.unwrap();
        assert_eq!(gate(delta), json!("error"));
    }
}
