//! Blog post pipeline: a real-world case study turned into a long-form post.

use serde_json::json;

use inkflow_llm::{BlogDraft, GenerationOutput, GenerationRequest, Operation, Source};
use inkflow_types::Result;

use crate::gate::GateStatus;
use crate::graph::Graph;
use crate::node::{FnNode, Node};
use crate::sink::unique_id;
use crate::state::PipelineState;

use super::common::{self, required, required_str, verdict, DRAFT, REVIEW_GATE, SOURCE, TOPIC};
use super::sourced::{self, SourcedWiring};
use super::Services;

pub const NAME: &str = "blog";

pub fn initial_state(params: &serde_json::Value) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    common::outcome_initial(&mut map);
    common::source_initial(&mut map, params)?;
    common::slot_initial(&mut map, DRAFT);
    Ok(serde_json::Value::Object(map))
}

fn request(state: &PipelineState, node: &str) -> Result<GenerationRequest> {
    Ok(GenerationRequest::Blog {
        topic: required_str(state, TOPIC, node)?.to_string(),
        source: required(state, SOURCE, node)?,
    })
}

fn read(output: GenerationOutput) -> std::result::Result<serde_json::Value, inkflow_llm::GenerationFailure> {
    common::result_json(Operation::Blog, output.into_blog()?)
}

/// Long enough, and actually about the source it was written from.
fn review_node(min_chars: usize) -> impl Node {
    FnNode::new(move |state: &PipelineState| {
        let Some(draft) = state.get_as::<BlogDraft>(DRAFT.output)? else {
            return Ok(verdict(GateStatus::Error, REVIEW_GATE, Some("no draft to review".into())));
        };
        let source: Option<Source> = state.get_as(SOURCE)?;
        let length = draft.body.trim().chars().count();

        let reason = if length < min_chars {
            Some(format!("blog body has {length} characters, need at least {min_chars}"))
        } else if let Some(source) = source.filter(|s| {
            !draft
                .body
                .to_lowercase()
                .contains(&s.entity.trim().to_lowercase())
        }) {
            Some(format!("blog body never mentions {}", source.entity))
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
    let draft: BlogDraft = required(state, DRAFT.output, node)?;
    let source: Source = required(state, SOURCE, node)?;
    let id = unique_id(&draft.title);
    Ok((
        id,
        json!({
            "topic": state.get_str(TOPIC),
            "title": draft.title,
            "body": draft.body,
            "tags": draft.tags,
            "source": source,
        }),
    ))
}

pub fn build(services: &Services) -> Result<Graph> {
    sourced::build(
        SourcedWiring {
            name: NAME,
            find: "find_source",
            search: Operation::RealWorldCase,
            write: "write_blog",
            request,
            read,
            review: "review_blog",
            review_node: review_node(services.settings.min_article_chars),
            kind: "blog",
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
        let initial = initial_state(&json!({"topic": "caching"})).unwrap();
        let state = schema.init(initial).unwrap();
        schema
            .merge(
                &state,
                &Delta::new()
                    .with(
                        SOURCE,
                        json!({"entity": "Acme", "title": "t", "url": "https://acme.example", "summary": "s"}),
                    )
                    .with(DRAFT.output, draft),
            )
            .unwrap()
    }

    async fn review(state: &PipelineState) -> Delta {
        let ctx = NodeContext::new("r1", "review_blog", EventEmitter::default());
        review_node(50).run(state, &ctx).await.unwrap()
    }

    #[tokio::test]
    async fn review_approves_long_grounded_draft() {
        let body = format!("How Acme cut latency. {}", "Details. ".repeat(10));
        let delta = review(&state_with(json!({"title": "T", "body": body, "tags": []}))).await;
        assert_eq!(delta.get(REVIEW_GATE), Some(&json!("approved")));
    }

    #[tokio::test]
    async fn review_skips_short_or_ungrounded_draft() {
        let delta = review(&state_with(json!({"title": "T", "body": "Acme.", "tags": []}))).await;
        assert_eq!(delta.get(REVIEW_GATE), Some(&json!("skip")));

        let body = "Generic advice. ".repeat(10);
        let delta = review(&state_with(json!({"title": "T", "body": body, "tags": []}))).await;
        assert_eq!(delta.get(REVIEW_GATE), Some(&json!("skip")));
        assert!(delta
            .get(crate::engine::REASON_FIELD)
            .and_then(|r| r.as_str())
            .unwrap()
            .contains("Acme"));
    }

    #[test]
    fn initial_state_requires_topic() {
        assert!(initial_state(&json!({})).is_err());
        let state = sourced::schema()
            .init(initial_state(&json!({"topic": "queues", "exclude": ["Acme"]})).unwrap())
            .unwrap();
        assert_eq!(state.get_strings(common::EXCLUDED_ENTITIES), vec!["Acme"]);
    }

    #[test]
    fn payload_uses_title_slug() {
        let state = state_with(json!({"title": "How Acme Scaled", "body": "b", "tags": ["x"]}));
        let (id, payload) = payload(&state, "publish").unwrap();
        assert!(id.starts_with("how-acme-scaled-"), "{id}");
        assert_eq!(payload["source"]["entity"], "Acme");
        assert_eq!(payload["tags"], json!(["x"]));
    }
}
