//! LinkedIn story pipeline: a short post built on a real-world case study.

use serde_json::json;

use inkflow_llm::{GenerationFailure, GenerationOutput, GenerationRequest, LinkedinStory, Operation, Source};
use inkflow_types::Result;

use crate::gate::GateStatus;
use crate::graph::Graph;
use crate::node::{FnNode, Node};
use crate::sink::unique_id;
use crate::state::PipelineState;

use super::common::{self, required, required_str, verdict, DRAFT, REVIEW_GATE, SOURCE, TOPIC};
use super::sourced::{self, SourcedWiring};
use super::Services;

pub const NAME: &str = "linkedin";

/// Hard limit on a LinkedIn post, hook included.
const MAX_POST_CHARS: usize = 3000;
const MAX_HASHTAGS: usize = 5;

pub fn initial_state(params: &serde_json::Value) -> Result<serde_json::Value> {
    let mut map = serde_json::Map::new();
    common::outcome_initial(&mut map);
    common::source_initial(&mut map, params)?;
    common::slot_initial(&mut map, DRAFT);
    Ok(serde_json::Value::Object(map))
}

fn request(state: &PipelineState, node: &str) -> Result<GenerationRequest> {
    Ok(GenerationRequest::LinkedinStory {
        topic: required_str(state, TOPIC, node)?.to_string(),
        source: required(state, SOURCE, node)?,
    })
}

fn read(output: GenerationOutput) -> std::result::Result<serde_json::Value, GenerationFailure> {
    common::result_json(Operation::LinkedinStory, output.into_linkedin_story()?)
}

fn review_node(min_chars: usize) -> impl Node {
    FnNode::new(move |state: &PipelineState| {
        let Some(story) = state.get_as::<LinkedinStory>(DRAFT.output)? else {
            return Ok(verdict(GateStatus::Error, REVIEW_GATE, Some("no story to review".into())));
        };
        let length = story.hook.chars().count() + story.body.chars().count();
        let reason = if story.hook.trim().is_empty() {
            Some("story has no hook".to_string())
        } else if story.body.trim().chars().count() < min_chars {
            Some(format!("story body is shorter than {min_chars} characters"))
        } else if length > MAX_POST_CHARS {
            Some(format!("story has {length} characters, LinkedIn allows {MAX_POST_CHARS}"))
        } else if story.hashtags.len() > MAX_HASHTAGS {
            Some(format!("story has {} hashtags, at most {MAX_HASHTAGS} allowed", story.hashtags.len()))
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
    let story: LinkedinStory = required(state, DRAFT.output, node)?;
    let source: Source = required(state, SOURCE, node)?;
    let id = unique_id(&format!("{} {}", source.entity, story.hook));
    let hashtags: Vec<String> = story
        .hashtags
        .iter()
        .map(|t| format!("#{}", t.trim_start_matches('#')))
        .collect();
    let text = format!("{}\n\n{}\n\n{}", story.hook.trim(), story.body.trim(), hashtags.join(" "));
    Ok((
        id,
        json!({
            "topic": state.get_str(TOPIC),
            "hook": story.hook,
            "body": story.body,
            "hashtags": hashtags,
            "text": text.trim_end(),
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
            write: "write_story",
            request,
            read,
            review: "review_story",
            review_node: review_node(services.settings.min_story_chars),
            kind: "linkedin",
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

    fn state_with(story: serde_json::Value) -> PipelineState {
        let schema = sourced::schema();
        let state = schema
            .init(initial_state(&json!({"topic": "on-call"})).unwrap())
            .unwrap();
        schema
            .merge(
                &state,
                &Delta::new()
                    .with(
                        SOURCE,
                        json!({"entity": "Acme", "title": "t", "url": "https://acme.example", "summary": "s"}),
                    )
                    .with(DRAFT.output, story),
            )
            .unwrap()
    }

    async fn review(state: &PipelineState) -> serde_json::Value {
        let ctx = NodeContext::new("r1", "review_story", EventEmitter::default());
        let delta = review_node(20).run(state, &ctx).await.unwrap();
        delta.get(REVIEW_GATE).cloned().unwrap()
    }

    #[tokio::test]
    async fn review_enforces_length_and_hashtag_limits() {
        let ok = json!({"hook": "Pager fatigue is real.", "body": "b".repeat(40), "hashtags": ["sre"]});
        assert_eq!(review(&state_with(ok)).await, json!("approved"));

        let short = json!({"hook": "h", "body": "tiny", "hashtags": []});
        assert_eq!(review(&state_with(short)).await, json!("skip"));

        let long = json!({"hook": "h", "body": "b".repeat(MAX_POST_CHARS), "hashtags": []});
        assert_eq!(review(&state_with(long)).await, json!("skip"));

        let tags = json!({"hook": "h", "body": "b".repeat(40), "hashtags": ["a", "b", "c", "d", "e", "f"]});
        assert_eq!(review(&state_with(tags)).await, json!("skip"));
    }

    #[test]
    fn payload_normalizes_hashtags() {
        let state = state_with(json!({"hook": "Hook", "body": "Body", "hashtags": ["#sre", "oncall"]}));
        let (id, payload) = payload(&state, "publish").unwrap();
        assert!(id.starts_with("acme-hook-"), "{id}");
        assert_eq!(payload["hashtags"], json!(["#sre", "#oncall"]));
        assert_eq!(payload["text"], "Hook\n\nBody\n\n#sre #oncall");
    }
}
