//! Wiring shared by the pipelines that start from a real-world source:
//!
//! ```text
//! find → (retry with exclusion | exhausted) → assess_source
//!      → write → (retry | fail) → review → publish | skip | fail
//! ```

use inkflow_llm::Operation;
use inkflow_types::Result;

use crate::gate::{route_on_gate, AttemptPolicy};
use crate::graph::{Graph, GraphBuilder, END, START};
use crate::node::Node;

use super::common::{
    assess_source_node, fail_node, outcome_fields, skip_node, slot_fields, source_exhausted_node,
    source_fields, FindSourceNode, GenerateNode, PayloadBuilder, PublishNode, RequestBuilder,
    ResultReader, DRAFT, FAIL, PUBLISH, REVIEW_GATE, SKIP, SOURCE, SOURCE_ATTEMPTS, SOURCE_GATE,
};
use super::Services;
use crate::state::StateSchema;

pub const ASSESS_SOURCE: &str = "assess_source";
pub const SOURCE_EXHAUSTED: &str = "source_exhausted";

/// The parts that differ between the sourced pipelines.
pub struct SourcedWiring<R> {
    pub name: &'static str,
    /// Name of the discovery node.
    pub find: &'static str,
    pub search: Operation,
    /// Name of the drafting node.
    pub write: &'static str,
    pub request: RequestBuilder,
    pub read: ResultReader,
    /// Name of the review gate.
    pub review: &'static str,
    pub review_node: R,
    pub kind: &'static str,
    pub payload: PayloadBuilder,
}

pub fn schema() -> StateSchema {
    slot_fields(source_fields(outcome_fields(StateSchema::new())), DRAFT)
}

pub fn build<R: Node + 'static>(wiring: SourcedWiring<R>, services: &Services) -> Result<Graph> {
    let settings = &services.settings;
    let source_policy = AttemptPolicy::new(SOURCE_ATTEMPTS, settings.max_attempts);
    let draft_policy = AttemptPolicy::new(DRAFT.attempts, settings.max_attempts);
    let SourcedWiring {
        name,
        find,
        search,
        write,
        request,
        read,
        review,
        review_node,
        kind,
        payload,
    } = wiring;

    GraphBuilder::new(name, schema())
        .add_node(
            find,
            FindSourceNode::new(
                services.generator.clone(),
                services.reachability.clone(),
                search,
                settings.reachability_timeout,
            ),
        )
        .add_node(SOURCE_EXHAUSTED, source_exhausted_node())
        .add_node(ASSESS_SOURCE, assess_source_node(settings.min_summary_chars))
        .add_node(
            write,
            GenerateNode::new(services.generator.clone(), DRAFT, request, read),
        )
        .add_node(review, review_node)
        .add_node(PUBLISH, PublishNode::new(services.sink.clone(), kind, payload))
        .add_node(SKIP, skip_node())
        .add_node(FAIL, fail_node(DRAFT))
        .add_edge(START, find)
        .add_conditional_edges(find, &[ASSESS_SOURCE, find, SOURCE_EXHAUSTED], move |s| {
            source_policy.route(s, s.is_set(SOURCE), ASSESS_SOURCE, find, SOURCE_EXHAUSTED)
        })
        .add_edge(SOURCE_EXHAUSTED, END)
        .add_conditional_edges(ASSESS_SOURCE, &[write, SKIP, FAIL], move |s| {
            route_on_gate(s, SOURCE_GATE, write, SKIP, FAIL)
        })
        .add_conditional_edges(write, &[review, write, FAIL], move |s| {
            draft_policy.route(s, s.is_set(DRAFT.output), review, write, FAIL)
        })
        .add_conditional_edges(review, &[PUBLISH, SKIP, FAIL], |s| {
            route_on_gate(s, REVIEW_GATE, PUBLISH, SKIP, FAIL)
        })
        .add_edge(PUBLISH, END)
        .add_edge(SKIP, END)
        .add_edge(FAIL, END)
        .build()
}
