//! Field names, schema fragments, and the node types shared by the wirings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use inkflow_llm::{
    ContentGenerator, GenerationFailure, GenerationOutput, GenerationRequest, Operation, Source,
};
use inkflow_tools::ReachabilityCheck;
use inkflow_types::{FlowError, Result, RunStatus};

use crate::engine::{REASON_FIELD, STATUS_FIELD};
use crate::gate::GateStatus;
use crate::node::{FnNode, Node, NodeContext};
use crate::sink::ContentSink;
use crate::state::{Delta, PipelineState, StateSchema};

// ---------------------------------------------------------------------------
// Field names
// ---------------------------------------------------------------------------

pub const TOPIC: &str = "topic";
pub const SOURCE: &str = "source";
pub const SOURCE_ATTEMPTS: &str = "source_attempts";
pub const SOURCE_ERRORS: &str = "source_errors";
pub const EXCLUDED_ENTITIES: &str = "excluded_entities";
pub const SOURCE_GATE: &str = "source_gate";
pub const REVIEW_GATE: &str = "review_gate";
pub const PUBLISHED_ID: &str = "published_id";

/// Terminal node names every wiring uses.
pub const PUBLISH: &str = "publish";
pub const SKIP: &str = "skip";
pub const FAIL: &str = "fail";

/// The three fields a generating node owns: its result, its attempt
/// counter, and its append-only error log.
#[derive(Debug, Clone, Copy)]
pub struct Slot {
    pub output: &'static str,
    pub attempts: &'static str,
    pub errors: &'static str,
}

pub const DRAFT: Slot = Slot {
    output: "draft",
    attempts: "draft_attempts",
    errors: "draft_errors",
};

// ---------------------------------------------------------------------------
// Schema fragments
// ---------------------------------------------------------------------------

pub fn outcome_fields(schema: StateSchema) -> StateSchema {
    schema
        .overwrite(STATUS_FIELD)
        .overwrite(REASON_FIELD)
        .overwrite(PUBLISHED_ID)
        .overwrite(REVIEW_GATE)
}

pub fn slot_fields(schema: StateSchema, slot: Slot) -> StateSchema {
    schema
        .overwrite(slot.output)
        .overwrite(slot.attempts)
        .append(slot.errors)
}

pub fn source_fields(schema: StateSchema) -> StateSchema {
    schema
        .overwrite(TOPIC)
        .overwrite(SOURCE)
        .overwrite(SOURCE_ATTEMPTS)
        .append(SOURCE_ERRORS)
        .append(EXCLUDED_ENTITIES)
        .overwrite(SOURCE_GATE)
}

/// Initial values matching [`outcome_fields`].
pub fn outcome_initial(map: &mut serde_json::Map<String, serde_json::Value>) {
    map.insert(STATUS_FIELD.into(), json!(RunStatus::Pending.as_str()));
    map.insert(REASON_FIELD.into(), json!(null));
    map.insert(PUBLISHED_ID.into(), json!(null));
    map.insert(REVIEW_GATE.into(), json!(null));
}

pub fn slot_initial(map: &mut serde_json::Map<String, serde_json::Value>, slot: Slot) {
    map.insert(slot.output.into(), json!(null));
    map.insert(slot.attempts.into(), json!(0));
    map.insert(slot.errors.into(), json!([]));
}

/// Initial values matching [`source_fields`]. `exclude` seeds the
/// exclusion list, e.g. with entities already covered by earlier runs.
pub fn source_initial(
    map: &mut serde_json::Map<String, serde_json::Value>,
    params: &serde_json::Value,
) -> Result<()> {
    map.insert(TOPIC.into(), json!(required_param(params, TOPIC)?));
    map.insert(SOURCE.into(), json!(null));
    map.insert(SOURCE_ATTEMPTS.into(), json!(0));
    map.insert(SOURCE_ERRORS.into(), json!([]));
    map.insert(
        EXCLUDED_ENTITIES.into(),
        json!(string_list_param(params, "exclude")?),
    );
    map.insert(SOURCE_GATE.into(), json!(null));
    Ok(())
}

// ---------------------------------------------------------------------------
// Parameter and state helpers
// ---------------------------------------------------------------------------

pub fn required_param(params: &serde_json::Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FlowError::Config(format!("parameter '{key}' is required")))
}

pub fn string_list_param(params: &serde_json::Value, key: &str) -> Result<Vec<String>> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| FlowError::Config(format!("parameter '{key}': {e}"))),
    }
}

/// A string field that must be present for the node to do its job.
pub fn required_str<'a>(state: &'a PipelineState, field: &str, node: &str) -> Result<&'a str> {
    state
        .get_str(field)
        .ok_or_else(|| FlowError::node(node, format!("state field '{field}' is not set")))
}

/// A typed field that must be present for the node to do its job.
pub fn required<T: serde::de::DeserializeOwned>(
    state: &PipelineState,
    field: &str,
    node: &str,
) -> Result<T> {
    state
        .get_as(field)?
        .ok_or_else(|| FlowError::node(node, format!("state field '{field}' is not set")))
}

pub fn result_json<T: Serialize>(
    operation: Operation,
    value: T,
) -> std::result::Result<serde_json::Value, GenerationFailure> {
    serde_json::to_value(value).map_err(|e| GenerationFailure::malformed(operation, e.to_string()))
}

fn last_error(state: &PipelineState, field: &str) -> Option<String> {
    state
        .get_array(field)
        .last()
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

/// Gate verdict plus, when not approved, the reason.
pub fn verdict(status: GateStatus, gate_field: &str, reason: Option<String>) -> Delta {
    let mut delta = Delta::new().with(gate_field, status);
    if let Some(reason) = reason {
        delta.set(REASON_FIELD, reason);
    }
    delta
}

// ---------------------------------------------------------------------------
// FindSourceNode: source discovery with reachability and exclusion
// ---------------------------------------------------------------------------

/// Asks the generator for a real-world source, then checks that its URL
/// exists. An unreachable source's entity is excluded from later attempts.
pub struct FindSourceNode {
    generator: Arc<dyn ContentGenerator>,
    reachability: Arc<dyn ReachabilityCheck>,
    operation: Operation,
    timeout: Duration,
}

impl FindSourceNode {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        reachability: Arc<dyn ReachabilityCheck>,
        operation: Operation,
        timeout: Duration,
    ) -> Self {
        Self {
            generator,
            reachability,
            operation,
            timeout,
        }
    }

    fn request(&self, topic: String, exclude: Vec<String>) -> GenerationRequest {
        match self.operation {
            Operation::RcaSearch => GenerationRequest::RcaSearch { topic, exclude },
            _ => GenerationRequest::RealWorldCase { topic, exclude },
        }
    }
}

#[async_trait]
impl Node for FindSourceNode {
    async fn run(&self, state: &PipelineState, ctx: &NodeContext) -> Result<Delta> {
        let attempt = state.get_u64(SOURCE_ATTEMPTS).unwrap_or(0) + 1;
        let topic = required_str(state, TOPIC, ctx.node())?.to_string();
        let mut seen = std::collections::BTreeSet::new();
        let mut excluded = state.get_strings(EXCLUDED_ENTITIES);
        excluded.retain(|e| seen.insert(e.trim().to_lowercase()));

        let mut delta = Delta::new()
            .with(SOURCE_ATTEMPTS, attempt)
            .with(SOURCE, serde_json::Value::Null);

        let request = self.request(topic, excluded.clone());
        let source: Source = match self
            .generator
            .generate(&request)
            .await
            .and_then(|out| out.into_source(self.operation))
        {
            Ok(source) => source,
            Err(failure) => {
                tracing::warn!(node = %ctx.node(), attempt, error = %failure, "Source generation failed");
                ctx.note("source generation failed", json!({ "attempt": attempt, "error": failure.to_string() }));
                delta.set(SOURCE_ERRORS, json!([format!("attempt {attempt}: {failure}")]));
                return Ok(delta);
            }
        };

        if excluded
            .iter()
            .any(|e| e.eq_ignore_ascii_case(source.entity.trim()))
        {
            ctx.note("generator proposed an excluded entity", json!({ "attempt": attempt, "entity": source.entity }));
            delta.set(
                SOURCE_ERRORS,
                json!([format!("attempt {attempt}: {} was already excluded", source.entity)]),
            );
            return Ok(delta);
        }

        if self.reachability.is_reachable(&source.url, self.timeout).await {
            tracing::info!(node = %ctx.node(), attempt, entity = %source.entity, url = %source.url, "Source found");
            delta.set_json(SOURCE, &source)?;
        } else {
            tracing::warn!(node = %ctx.node(), attempt, entity = %source.entity, url = %source.url, "Source unreachable, excluding entity");
            ctx.note(
                "source unreachable, entity excluded",
                json!({ "attempt": attempt, "entity": source.entity, "url": source.url }),
            );
            delta.set(EXCLUDED_ENTITIES, json!([source.entity]));
            delta.set(
                SOURCE_ERRORS,
                json!([format!(
                    "attempt {attempt}: {} ({}) is not reachable",
                    source.url, source.entity
                )]),
            );
        }
        Ok(delta)
    }
}

/// Terminal skip after source discovery used its whole budget.
///
/// The excluded entities stay in the state for the caller; nothing marks
/// them as used, so a later run may consider them again.
pub fn source_exhausted_node() -> impl Node {
    FnNode::new(|state: &PipelineState| {
        let attempts = state.get_u64(SOURCE_ATTEMPTS).unwrap_or(0);
        let excluded = state.get_strings(EXCLUDED_ENTITIES);
        let excluded = if excluded.is_empty() {
            "none".to_string()
        } else {
            excluded.join(", ")
        };
        let mut reason =
            format!("no reachable source found after {attempts} attempts (excluded: {excluded})");
        if let Some(last) = last_error(state, SOURCE_ERRORS) {
            reason.push_str(&format!("; last error: {last}"));
        }
        Ok(Delta::new()
            .with(STATUS_FIELD, RunStatus::Skipped.as_str())
            .with(REASON_FIELD, reason))
    })
}

/// Pure gate on the discovered source.
pub fn assess_source_node(min_summary_chars: usize) -> impl Node {
    FnNode::new(move |state: &PipelineState| {
        let Some(source) = state.get_as::<Source>(SOURCE)? else {
            return Ok(verdict(
                GateStatus::Error,
                SOURCE_GATE,
                Some("no source to assess".into()),
            ));
        };
        let url = source.url.trim();
        let reason = if !(url.starts_with("https://") || url.starts_with("http://")) {
            Some(format!("source URL '{url}' is not an http(s) link"))
        } else if source.summary.trim().chars().count() < min_summary_chars {
            Some(format!(
                "source summary for {} is shorter than {min_summary_chars} characters",
                source.entity
            ))
        } else {
            None
        };
        Ok(match reason {
            None => verdict(GateStatus::Approved, SOURCE_GATE, None),
            Some(reason) => verdict(GateStatus::Skip, SOURCE_GATE, Some(reason)),
        })
    })
}

// ---------------------------------------------------------------------------
// GenerateNode: one generator call per invocation, result or error marker
// ---------------------------------------------------------------------------

pub type RequestBuilder = fn(&PipelineState, &str) -> Result<GenerationRequest>;
pub type ResultReader =
    fn(GenerationOutput) -> std::result::Result<serde_json::Value, GenerationFailure>;

/// A generating node: bumps its attempt counter and writes either the
/// decoded result or an error entry. Pair it with an `AttemptPolicy` router.
pub struct GenerateNode {
    generator: Arc<dyn ContentGenerator>,
    slot: Slot,
    request: RequestBuilder,
    read: ResultReader,
}

impl GenerateNode {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        slot: Slot,
        request: RequestBuilder,
        read: ResultReader,
    ) -> Self {
        Self {
            generator,
            slot,
            request,
            read,
        }
    }
}

#[async_trait]
impl Node for GenerateNode {
    async fn run(&self, state: &PipelineState, ctx: &NodeContext) -> Result<Delta> {
        let attempt = state.get_u64(self.slot.attempts).unwrap_or(0) + 1;
        let request = (self.request)(state, ctx.node())?;
        let operation = request.operation();

        let mut delta = Delta::new().with(self.slot.attempts, attempt);
        match self.generator.generate(&request).await.and_then(self.read) {
            Ok(value) => {
                tracing::info!(node = %ctx.node(), operation = %operation, attempt, "Generation succeeded");
                delta.set(self.slot.output, value);
            }
            Err(failure) => {
                tracing::warn!(node = %ctx.node(), operation = %operation, attempt, error = %failure, "Generation failed");
                ctx.note(
                    "generation failed",
                    json!({ "operation": operation.as_str(), "attempt": attempt, "error": failure.to_string() }),
                );
                delta.set(self.slot.output, serde_json::Value::Null);
                delta.set(self.slot.errors, json!([format!("attempt {attempt}: {failure}")]));
            }
        }
        Ok(delta)
    }
}

// ---------------------------------------------------------------------------
// Terminal nodes
// ---------------------------------------------------------------------------

/// Ends the run as skipped. Keeps the reason a gate already wrote.
pub fn skip_node() -> impl Node {
    FnNode::new(|state: &PipelineState| {
        let mut delta = Delta::new().with(STATUS_FIELD, RunStatus::Skipped.as_str());
        if !state.is_set(REASON_FIELD) {
            delta.set(REASON_FIELD, "rejected by validation");
        }
        Ok(delta)
    })
}

/// Ends the run as an error. Keeps a gate's reason, otherwise explains the
/// exhausted generation budget of `slot`.
pub fn fail_node(slot: Slot) -> impl Node {
    FnNode::new(move |state: &PipelineState| {
        let mut delta = Delta::new().with(STATUS_FIELD, RunStatus::Error.as_str());
        if !state.is_set(REASON_FIELD) {
            let attempts = state.get_u64(slot.attempts).unwrap_or(0);
            let last = last_error(state, slot.errors).unwrap_or_else(|| "no error recorded".into());
            delta.set(
                REASON_FIELD,
                format!("{} generation failed after {attempts} attempts: {last}", slot.output),
            );
        }
        Ok(delta)
    })
}

pub type PayloadBuilder = fn(&PipelineState, &str) -> Result<(String, serde_json::Value)>;

/// Hands the finished content to the sink and marks the run completed.
pub struct PublishNode {
    sink: Arc<dyn ContentSink>,
    kind: &'static str,
    payload: PayloadBuilder,
}

impl PublishNode {
    pub fn new(sink: Arc<dyn ContentSink>, kind: &'static str, payload: PayloadBuilder) -> Self {
        Self { sink, kind, payload }
    }
}

#[async_trait]
impl Node for PublishNode {
    async fn run(&self, state: &PipelineState, ctx: &NodeContext) -> Result<Delta> {
        let (id, mut payload) = (self.payload)(state, ctx.node())?;
        if let serde_json::Value::Object(map) = &mut payload {
            map.insert("kind".into(), json!(self.kind));
            map.insert("run_id".into(), json!(ctx.run_id()));
            map.insert("generated_at".into(), json!(chrono::Utc::now().to_rfc3339()));
        }
        self.sink.save(self.kind, &id, &payload).await?;
        ctx.note("content published", json!({ "kind": self.kind, "id": id }));
        Ok(Delta::new()
            .with(STATUS_FIELD, RunStatus::Completed.as_str())
            .with(REASON_FIELD, serde_json::Value::Null)
            .with(PUBLISHED_ID, id))
    }
}
