//! The `ContentGenerator` trait and `LlmGenerator`, its HTTP implementation.
//!
//! `LlmGenerator` sends one prompt per request to a messages API, pulls the
//! JSON object out of the reply, and decodes it into the operation's
//! result type. Transport, status, and decode failures all surface as a
//! [`GenerationFailure`] tagged with the operation.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use crate::{FailureKind, GenerationFailure, GenerationOutput, GenerationRequest, Operation};

// ---------------------------------------------------------------------------
// ContentGenerator
// ---------------------------------------------------------------------------

/// Narrow interface to an external, unreliable content generator.
///
/// Implementations must not be assumed idempotent: identical requests may
/// yield different results, and any call may fail transiently.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerationFailure>;
}

// ---------------------------------------------------------------------------
// GeneratorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl GeneratorConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    pub const DEFAULT_MODEL: &'static str = "claude-sonnet-4-5-20250929";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }

    /// Read `INKFLOW_API_KEY` (required), `INKFLOW_BASE_URL` and
    /// `INKFLOW_MODEL` (optional).
    pub fn from_env() -> inkflow_types::Result<Self> {
        let key = std::env::var("INKFLOW_API_KEY").map_err(|_| {
            inkflow_types::FlowError::Config("INKFLOW_API_KEY is not set".into())
        })?;
        let mut config = Self::new(key);
        if let Ok(url) = std::env::var("INKFLOW_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("INKFLOW_MODEL") {
            config.model = model;
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// LlmGenerator: messages-API backed generator
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct LlmGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl LlmGenerator {
    pub fn new(config: GeneratorConfig) -> inkflow_types::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| inkflow_types::FlowError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }
}

const SYSTEM_PROMPT: &str = "You generate structured content for a publishing pipeline. \
Answer with exactly one JSON object matching the requested shape and nothing else.";

/// Instruction and expected JSON shape for each operation.
fn instructions(operation: Operation) -> (&'static str, &'static str) {
    match operation {
        Operation::RealWorldCase => (
            "Find a real, publicly documented engineering case study on the topic. \
             Do not propose any organization listed in `exclude`.",
            r#"{"entity": string, "title": string, "url": string, "summary": string}"#,
        ),
        Operation::RcaSearch => (
            "Find a real, publicly documented incident postmortem on the topic. \
             Do not propose any organization listed in `exclude`.",
            r#"{"entity": string, "title": string, "url": string, "summary": string}"#,
        ),
        Operation::Blog => (
            "Write a technical blog post on the topic grounded in the given source.",
            r#"{"title": string, "body": markdown string, "tags": [string]}"#,
        ),
        Operation::LinkedinStory => (
            "Write a short LinkedIn story on the topic grounded in the given source.",
            r#"{"hook": string, "body": string, "hashtags": [string]}"#,
        ),
        Operation::RcaBlog => (
            "Write a root-cause-analysis blog post about the given incident.",
            r#"{"title": string, "root_cause": string, "body": markdown string, "lessons": [string]}"#,
        ),
        Operation::CertificationQuestion => (
            "Write one multiple-choice exam question for the certification.",
            r#"{"question": string, "options": [string], "answer_index": integer, "explanation": string}"#,
        ),
        Operation::CodingChallenge => (
            "Write a coding challenge with a Python reference solution defining the \
             entry point function, and test cases whose input is the argument list.",
            r#"{"title": string, "description": string, "entry_point": string, "reference_solution": string, "test_cases": [{"id": string, "input": [any], "expected_output": any}]}"#,
        ),
    }
}

fn build_prompt(request: &GenerationRequest) -> String {
    let (task, shape) = instructions(request.operation());
    format!(
        "{task}\n\nParameters:\n{}\n\nRespond with JSON of this shape:\n{shape}",
        serde_json::to_string_pretty(&request.params()).unwrap_or_default()
    )
}

fn fenced_json() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```").expect("static regex is valid")
    })
}

/// Pull the JSON object out of a model reply, tolerating code fences and
/// surrounding prose.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    if let Some(caps) = fenced_json().captures(text) {
        if let Ok(v) = serde_json::from_str(&caps[1]) {
            return Some(v);
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn reply_text(body: &serde_json::Value) -> String {
    body["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|b| b["type"] == "text")
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[async_trait]
impl ContentGenerator for LlmGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerationFailure> {
        let operation = request.operation();
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": build_prompt(request) }],
        });

        tracing::info!(operation = %operation, model = %self.config.model, "Generation request");

        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationFailure::from_reqwest(operation, &e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationFailure::from_reqwest(operation, &e))?;
        if !status.is_success() {
            return Err(GenerationFailure::new(
                operation,
                FailureKind::Provider,
                format!("HTTP {}: {}", status.as_u16(), text),
            ));
        }

        let envelope: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| GenerationFailure::malformed(operation, format!("response body: {e}")))?;
        let reply = reply_text(&envelope);
        let raw = extract_json(&reply).ok_or_else(|| {
            GenerationFailure::malformed(operation, "reply contains no JSON object")
        })?;

        let output = GenerationOutput::decode(operation, raw)?;
        tracing::debug!(operation = %operation, "Generation succeeded");
        Ok(output)
    }
}
