//! Typed request and result shapes for every generator operation.
//!
//! Each operation has exactly one result type. Raw JSON from the backend is
//! decoded into that type (shape check) and then checked for empty required
//! content (completeness check), so nodes never probe for fields themselves.

use serde::{Deserialize, Serialize};

use inkflow_types::TestCase;

use crate::failure::GenerationFailure;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "realWorldCase")]
    RealWorldCase,
    #[serde(rename = "blog")]
    Blog,
    #[serde(rename = "linkedinStory")]
    LinkedinStory,
    #[serde(rename = "coding-challenge")]
    CodingChallenge,
    #[serde(rename = "rcaSearch")]
    RcaSearch,
    #[serde(rename = "rcaBlog")]
    RcaBlog,
    #[serde(rename = "certification-question")]
    CertificationQuestion,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Operation::RealWorldCase,
        Operation::Blog,
        Operation::LinkedinStory,
        Operation::CodingChallenge,
        Operation::RcaSearch,
        Operation::RcaBlog,
        Operation::CertificationQuestion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::RealWorldCase => "realWorldCase",
            Operation::Blog => "blog",
            Operation::LinkedinStory => "linkedinStory",
            Operation::CodingChallenge => "coding-challenge",
            Operation::RcaSearch => "rcaSearch",
            Operation::RcaBlog => "rcaBlog",
            Operation::CertificationQuestion => "certification-question",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A generator call: the operation and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "params")]
pub enum GenerationRequest {
    #[serde(rename = "realWorldCase")]
    RealWorldCase {
        topic: String,
        /// Entities that must not be proposed again.
        exclude: Vec<String>,
    },
    #[serde(rename = "blog")]
    Blog { topic: String, source: Source },
    #[serde(rename = "linkedinStory")]
    LinkedinStory { topic: String, source: Source },
    #[serde(rename = "coding-challenge")]
    CodingChallenge { topic: String, difficulty: String },
    #[serde(rename = "rcaSearch")]
    RcaSearch { topic: String, exclude: Vec<String> },
    #[serde(rename = "rcaBlog")]
    RcaBlog { source: Source },
    #[serde(rename = "certification-question")]
    CertificationQuestion {
        certification: String,
        channel: String,
    },
}

impl GenerationRequest {
    pub fn operation(&self) -> Operation {
        match self {
            GenerationRequest::RealWorldCase { .. } => Operation::RealWorldCase,
            GenerationRequest::Blog { .. } => Operation::Blog,
            GenerationRequest::LinkedinStory { .. } => Operation::LinkedinStory,
            GenerationRequest::CodingChallenge { .. } => Operation::CodingChallenge,
            GenerationRequest::RcaSearch { .. } => Operation::RcaSearch,
            GenerationRequest::RcaBlog { .. } => Operation::RcaBlog,
            GenerationRequest::CertificationQuestion { .. } => Operation::CertificationQuestion,
        }
    }

    /// The parameters alone, as sent to the backend.
    pub fn params(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("params").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Result shapes
// ---------------------------------------------------------------------------

/// A real-world source (case study, postmortem, incident report).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// The organization the source is about; used for exclusion on retry.
    pub entity: String,
    pub title: String,
    pub url: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlogDraft {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedinStory {
    pub hook: String,
    pub body: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcaDraft {
    pub title: String,
    pub root_cause: String,
    pub body: String,
    #[serde(default)]
    pub lessons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub answer_index: usize,
    pub explanation: String,
}

/// A test case as the generator states it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedTestCase {
    #[serde(default)]
    pub id: Option<String>,
    pub input: serde_json::Value,
    pub expected_output: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingChallenge {
    pub title: String,
    pub description: String,
    pub entry_point: String,
    pub reference_solution: String,
    pub test_cases: Vec<GeneratedTestCase>,
}

impl CodingChallenge {
    /// Convert the generator's test cases into unverified [`TestCase`]s.
    ///
    /// String expectations are kept verbatim; anything else is stored as
    /// its JSON text. Missing ids become `case-<n>` (1-based).
    pub fn test_cases(&self) -> Vec<TestCase> {
        self.test_cases
            .iter()
            .enumerate()
            .map(|(i, tc)| {
                let expected = match &tc.expected_output {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let id = tc
                    .id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("case-{}", i + 1));
                TestCase::new(id, tc.input.clone(), expected)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Completeness checks
// ---------------------------------------------------------------------------

trait Complete {
    /// Names of required fields that are empty.
    fn missing(&self) -> Vec<&'static str>;
}

fn blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn collect(checks: &[(&'static str, bool)]) -> Vec<&'static str> {
    checks
        .iter()
        .filter(|(_, is_missing)| *is_missing)
        .map(|(name, _)| *name)
        .collect()
}

impl Complete for Source {
    fn missing(&self) -> Vec<&'static str> {
        collect(&[
            ("entity", blank(&self.entity)),
            ("title", blank(&self.title)),
            ("url", blank(&self.url)),
            ("summary", blank(&self.summary)),
        ])
    }
}

impl Complete for BlogDraft {
    fn missing(&self) -> Vec<&'static str> {
        collect(&[("title", blank(&self.title)), ("body", blank(&self.body))])
    }
}

impl Complete for LinkedinStory {
    fn missing(&self) -> Vec<&'static str> {
        collect(&[("hook", blank(&self.hook)), ("body", blank(&self.body))])
    }
}

impl Complete for RcaDraft {
    fn missing(&self) -> Vec<&'static str> {
        collect(&[
            ("title", blank(&self.title)),
            ("root_cause", blank(&self.root_cause)),
            ("body", blank(&self.body)),
        ])
    }
}

impl Complete for CertificationQuestion {
    fn missing(&self) -> Vec<&'static str> {
        collect(&[
            ("question", blank(&self.question)),
            ("options", self.options.is_empty()),
            ("explanation", blank(&self.explanation)),
        ])
    }
}

impl Complete for CodingChallenge {
    fn missing(&self) -> Vec<&'static str> {
        collect(&[
            ("title", blank(&self.title)),
            ("entry_point", blank(&self.entry_point)),
            ("reference_solution", blank(&self.reference_solution)),
            ("test_cases", self.test_cases.is_empty()),
        ])
    }
}

// ---------------------------------------------------------------------------
// GenerationOutput
// ---------------------------------------------------------------------------

/// A validated generator result, tagged by operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "result")]
pub enum GenerationOutput {
    #[serde(rename = "realWorldCase")]
    RealWorldCase(Source),
    #[serde(rename = "blog")]
    Blog(BlogDraft),
    #[serde(rename = "linkedinStory")]
    LinkedinStory(LinkedinStory),
    #[serde(rename = "coding-challenge")]
    CodingChallenge(CodingChallenge),
    #[serde(rename = "rcaSearch")]
    RcaSearch(Source),
    #[serde(rename = "rcaBlog")]
    RcaBlog(RcaDraft),
    #[serde(rename = "certification-question")]
    CertificationQuestion(CertificationQuestion),
}

fn decode_as<T>(operation: Operation, raw: serde_json::Value) -> Result<T, GenerationFailure>
where
    T: serde::de::DeserializeOwned + Complete,
{
    let value: T = serde_json::from_value(raw)
        .map_err(|e| GenerationFailure::malformed(operation, e.to_string()))?;
    let missing = value.missing();
    if missing.is_empty() {
        Ok(value)
    } else {
        Err(GenerationFailure::incomplete(operation, &missing))
    }
}

impl GenerationOutput {
    /// Decode and validate raw backend JSON for `operation`.
    pub fn decode(operation: Operation, raw: serde_json::Value) -> Result<Self, GenerationFailure> {
        Ok(match operation {
            Operation::RealWorldCase => Self::RealWorldCase(decode_as(operation, raw)?),
            Operation::Blog => Self::Blog(decode_as(operation, raw)?),
            Operation::LinkedinStory => Self::LinkedinStory(decode_as(operation, raw)?),
            Operation::CodingChallenge => Self::CodingChallenge(decode_as(operation, raw)?),
            Operation::RcaSearch => Self::RcaSearch(decode_as(operation, raw)?),
            Operation::RcaBlog => Self::RcaBlog(decode_as(operation, raw)?),
            Operation::CertificationQuestion => {
                Self::CertificationQuestion(decode_as(operation, raw)?)
            }
        })
    }

    pub fn operation(&self) -> Operation {
        match self {
            GenerationOutput::RealWorldCase(_) => Operation::RealWorldCase,
            GenerationOutput::Blog(_) => Operation::Blog,
            GenerationOutput::LinkedinStory(_) => Operation::LinkedinStory,
            GenerationOutput::CodingChallenge(_) => Operation::CodingChallenge,
            GenerationOutput::RcaSearch(_) => Operation::RcaSearch,
            GenerationOutput::RcaBlog(_) => Operation::RcaBlog,
            GenerationOutput::CertificationQuestion(_) => Operation::CertificationQuestion,
        }
    }

    fn mismatch(self, expected: Operation) -> GenerationFailure {
        GenerationFailure::malformed(
            expected,
            format!("generator answered a {} result", self.operation()),
        )
    }

    /// The source of a `realWorldCase` or `rcaSearch` result.
    pub fn into_source(self, expected: Operation) -> Result<Source, GenerationFailure> {
        match self {
            GenerationOutput::RealWorldCase(s) | GenerationOutput::RcaSearch(s) => Ok(s),
            other => Err(other.mismatch(expected)),
        }
    }

    pub fn into_blog(self) -> Result<BlogDraft, GenerationFailure> {
        match self {
            GenerationOutput::Blog(b) => Ok(b),
            other => Err(other.mismatch(Operation::Blog)),
        }
    }

    pub fn into_linkedin_story(self) -> Result<LinkedinStory, GenerationFailure> {
        match self {
            GenerationOutput::LinkedinStory(s) => Ok(s),
            other => Err(other.mismatch(Operation::LinkedinStory)),
        }
    }

    pub fn into_rca_draft(self) -> Result<RcaDraft, GenerationFailure> {
        match self {
            GenerationOutput::RcaBlog(d) => Ok(d),
            other => Err(other.mismatch(Operation::RcaBlog)),
        }
    }

    pub fn into_certification_question(self) -> Result<CertificationQuestion, GenerationFailure> {
        match self {
            GenerationOutput::CertificationQuestion(q) => Ok(q),
            other => Err(other.mismatch(Operation::CertificationQuestion)),
        }
    }

    pub fn into_coding_challenge(self) -> Result<CodingChallenge, GenerationFailure> {
        match self {
            GenerationOutput::CodingChallenge(c) => Ok(c),
            other => Err(other.mismatch(Operation::CodingChallenge)),
        }
    }
}
