//! Content generation adapter.
//!
//! Provides the `ContentGenerator` trait consumed by generating nodes, the
//! tagged per-operation request/result types validated at the adapter
//! boundary, and `LlmGenerator`, an HTTP implementation over a messages API.

mod failure;
mod generator;
mod operation;

pub use failure::{FailureKind, GenerationFailure};
pub use generator::{extract_json, ContentGenerator, GeneratorConfig, LlmGenerator};
pub use operation::{
    BlogDraft, CertificationQuestion, CodingChallenge, GeneratedTestCase, GenerationOutput,
    GenerationRequest, LinkedinStory, Operation, RcaDraft, Source,
};
