//! The content pipelines and the services they are built from.

pub mod blog;
pub mod certification;
pub mod coding_challenge;
pub mod common;
pub mod linkedin;
pub mod rca;
pub mod sourced;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use inkflow_llm::ContentGenerator;
use inkflow_tools::{ReachabilityCheck, TestVerifier};
use inkflow_types::{FlowError, Result};

use crate::config::{ChannelMapStore, PipelineSettings};
use crate::graph::Graph;
use crate::sink::ContentSink;

/// External collaborators shared by every pipeline.
///
/// `verifier` is only needed by the coding-challenge pipeline and
/// `channels` only by the certification pipeline; building either without
/// it is a configuration error.
#[derive(Clone)]
pub struct Services {
    pub generator: Arc<dyn ContentGenerator>,
    pub reachability: Arc<dyn ReachabilityCheck>,
    pub sink: Arc<dyn ContentSink>,
    pub verifier: Option<TestVerifier>,
    pub channels: Option<Arc<ChannelMapStore>>,
    pub settings: PipelineSettings,
}

impl Services {
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        reachability: Arc<dyn ReachabilityCheck>,
        sink: Arc<dyn ContentSink>,
    ) -> Self {
        Self {
            generator,
            reachability,
            sink,
            verifier: None,
            channels: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_verifier(mut self, verifier: TestVerifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_channels(mut self, channels: Arc<ChannelMapStore>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("verifier", &self.verifier)
            .field("channels", &self.channels.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// The pipelines this crate knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Blog,
    Linkedin,
    Rca,
    Certification,
    CodingChallenge,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 5] = [
        PipelineKind::Blog,
        PipelineKind::Linkedin,
        PipelineKind::Rca,
        PipelineKind::Certification,
        PipelineKind::CodingChallenge,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineKind::Blog => blog::NAME,
            PipelineKind::Linkedin => linkedin::NAME,
            PipelineKind::Rca => rca::NAME,
            PipelineKind::Certification => certification::NAME,
            PipelineKind::CodingChallenge => coding_challenge::NAME,
        }
    }

    pub fn build(self, services: &Services) -> Result<Graph> {
        match self {
            PipelineKind::Blog => blog::build(services),
            PipelineKind::Linkedin => linkedin::build(services),
            PipelineKind::Rca => rca::build(services),
            PipelineKind::Certification => certification::build(services),
            PipelineKind::CodingChallenge => coding_challenge::build(services),
        }
    }

    /// Initial state for a run from user parameters, e.g.
    /// `{"topic": "caching"}` or `{"certification": "cka"}`.
    pub fn initial_state(self, params: &serde_json::Value) -> Result<serde_json::Value> {
        if !params.is_object() {
            return Err(FlowError::Config(format!(
                "{}: parameters must be a JSON object",
                self.as_str()
            )));
        }
        match self {
            PipelineKind::Blog => blog::initial_state(params),
            PipelineKind::Linkedin => linkedin::initial_state(params),
            PipelineKind::Rca => rca::initial_state(params),
            PipelineKind::Certification => certification::initial_state(params),
            PipelineKind::CodingChallenge => coding_challenge::initial_state(params),
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        PipelineKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s) || k.as_str().replace('-', "_") == s)
            .ok_or_else(|| {
                let known: Vec<&str> = PipelineKind::ALL.iter().map(|k| k.as_str()).collect();
                FlowError::Config(format!(
                    "unknown pipeline '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}
