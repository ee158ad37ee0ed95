//! Pipeline settings and configuration artifacts.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use inkflow_types::{FlowError, Result};

// ---------------------------------------------------------------------------
// PipelineSettings
// ---------------------------------------------------------------------------

/// Tunables shared by every pipeline wiring.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Invocations allowed per generating node in one run.
    pub max_attempts: u64,
    /// Bound on each reachability probe (HEAD and GET separately).
    pub reachability_timeout: Duration,
    /// Minimum summary length for a source to pass assessment.
    pub min_summary_chars: usize,
    /// Minimum body length for a blog or RCA draft.
    pub min_article_chars: usize,
    /// Minimum body length for a LinkedIn story.
    pub min_story_chars: usize,
    /// Test cases that must execute for a challenge to be published.
    pub min_verified_cases: usize,
    /// Answer options a certification question must have.
    pub question_options: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            reachability_timeout: Duration::from_secs(8),
            min_summary_chars: 40,
            min_article_chars: 600,
            min_story_chars: 200,
            min_verified_cases: 3,
            question_options: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelMap: certification → publishing channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CertificationChannel {
    /// Stable certification id, e.g. `aws-saa-c03`.
    pub id: String,
    pub name: String,
    /// Channel the generated questions are published to.
    pub channel: String,
}

/// Versioned mapping from certifications to channels.
///
/// ```json
/// { "version": 1,
///   "certifications": [ { "id": "cka", "name": "Certified Kubernetes Administrator", "channel": "kubernetes" } ] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelMap {
    pub version: u32,
    pub certifications: Vec<CertificationChannel>,
}

impl ChannelMap {
    pub const SUPPORTED_VERSION: u32 = 1;

    pub fn from_json(text: &str) -> Result<Self> {
        let map: ChannelMap = serde_json::from_str(text)
            .map_err(|e| FlowError::Config(format!("channel map: {e}")))?;
        map.validate()?;
        Ok(map)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| load_error(path, e))?;
        Self::from_json(&text)
    }

    /// [`ChannelMap::load`] without blocking the runtime.
    pub async fn load_async(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| load_error(path, e))?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != Self::SUPPORTED_VERSION {
            return Err(FlowError::Config(format!(
                "channel map version {} is not supported (expected {})",
                self.version,
                Self::SUPPORTED_VERSION
            )));
        }
        if self.certifications.is_empty() {
            return Err(FlowError::Config("channel map has no certifications".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for cert in &self.certifications {
            if cert.id.trim().is_empty() || cert.channel.trim().is_empty() {
                return Err(FlowError::Config(format!(
                    "channel map entry '{}' has an empty id or channel",
                    cert.id
                )));
            }
            if !seen.insert(cert.id.as_str()) {
                return Err(FlowError::Config(format!(
                    "channel map lists '{}' more than once",
                    cert.id
                )));
            }
        }
        Ok(())
    }

    /// Case-insensitive lookup by certification id.
    pub fn lookup(&self, id: &str) -> Option<&CertificationChannel> {
        self.certifications
            .iter()
            .find(|c| c.id.eq_ignore_ascii_case(id.trim()))
    }
}

fn load_error(path: &Path, e: std::io::Error) -> FlowError {
    FlowError::Config(format!("channel map {}: {e}", path.display()))
}

// ---------------------------------------------------------------------------
// TtlCache
// ---------------------------------------------------------------------------

/// A value with the instant it was fetched and how long it stays fresh.
#[derive(Debug, Clone)]
pub struct TtlCache<T> {
    value: T,
    fetched_at: Instant,
    ttl: Duration,
}

impl<T> TtlCache<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) >= self.ttl
    }

    /// Replace the value and restart the TTL at `now`.
    pub fn reload(&mut self, value: T, now: Instant) {
        self.value = value;
        self.fetched_at = now;
    }
}

// ---------------------------------------------------------------------------
// ChannelMapStore: file-backed ChannelMap with TTL
// ---------------------------------------------------------------------------

/// Loads a [`ChannelMap`] from disk and re-reads it once its TTL lapses.
#[derive(Debug)]
pub struct ChannelMapStore {
    path: PathBuf,
    cache: tokio::sync::Mutex<TtlCache<ChannelMap>>,
}

impl ChannelMapStore {
    pub fn open(path: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let path = path.into();
        let map = ChannelMap::load(&path)?;
        Ok(Self {
            path,
            cache: tokio::sync::Mutex::new(TtlCache::new(map, ttl)),
        })
    }

    /// Store over an in-memory map that never goes stale.
    pub fn fixed(map: ChannelMap) -> Self {
        Self {
            path: PathBuf::new(),
            cache: tokio::sync::Mutex::new(TtlCache::new(map, Duration::MAX)),
        }
    }

    /// Current map, reloading from disk when stale. A failed reload keeps
    /// serving the previous map and is retried on the next call.
    pub async fn current(&self) -> ChannelMap {
        let mut cache = self.cache.lock().await;
        let now = Instant::now();
        if cache.is_stale(now) {
            match ChannelMap::load_async(&self.path).await {
                Ok(map) => cache.reload(map, now),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "Channel map reload failed, keeping previous map");
                }
            }
        }
        cache.get().clone()
    }
}
