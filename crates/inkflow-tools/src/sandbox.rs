//! Sandboxed execution of externally generated source code.
//!
//! Every call stages a uniquely named wrapper script, runs it in a fresh
//! interpreter process (own process group, filtered environment, hard
//! wall-clock timeout covering both the process and its output) and reads
//! back the entry point's return value as canonical JSON. The whole process
//! group is killed once the interpreter exits, so nothing the code spawned
//! outlives the call. The wrapper file is removed on every exit path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Prefix of the stdout line carrying the serialized result.
const RESULT_MARKER: &str = "__INKFLOW_RESULT__";

/// Stdout line the wrapper prints when the entry point is not callable.
const MISSING_MARKER: &str = "__INKFLOW_NO_ENTRY_POINT__";

/// Failure of a single sandboxed execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionFailure {
    #[error("failed to stage wrapper script: {0}")]
    Staging(String),

    #[error("failed to spawn interpreter '{interpreter}': {message}")]
    Spawn {
        interpreter: String,
        message: String,
    },

    #[error("execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("entry point '{0}' is not defined or not callable")]
    MissingEntryPoint(String),

    #[error("process exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("could not read result: {0}")]
    MalformedOutput(String),
}

/// Runs source code and returns the entry point's canonical result.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(
        &self,
        source: &str,
        entry_point: &str,
        args: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ExecutionFailure>;
}

// ---------------------------------------------------------------------------
// SandboxConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Interpreter binary used to run the wrapper script.
    pub interpreter: String,
    /// Directory for staged wrapper scripts.
    pub scratch_dir: PathBuf,
    /// Per-execution timeout used when the caller has none of its own.
    pub default_timeout: Duration,
    /// Time between SIGTERM and a hard kill after a timeout.
    pub kill_grace: Duration,
    /// Bytes kept from each of stdout and stderr. Older output is dropped.
    pub max_output_bytes: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            scratch_dir: std::env::temp_dir().join("inkflow-sandbox"),
            default_timeout: Duration::from_secs(10),
            kill_grace: Duration::from_secs(1),
            max_output_bytes: 1 << 20,
        }
    }
}

// ---------------------------------------------------------------------------
// ScratchFile: removes the staged script when dropped
// ---------------------------------------------------------------------------

struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("wrapper-{}.py", uuid::Uuid::new_v4())),
        }
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %self.path.display(), error = %e, "Failed to remove wrapper script");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Wrapper script
// ---------------------------------------------------------------------------

const WRAPPER_TEMPLATE: &str = r#"import json
import sys
from collections import abc

SOURCE = __SOURCE__
ENTRY_POINT = __ENTRY__
MARKER = __MARKER__
MISSING = __MISSING__


def canonical(value):
    if value is None or isinstance(value, (bool, int, float, str)):
        return value
    if isinstance(value, abc.Mapping):
        return {str(k): canonical(v) for k, v in value.items()}
    if isinstance(value, (bytes, bytearray)):
        return str(value)
    if isinstance(value, (set, frozenset)):
        items = [canonical(v) for v in value]
        try:
            return sorted(items)
        except TypeError:
            return sorted(items, key=lambda v: json.dumps(v, sort_keys=True))
    if isinstance(value, abc.Iterable):
        return [canonical(v) for v in value]
    return str(value)


def main():
    args = json.loads(sys.stdin.read() or "null")
    namespace = {"__name__": "solution"}
    exec(compile(SOURCE, "<solution>", "exec"), namespace)
    fn = namespace.get(ENTRY_POINT)
    if not callable(fn):
        sys.stdout.write("\n" + MISSING + "\n")
        sys.stdout.flush()
        return
    if isinstance(args, list):
        result = fn(*args)
    elif isinstance(args, dict):
        result = fn(**args)
    else:
        result = fn(args)
    sys.stdout.write("\n" + MARKER + json.dumps(canonical(result)) + "\n")
    sys.stdout.flush()


main()
"#;

/// Render the wrapper. JSON string literals are valid Python literals, so
/// the source and entry point are embedded without further escaping.
/// Caller text goes in last so placeholders inside it are left alone.
fn render_wrapper(source: &str, entry_point: &str) -> String {
    let quote = |s: &str| serde_json::Value::String(s.to_string()).to_string();
    WRAPPER_TEMPLATE
        .replace("__MARKER__", &quote(RESULT_MARKER))
        .replace("__MISSING__", &quote(MISSING_MARKER))
        .replacen("__ENTRY__", &quote(entry_point), 1)
        .replacen("__SOURCE__", &quote(source), 1)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Environment for the child: secrets removed, hashing made deterministic.
fn sandbox_env() -> HashMap<String, String> {
    let exclude_suffixes: &[&str] = &["_api_key", "_secret", "_token", "_password", "_credential"];
    let mut env: HashMap<String, String> = std::env::vars()
        .filter(|(key, _)| {
            let lower = key.to_lowercase();
            !exclude_suffixes.iter().any(|s| lower.ends_with(s))
        })
        .collect();
    env.insert("PYTHONHASHSEED".into(), "0".into());
    env.insert("PYTHONDONTWRITEBYTECODE".into(), "1".into());
    env.insert("PYTHONIOENCODING".into(), "utf-8".into());
    env
}

fn parse_result(stdout: &str, entry_point: &str) -> Result<serde_json::Value, ExecutionFailure> {
    if stdout.lines().any(|l| l == MISSING_MARKER) {
        return Err(ExecutionFailure::MissingEntryPoint(entry_point.to_string()));
    }
    let line = stdout
        .lines()
        .rev()
        .find_map(|l| l.strip_prefix(RESULT_MARKER))
        .ok_or_else(|| ExecutionFailure::MalformedOutput("no result line on stdout".into()))?;
    serde_json::from_str(line).map_err(|e| ExecutionFailure::MalformedOutput(e.to_string()))
}

/// Read to EOF, keeping only the last `limit` bytes. The result line is
/// printed last, so a flood of earlier output cannot push it out.
async fn read_tail<R>(mut reader: R, limit: usize) -> Vec<u8>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > limit.saturating_mul(2) {
                    buf.drain(..buf.len() - limit);
                }
            }
        }
    }
    if buf.len() > limit {
        buf.drain(..buf.len() - limit);
    }
    buf
}

async fn join_output(handle: Option<&mut tokio::task::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Signal the child's whole process group: SIGTERM, or SIGKILL when `hard`.
fn signal_group(pid: Option<u32>, hard: bool) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            let signal = if hard { libc::SIGKILL } else { libc::SIGTERM };
            // SAFETY: the group was created for this child by `process_group(0)`.
            unsafe {
                libc::kill(-(pid as i32), signal);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (pid, hard);
    }
}

// ---------------------------------------------------------------------------
// SandboxHarness
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct SandboxHarness {
    config: SandboxConfig,
}

impl SandboxHarness {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    async fn stage(&self, source: &str, entry_point: &str) -> Result<ScratchFile, ExecutionFailure> {
        tokio::fs::create_dir_all(&self.config.scratch_dir)
            .await
            .map_err(|e| ExecutionFailure::Staging(e.to_string()))?;
        let file = ScratchFile::new(&self.config.scratch_dir);
        tokio::fs::write(&file.path, render_wrapper(source, entry_point))
            .await
            .map_err(|e| ExecutionFailure::Staging(e.to_string()))?;
        Ok(file)
    }

    async fn terminate(&self, child: &mut tokio::process::Child, pid: Option<u32>) {
        signal_group(pid, false);
        if tokio::time::timeout(self.config.kill_grace, child.wait())
            .await
            .is_err()
        {
            let _ = child.kill().await;
        }
        signal_group(pid, true);
    }
}

#[async_trait]
impl CodeExecutor for SandboxHarness {
    async fn execute(
        &self,
        source: &str,
        entry_point: &str,
        args: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ExecutionFailure> {
        if !is_identifier(entry_point) {
            return Err(ExecutionFailure::MissingEntryPoint(entry_point.to_string()));
        }

        // Dropping `script` removes the file on every path out of this fn.
        let script = self.stage(source, entry_point).await?;

        let mut cmd = tokio::process::Command::new(&self.config.interpreter);
        cmd.arg(&script.path)
            .current_dir(&self.config.scratch_dir)
            .env_clear()
            .envs(sandbox_env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| ExecutionFailure::Spawn {
            interpreter: self.config.interpreter.clone(),
            message: e.to_string(),
        })?;
        // Captured before `wait` reaps the child; it names the process group.
        let pid = child.id();
        tracing::debug!(entry_point = %entry_point, pid = ?pid, "Sandbox process spawned");

        let stdin = child.stdin.take();
        let payload = args.to_string();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(payload.as_bytes()).await;
            }
        });
        let limit = self.config.max_output_bytes;
        let mut stdout = child.stdout.take().map(|s| tokio::spawn(read_tail(s, limit)));
        let mut stderr = child.stderr.take().map(|s| tokio::spawn(read_tail(s, limit)));

        let started = tokio::time::Instant::now();
        let finished = tokio::time::timeout(timeout, async {
            let status = child.wait().await;
            // Background processes left by the code would hold the pipes open.
            signal_group(pid, true);
            let out = join_output(stdout.as_mut()).await;
            let err = join_output(stderr.as_mut()).await;
            (status, out, err)
        })
        .await;
        writer.abort();

        let (status, stdout, stderr) = match finished {
            Ok(collected) => collected,
            Err(_) => {
                self.terminate(&mut child, pid).await;
                for handle in stdout.iter().chain(stderr.iter()) {
                    handle.abort();
                }
                tracing::warn!(entry_point = %entry_point, timeout_ms = timeout.as_millis() as u64, "Sandbox execution timed out");
                return Err(ExecutionFailure::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };
        let status = status.map_err(|e| ExecutionFailure::NonZeroExit {
            code: -1,
            stderr: e.to_string(),
        })?;
        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();

        tracing::debug!(
            entry_point = %entry_point,
            exit_code = ?status.code(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Sandbox process exited"
        );

        match status.code() {
            Some(0) => parse_result(&stdout, entry_point),
            code => Err(ExecutionFailure::NonZeroExit {
                code: code.unwrap_or(-1),
                stderr,
            }),
        }
    }
}
