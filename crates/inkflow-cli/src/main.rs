//! CLI binary for running Inkflow content pipelines.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use inkflow_llm::{CodingChallenge, GeneratorConfig, LlmGenerator};
use inkflow_pipeline::{
    run_batch, BatchOutcome, ChannelMap, ChannelMapStore, ExecutorConfig, JsonFileSink,
    PipelineEvent, PipelineExecutor, PipelineKind, PipelineRun, PipelineSettings, Services,
};
use inkflow_tools::{ReachabilityValidator, SandboxConfig, SandboxHarness, TestVerifier};
use inkflow_types::RunStatus;

#[derive(Parser)]
#[command(name = "inkflow", version, about = "Self-correcting content generation pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory published content is written to
    #[arg(short, long, global = true, default_value = "output")]
    out: PathBuf,

    /// Maximum number of node executions per run before aborting
    #[arg(long, global = true, default_value = "200")]
    max_steps: usize,

    /// Invocations allowed per generating node in one run
    #[arg(long, global = true, default_value = "3")]
    max_attempts: u64,

    /// Certification → channel map (JSON), required by the certification pipeline
    #[arg(long, global = true)]
    channels: Option<PathBuf>,

    /// Seconds before the channel map is re-read from disk
    #[arg(long, global = true, default_value = "3600")]
    channels_ttl: u64,

    /// Interpreter used to execute reference solutions
    #[arg(long, global = true, default_value = "python3")]
    python: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pipeline
    Run {
        /// Pipeline name (blog, linkedin, rca, certification, coding-challenge)
        pipeline: String,

        /// JSON file with the run parameters, e.g. {"topic": "caching"}
        #[arg(short, long)]
        params: PathBuf,
    },

    /// Run one pipeline for every line of a JSON-lines file
    Batch {
        /// Pipeline name
        pipeline: String,

        /// JSON-lines file, one parameter object per line
        #[arg(short, long)]
        params: PathBuf,

        /// Runs in flight at once
        #[arg(short, long, default_value = "4")]
        concurrency: usize,
    },

    /// Print a pipeline's nodes and transitions
    Graph {
        /// Pipeline name
        pipeline: String,
    },

    /// Execute a coding challenge's reference solution against its test cases
    Verify {
        /// Challenge JSON file
        challenge: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match &cli.command {
        Commands::Run { pipeline, params } => {
            cmd_run(&cli, pipeline.parse()?, params).await?;
        }
        Commands::Batch {
            pipeline,
            params,
            concurrency,
        } => {
            cmd_batch(&cli, pipeline.parse()?, params, *concurrency).await?;
        }
        Commands::Graph { pipeline } => {
            cmd_graph(&cli, pipeline.parse()?)?;
        }
        Commands::Verify { challenge } => {
            cmd_verify(&cli, challenge).await?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn settings(cli: &Cli) -> PipelineSettings {
    PipelineSettings {
        max_attempts: cli.max_attempts,
        ..PipelineSettings::default()
    }
}

fn verifier(cli: &Cli) -> TestVerifier {
    TestVerifier::from_harness(SandboxHarness::new(SandboxConfig {
        interpreter: cli.python.clone(),
        ..SandboxConfig::default()
    }))
}

fn channels(cli: &Cli) -> anyhow::Result<Option<Arc<ChannelMapStore>>> {
    match &cli.channels {
        Some(path) => {
            let store = ChannelMapStore::open(path, Duration::from_secs(cli.channels_ttl))?;
            Ok(Some(Arc::new(store)))
        }
        None => Ok(None),
    }
}

fn services(cli: &Cli, generator: GeneratorConfig) -> anyhow::Result<Services> {
    let mut services = Services::new(
        Arc::new(LlmGenerator::new(generator)?),
        Arc::new(ReachabilityValidator::new()?),
        Arc::new(JsonFileSink::new(&cli.out)),
    )
    .with_verifier(verifier(cli))
    .with_settings(settings(cli));
    if let Some(store) = channels(cli)? {
        services = services.with_channels(store);
    }
    Ok(services)
}

fn executor(cli: &Cli, kind: PipelineKind) -> anyhow::Result<PipelineExecutor> {
    let services = services(cli, GeneratorConfig::from_env()?)?;
    let graph = kind.build(&services)?;
    Ok(PipelineExecutor::new(graph).with_config(ExecutorConfig {
        max_steps: cli.max_steps,
    }))
}

/// Log node notes as they happen.
fn follow_notes(executor: &PipelineExecutor) {
    let mut events = executor.emitter().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::NodeNote {
                    run_id,
                    node,
                    message,
                    data,
                }) => {
                    tracing::info!(run_id = %run_id, node = %node, data = %data, "{message}");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "Event follower lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn print_run(run: &PipelineRun) {
    println!("Run {} ({})", run.run_id, run.graph);
    println!("  Status: {}", run.status().as_str());
    if let Some(reason) = run.reason() {
        println!("  Reason: {}", reason);
    }
    if let Some(id) = run.state.get_str("published_id") {
        println!("  Published: {}", id);
    }
    println!("  Path: {}", run.visited().join(" -> "));
    println!("  Duration: {}ms", run.duration_ms);
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_run(cli: &Cli, kind: PipelineKind, params_path: &Path) -> anyhow::Result<()> {
    let params: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(params_path)?)?;
    let executor = executor(cli, kind)?;
    let initial = executor.initial_state(kind.initial_state(&params)?)?;

    println!("Running pipeline: {}", kind);
    println!("Output: {}", cli.out.display());
    follow_notes(&executor);

    let run = executor.run(initial).await?;
    print_run(&run);

    if run.status() == RunStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}

/// Parse a JSON-lines file, skipping blank lines. Errors name the line.
fn parse_param_lines(text: &str) -> anyhow::Result<Vec<serde_json::Value>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| anyhow::anyhow!("line {}: {}", i + 1, e))
        })
        .collect()
}

async fn cmd_batch(
    cli: &Cli,
    kind: PipelineKind,
    params_path: &Path,
    concurrency: usize,
) -> anyhow::Result<()> {
    let lines = parse_param_lines(&std::fs::read_to_string(params_path)?)?;
    if lines.is_empty() {
        anyhow::bail!("{} has no parameter lines", params_path.display());
    }

    let executor = executor(cli, kind)?;
    let inputs = lines
        .iter()
        .enumerate()
        .map(|(i, params)| {
            kind.initial_state(params)
                .and_then(|initial| executor.initial_state(initial))
                .map_err(|e| anyhow::anyhow!("line {}: {}", i + 1, e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    println!("Running {} {} runs, {} at a time", inputs.len(), kind, concurrency);
    follow_notes(&executor);
    let outcomes = run_batch(Arc::new(executor), inputs, concurrency).await;

    let mut errors = 0;
    for outcome in &outcomes {
        match outcome {
            BatchOutcome::Finished { index, run } => {
                if run.status() == RunStatus::Error {
                    errors += 1;
                }
                println!(
                    "[{}] {} {}{}",
                    index + 1,
                    run.status().as_str(),
                    run.state.get_str("published_id").unwrap_or("-"),
                    run.reason().map(|r| format!(" ({r})")).unwrap_or_default()
                );
            }
            BatchOutcome::Failed { index, error } => {
                errors += 1;
                println!("[{}] failed: {}", index + 1, error);
            }
        }
    }
    println!("\n{} runs, {} errors", outcomes.len(), errors);

    if errors > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_graph(cli: &Cli, kind: PipelineKind) -> anyhow::Result<()> {
    // Nothing runs, so the generator needs no credentials and an empty
    // channel map will do.
    let generator = GeneratorConfig::from_env().unwrap_or_else(|_| GeneratorConfig::new(""));
    let mut services = services(cli, generator)?;
    if services.channels.is_none() {
        services = services.with_channels(Arc::new(ChannelMapStore::fixed(ChannelMap {
            version: ChannelMap::SUPPORTED_VERSION,
            certifications: Vec::new(),
        })));
    }
    let graph = kind.build(&services)?;
    print!("{}", graph.describe());
    Ok(())
}

async fn cmd_verify(cli: &Cli, path: &Path) -> anyhow::Result<()> {
    let challenge: CodingChallenge = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let report = verifier(cli)
        .verify(
            &challenge.reference_solution,
            &challenge.entry_point,
            challenge.test_cases(),
        )
        .await;

    println!("Challenge: {}", challenge.title);
    for case in &report.cases {
        let verdict = match (case.matched, &case.execution_error) {
            (Some(true), _) => "match".to_string(),
            (Some(false), _) => "corrected".to_string(),
            (None, Some(error)) => format!("failed: {error}"),
            (None, None) => "not run".to_string(),
        };
        println!("  {} -> {} [{}]", case.id, case.expected_output, verdict);
    }
    println!(
        "\nMatched: {}, corrected: {}, failed: {}",
        report.matched, report.corrected, report.failed
    );
    println!("{}", serde_json::to_string_pretty(&report.cases)?);

    if !report.all_executed() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_lines_skip_blanks_and_name_bad_lines() {
        let lines = parse_param_lines("{\"topic\": \"a\"}\n\n  \n{\"topic\": \"b\"}\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["topic"], "b");

        let err = parse_param_lines("{\"topic\": \"a\"}\nnot json\n").unwrap_err();
        assert!(err.to_string().starts_with("line 2:"));
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "inkflow",
            "run",
            "blog",
            "--params",
            "p.json",
            "--max-attempts",
            "5",
            "--out",
            "/tmp/out",
        ]);
        assert_eq!(cli.max_attempts, 5);
        assert_eq!(cli.max_steps, 200);
        assert_eq!(cli.out, PathBuf::from("/tmp/out"));
        assert_eq!(settings(&cli).max_attempts, 5);
        assert!(matches!(cli.command, Commands::Run { .. }));
    }
}
