//! Thin CLI wrapper around the pipeline engine: not part of the core
//! (see SPEC_FULL.md's Out of Scope note), but kept as a convenient
//! driver for `run`/`validate`/`resume`/`serve`, the way km-tools'
//! `main.rs` is a thin wrapper over its library.

use attractor_rs::agent::interviewer::NullInterviewer;
use attractor_rs::pipeline::checkpoint::Checkpoint;
use attractor_rs::pipeline::engine::{Engine, EngineConfig};
use attractor_rs::pipeline::parser::parse_dot;
use attractor_rs::pipeline::validator::{validate, Severity};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "attractor")]
#[command(author, version, about = "Pipeline engine CLI for directed-graph coding-agent runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline graph from its start node.
    Run {
        file: PathBuf,
        #[arg(long)]
        logs: Option<PathBuf>,
    },
    /// Validate a pipeline graph and print diagnostics.
    Validate { file: PathBuf },
    /// Resume a pipeline from a saved checkpoint.
    Resume { checkpoint: PathBuf, file: PathBuf },
    /// Start the HTTP façade (not implemented in this build).
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

fn read_graph(path: &PathBuf) -> Result<attractor_rs::pipeline::Graph, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("reading '{}': {}", path.display(), e))?;
    parse_dot(&text).map_err(|e| format!("parsing '{}': {}", path.display(), e))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let graph = match read_graph(&file) {
                Ok(g) => g,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let diags = validate(&graph, &[]);
            for d in &diags {
                println!("[{:?}] {} {}", d.severity, d.rule, d.message);
            }
            if diags.iter().any(|d| d.severity == Severity::Error) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Commands::Run { file, logs } => {
            let graph = match read_graph(&file) {
                Ok(g) => g,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let config = EngineConfig { logs_root: logs.or_else(|| Some(PathBuf::from(".attractor-logs"))), ..Default::default() };
            let engine = Engine::new(graph, config, Arc::new(NullInterviewer));
            match engine.run(None).await {
                Ok(outcome) if outcome.is_success() => ExitCode::SUCCESS,
                Ok(outcome) => {
                    eprintln!("error: pipeline finished with status {:?}: {}", outcome.status(), outcome.failure_reason);
                    ExitCode::FAILURE
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Resume { checkpoint, file } => {
            let graph = match read_graph(&file) {
                Ok(g) => g,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let checkpoint = match Checkpoint::load(&checkpoint) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("error: loading checkpoint: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let config = EngineConfig { logs_root: Some(PathBuf::from(".attractor-logs")), ..Default::default() };
            let engine = Engine::new(graph, config, Arc::new(NullInterviewer));
            match engine.run(Some(&checkpoint)).await {
                Ok(outcome) if outcome.is_success() => ExitCode::SUCCESS,
                Ok(outcome) => {
                    eprintln!("error: pipeline finished with status {:?}: {}", outcome.status(), outcome.failure_reason);
                    ExitCode::FAILURE
                }
                Err(e) => {
                    eprintln!("error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Serve { host, port } => {
            eprintln!("error: the HTTP facade is not implemented in this build (requested {}:{})", host, port);
            ExitCode::FAILURE
        }
    }
}
