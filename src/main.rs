//! CLI launcher — loads a pipeline definition, runs it, and maps the
//! outcome to the process exit-code contract:
//!
//! - `0` success
//! - `1` finished with processing errors
//! - `2` unexpected error
//! - `3` unable to prepare or initialize the pipeline

use anyhow::Context;
use clap::Parser;
use rowflow::pipeline::{ExitCode, Pipeline, PipelineDef, StepRegistry};
use rowflow::EngineError;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "rowflow", version, about = "Run a rowflow pipeline definition")]
struct Args {
    /// Pipeline definition file (.json or .toml)
    file: PathBuf,

    /// Pipeline parameters, repeatable: -p NAME=VALUE
    #[arg(short = 'p', long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// Log filter, e.g. "info" or "rowflow=debug"
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_definition(path: &PathBuf) -> anyhow::Result<PipelineDef> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let def = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text)
            .with_context(|| format!("parsing {} as TOML", path.display()))?,
        _ => serde_json::from_str(&text)
            .with_context(|| format!("parsing {} as JSON", path.display()))?,
    };
    Ok(def)
}

fn run(args: &Args) -> Result<ExitCode, EngineError> {
    let def = load_definition(&args.file)
        .map_err(|e| EngineError::Parse(format!("{e:#}")))?;

    let registry = Arc::new(StepRegistry::with_builtins());
    let mut pipeline = Pipeline::new(Arc::new(def), registry);

    for param in &args.params {
        let (name, value) = param.split_once('=').ok_or_else(|| {
            EngineError::Parse(format!("parameter '{param}' is not NAME=VALUE"))
        })?;
        pipeline.scope().set(name, value);
    }

    pipeline.prepare()?;
    pipeline.start()?;
    let result = pipeline.wait_until_finished()?;

    tracing::info!(
        read = result.counts.read,
        written = result.counts.written,
        rejected = result.counts.rejected,
        errors = result.errors,
        stopped = result.stopped,
        "pipeline complete"
    );
    Ok(result.exit_code())
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let code = match run(&args) {
        Ok(code) => code,
        Err(e @ (EngineError::Definition(_) | EngineError::StepInit { .. } | EngineError::Parse(_))) => {
            tracing::error!("{e}");
            ExitCode::UnableToPrepare
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::UnexpectedError
        }
    };
    std::process::exit(code.code());
}
