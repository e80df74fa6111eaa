//! leakmin: reduce code snippets to the smallest form from which a model
//! still infers the same imports.
//!
//! ```bash
//! # Reduce every .java file in ./snippets with a local model
//! leakmin reduce llama3.1:8b ./snippets ./out
//!
//! # Dump the default configuration
//! leakmin print-config > leakmin.toml
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use leakmin_core::{
    check_expected_imports, run_companion, BatchRunner, Orchestrator, PersesBridge, PersistGuard,
    PropertyRequest, ReductionConfig, TimingLog,
};
use leakmin_oracle::imports::strip_imports;
use leakmin_oracle::{Backend, OracleRegistry};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "leakmin", about = "Oracle-guided reduction of code snippets", version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reduce every snippet in a directory.
    Reduce(ReduceArgs),
    /// Exit 0 when the model infers every expected import for a file.
    Check {
        file: PathBuf,
        #[arg(long)]
        model: String,
        /// Per-call timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long = "expect", value_name = "FQN")]
        expected: Vec<String>,
    },
    /// Property check invoked by the structural reducer's test script.
    Property {
        /// Request file; the R_PROPERTY_* variables otherwise.
        #[arg(long)]
        request: Option<PathBuf>,
        /// Extra attempts before reporting failure.
        #[arg(long)]
        retries: Option<u32>,
    },
    /// Print the imports a model infers for a snippet read from stdin.
    Infer {
        model: String,
        /// Send the snippet with its import statements.
        #[arg(long)]
        keep_import: bool,
    },
    /// Print the default configuration.
    PrintConfig,
}

#[derive(Args, Debug)]
struct ReduceArgs {
    model: String,
    input_dir: PathBuf,
    #[arg(default_value = ".")]
    output_dir: PathBuf,
    /// Hosted API key.
    #[arg(long)]
    api_key: Option<String>,
    /// Seed for the processing order.
    #[arg(long)]
    seed: Option<u64>,
    /// Directory for the timing log.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn init_tracing(config: &leakmin_core::config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs { "json" } else { config.format.as_str() };
    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        "json" => registry.with(fmt::layer().json().with_writer(std::io::stderr)).try_init(),
        "compact" => registry.with(fmt::layer().compact().with_writer(std::io::stderr)).try_init(),
        _ => registry.with(fmt::layer().pretty().with_writer(std::io::stderr)).try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn load_config(cli: &Cli) -> Result<ReductionConfig> {
    let config = match &cli.config {
        Some(path) => ReductionConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ReductionConfig::default(),
    };
    let mut config = config.with_env_fallbacks();
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

fn resolve(config: &ReductionConfig) -> Result<Backend> {
    OracleRegistry::with_defaults()
        .resolve(&config.oracle.model, &config.oracle.backend)
        .with_context(|| format!("Cannot set up model {}", config.oracle.model))
}

async fn reduce(args: &ReduceArgs, config_file: Option<PathBuf>, mut config: ReductionConfig) -> Result<ExitCode> {
    config.oracle.model = args.model.clone();
    if let Some(key) = &args.api_key {
        config.oracle.backend.api_key = Some(key.clone());
    }
    if args.seed.is_some() {
        config.batch.seed = args.seed;
    }
    if let Some(dir) = &args.log_dir {
        config.batch.log_dir = dir.clone();
    }
    config.validate().context("Invalid configuration")?;

    let backend = resolve(&config)?;
    let companion = match &config.structural.companion {
        Some(path) => path.clone(),
        None => std::env::current_exe().context("Cannot locate the leakmin executable")?,
    };
    let bridge = PersesBridge::new(config.structural.clone(), companion, args.model.clone())
        .with_config_file(config_file)
        .with_api_key(config.oracle.backend.api_key.clone());
    let orchestrator = Orchestrator::new(backend, Arc::new(bridge), config.stages.clone());

    let log = Arc::new(TimingLog::new());
    let guard = PersistGuard::new(
        Arc::clone(&log),
        config.batch.log_dir.clone(),
        config.batch.log_prefix.clone(),
    );
    let runner = BatchRunner::new(
        orchestrator,
        config.batch.clone(),
        config.stages.task_retries,
        log,
    );

    info!(model = %args.model, input = %args.input_dir.display(), "reduction batch starting");
    let summary = tokio::select! {
        result = runner.process_batch(&args.input_dir, &args.output_dir) => result?,
        _ = shutdown_signal() => {
            warn!("interrupted; writing timing log");
            drop(guard);
            return Ok(ExitCode::from(130));
        }
    };

    guard.finish().context("Failed to write timing log")?;
    info!(
        output = %summary.output_dir.display(),
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        "reduction batch finished"
    );
    Ok(ExitCode::from(summary.stop.exit_code() as u8))
}

async fn check(
    mut config: ReductionConfig,
    file: &Path,
    model: &str,
    timeout: Option<u64>,
    expected: &[String],
) -> Result<ExitCode> {
    config.oracle.model = model.to_string();
    let backend = resolve(&config)?;
    let code = std::fs::read_to_string(file)
        .with_context(|| format!("Cannot read {}", file.display()))?;
    let timeout = timeout.map(Duration::from_secs);

    let recovered = check_expected_imports(
        backend.oracle.as_ref(),
        &code,
        expected,
        timeout,
        config.stages.test_repeat,
    )
    .await;
    match recovered {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => Ok(ExitCode::FAILURE),
        Err(err) => {
            error!(error = %err, "oracle call failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Command::PrintConfig = cli.command {
        println!("{}", ReductionConfig::default().to_toml()?);
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&cli)?;
    init_tracing(&config.logging, cli.json_logs)?;

    match &cli.command {
        Command::Reduce(args) => reduce(args, cli.config.clone(), config).await,
        Command::Check {
            file,
            model,
            timeout,
            expected,
        } => check(config, file, model, *timeout, expected).await,
        Command::Property { request, retries } => {
            let request = match request {
                Some(path) => PropertyRequest::load(path)?,
                None => PropertyRequest::from_env()?,
            };
            let retries = retries.unwrap_or(config.structural.companion_retries);
            let code = run_companion(&request, retries).await?;
            Ok(ExitCode::from(code.clamp(0, 255) as u8))
        }
        Command::Infer { model, keep_import } => {
            let mut config = config;
            config.oracle.model = model.clone();
            let backend = resolve(&config)?;
            let mut source = String::new();
            std::io::stdin()
                .read_to_string(&mut source)
                .context("Cannot read snippet from stdin")?;
            let code = if *keep_import { source } else { strip_imports(&source).0 };
            let response = backend.oracle.infer(&code, None).await?;
            println!("{response}");
            Ok(ExitCode::SUCCESS)
        }
        Command::PrintConfig => Ok(ExitCode::SUCCESS),
    }
}
