//! Forge CLI - multi-pass document review from the command line
//!
//! Provides a `forge` command that runs a document through the specialist
//! review pipeline and prints the refined feedback.

mod config;
mod render;

use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use forge_models::ConnectionConfig;
use forge_orchestrator::{AnalysisRun, Catalogue, RunReporter};
use tokio::sync::mpsc;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::CliConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

/// Forge - multi-pass document review
///
/// Runs several specialist reviewers over a document, merges their feedback
/// and filters it down to the comments worth acting on.
#[derive(Parser, Debug)]
#[command(name = "forge", author, version, about = "Forge - multi-pass document review")]
struct Args {
    /// Document to review ("-" reads stdin)
    document: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Send requests through this proxy instead of directly
    #[arg(long)]
    proxy_url: Option<String>,

    /// Environment variable holding the API key
    #[arg(long)]
    api_key_env: Option<String>,

    /// Let search-capable specialists use web search
    #[arg(long)]
    web_search: bool,

    /// Let specialists delegate research to sub-agents
    #[arg(long)]
    delegation: bool,

    /// Run the grammar and mechanics pass
    #[arg(long)]
    grammar: bool,

    /// Enable web search for the math specialist
    #[arg(long)]
    math_search: bool,

    /// Ask for extended reasoning on each specialist's first turn
    #[arg(long)]
    thinking: bool,

    /// Override the primary model
    #[arg(long)]
    model: Option<String>,

    /// Replacement specialist catalogue (TOML)
    #[arg(long)]
    catalogue: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not print progress
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cli_config = CliConfig::discover_and_load()?;

    init_tracing(args.log_level.as_deref().or(cli_config.log_level.as_deref()).unwrap_or("warn"))?;

    let document = read_document(&args.document)?;

    let mut engine = cli_config.engine_config();
    if let Some(ref model) = args.model {
        engine.model.clone_from(model);
    }

    let catalogue = match args.catalogue.as_ref().or(cli_config.catalogue.as_ref()) {
        Some(path) => Catalogue::from_file(path)
            .with_context(|| format!("Failed to load catalogue {}", path.display()))?,
        None => Catalogue::builtin()?,
    };

    let mut options = cli_config.analysis_options();
    options.web_search |= args.web_search;
    options.delegation |= args.delegation;
    options.mechanical_pass |= args.grammar;
    options.extended_thinking |= args.thinking;
    if args.math_search {
        options = options.with_quantitative_search();
    }

    let connection = connection(&args, &cli_config)?;
    let format = args.format.unwrap_or(match cli_config.format.as_deref() {
        Some("json") => OutputFormat::Json,
        _ => OutputFormat::Human,
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let quiet = args.quiet;
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(line) = render::event_line(&event) {
                if !quiet {
                    eprintln!("{line}");
                }
            }
        }
    });

    let run = AnalysisRun::anthropic(connection, cli_config.retry_policy(), engine, catalogue)
        .with_reporter(RunReporter::new(tx));
    let result = run.execute(&document, &options).await;
    drop(run);
    let _ = progress.await;
    let report = result?;

    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&report)? + "\n",
        OutputFormat::Human => render::human_report(&report),
    };

    match args.output {
        Some(ref path) => {
            std::fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None => print!("{rendered}"),
    }

    Ok(())
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let builder = FmtSubscriber::builder().with_writer(std::io::stderr).without_time().with_target(false);
    match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())?,
        Err(_) => tracing::subscriber::set_global_default(builder.with_max_level(level).finish())?,
    }
    Ok(())
}

fn read_document(path: &Path) -> anyhow::Result<String> {
    let document = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer).context("Failed to read document from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read document {}", path.display()))?
    };

    if document.trim().is_empty() {
        bail!("Document is empty");
    }
    Ok(document)
}

fn connection(args: &Args, cli_config: &CliConfig) -> anyhow::Result<ConnectionConfig> {
    if let Some(url) = args.proxy_url.as_ref().or(cli_config.proxy_url.as_ref()) {
        return Ok(ConnectionConfig::proxied(url.clone()));
    }

    let var = args.api_key_env.as_deref().unwrap_or_else(|| cli_config.api_key_env());
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(ConnectionConfig::direct(key)),
        _ => bail!("{var} is not set. Export an API key or pass --proxy-url."),
    }
}
