use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use scoutd::config::AppConfig;
use scoutd::{mcp, AppContext};

const DEFAULT_CONFIG_PATH: &str = "config/scoutd.toml";

#[derive(Parser)]
#[command(
    name = "scoutd",
    about = "Scholar Scout daemon — research-paper triage over MCP",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to scoutd.toml
    #[arg(long, env = "SCOUTD_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SCOUTD_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "SCOUTD_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server on stdio (default when no subcommand given).
    ///
    /// Examples:
    ///   scoutd serve
    ///   scoutd
    Serve,
    /// Run the full pipeline once and print the run report as JSON.
    ///
    /// Fetches alert emails, classifies papers, sends notifications, and
    /// (unless --no-delete) removes old alert emails afterwards.
    ///
    /// Examples:
    ///   scoutd run
    ///   scoutd run --no-weekly --no-delete
    Run {
        /// Send individual notifications instead of weekly digests.
        #[arg(long)]
        no_weekly: bool,
        /// Keep old alert emails after the run.
        #[arg(long)]
        no_delete: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Init once — must happen before any tracing calls. stdout carries the
    // JSON-RPC wire, so console logs always go to stderr.
    let log_level = args
        .log
        .clone()
        .or_else(|| (!config.log.is_empty()).then(|| config.log.clone()))
        .unwrap_or_else(|| "info".to_string());
    let log_format = std::env::var("SCOUTD_LOG_FORMAT")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            if config.log_format.is_empty() {
                "pretty".to_string()
            } else {
                config.log_format.clone()
            }
        });
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    info!(config = %config_path.display(), topics = config.topics.len(), "scoutd starting");
    let ctx = Arc::new(AppContext::new(config));

    match args.command {
        None | Some(Command::Serve) => mcp::transport::run(ctx).await?,
        Some(Command::Run {
            no_weekly,
            no_delete,
        }) => {
            let run = ctx.pipeline.run_pipeline(!no_weekly, !no_delete).await;
            println!("{}", serde_json::to_string_pretty(&run)?);
            if !run.errors.is_empty() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Initialize the tracing subscriber on stderr.
///
/// If `log_file` is set, logs go to both stderr and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format)
/// or `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stderr-only
/// logging with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("scoutd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stderr",
                dir.display()
            );
            init_stderr_only(log_level, use_json);
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else {
        init_stderr_only(log_level, use_json);
        None
    }
}

fn init_stderr_only(log_level: &str, use_json: bool) {
    if use_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(log_level)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(log_level)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}
