use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use tldr_dispatch::classifier::Classifier;
use tldr_dispatch::config::{DispatchConfig, env_string};
use tldr_dispatch::dispatch::DispatchEngine;
use tldr_dispatch::error::ConfigError;
use tldr_dispatch::responder::prompts::PromptSettings;
use tldr_dispatch::responder::{GeminiConfig, GeminiResponder};
use tldr_dispatch::source::{RedditConfig, RedditSource};
use tldr_dispatch::state::StateStore;
use tldr_dispatch::state::store::{StateBackend, open_store};
use tldr_dispatch::stats::render_dashboard;

#[derive(Debug, Parser)]
#[command(name = "tldr-dispatch", version, about = "Policy-gated TLDR and reply bot")]
struct Cli {
    /// State file (json backend) or database (libsql backend).
    #[arg(long, global = true)]
    state_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one dispatch pass over every stream.
    Run {
        /// Make every decision but generate and post nothing.
        #[arg(long)]
        dry_run: bool,
        /// With --dry-run, save nothing at all instead of the dedup markers and
        /// milestone watermarks.
        #[arg(long, requires = "dry_run")]
        no_markers: bool,
    },
    /// Render the usage dashboard from saved state.
    Stats {
        #[arg(long, default_value = "stats.html")]
        output: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_tracing();

    let result = match cli.command {
        Commands::Run {
            dry_run,
            no_markers,
        } => run_dispatch(cli.state_path, dry_run, !no_markers).await,
        Commands::Stats { output } => write_stats(cli.state_path, &output).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Stdout logging, plus a daily-rolling file when `DISPATCH_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    match env_string("DISPATCH_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tldr-dispatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .init();
            None
        }
    }
}

/// Credentials for both collaborators, reporting every missing variable at once.
fn load_credentials() -> Result<(RedditConfig, GeminiConfig), ConfigError> {
    match (RedditConfig::from_env(), GeminiConfig::from_env()) {
        (Ok(reddit), Ok(gemini)) => Ok((reddit, gemini)),
        (Err(ConfigError::MissingEnvVars(mut a)), Err(ConfigError::MissingEnvVars(b))) => {
            a.extend(b);
            Err(ConfigError::MissingEnvVars(a))
        }
        (Err(e), _) | (_, Err(e)) => Err(e),
    }
}

async fn open_state(state_path: Option<PathBuf>) -> anyhow::Result<Arc<dyn StateStore>> {
    let backend = StateBackend::from_env()?;
    let path = state_path
        .or_else(|| env_string("DISPATCH_STATE_PATH").map(PathBuf::from))
        .unwrap_or_else(|| backend.default_path());
    let store = open_store(backend, &path)
        .await
        .with_context(|| format!("Failed to open state at {}", path.display()))?;
    Ok(Arc::from(store))
}

async fn run_dispatch(
    state_path: Option<PathBuf>,
    dry_run: bool,
    persist_markers: bool,
) -> anyhow::Result<()> {
    // Everything up to the engine run is configuration: failures exit non-zero
    // before any state is touched.
    let mut config = DispatchConfig::from_env()?;
    config.dry_run = dry_run;
    config.persist_dry_run_markers = persist_markers;

    let (reddit, gemini) = load_credentials()?;
    config.bot_username = reddit.username.clone();

    let classifier = Classifier::compile(&config.patterns)?;
    let store = open_state(state_path).await?;

    let prompts = PromptSettings {
        bot_name: env_string("DISPATCH_BOT_NAME")
            .unwrap_or_else(|| PromptSettings::default().bot_name),
        community: config.community.clone(),
        min_reply_words: config.min_reply_words,
        max_reply_words: config.max_reply_words,
    };
    let source = Arc::new(RedditSource::new(reddit, config.community.clone())?);
    let responder = Arc::new(GeminiResponder::new(gemini, prompts)?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        community = %config.community,
        store = store.name(),
        dry_run,
        "tldr-dispatch starting"
    );

    let engine = DispatchEngine::new(config, classifier, source, responder, store);

    // Runtime failures are logged; the process still exits cleanly.
    match engine.run_once(Utc::now()).await {
        Ok(report) => {
            for stream in &report.streams {
                info!(
                    stream = stream.stream.label(),
                    examined = stream.examined,
                    actions = stream.actions,
                    terminal = stream.terminal_skips,
                    deferred = stream.deferred,
                    failures = stream.failures,
                    "Stream summary"
                );
            }
        }
        Err(e) => error!(error = %e, "Run failed, state not saved"),
    }
    Ok(())
}

async fn write_stats(state_path: Option<PathBuf>, output: &Path) -> anyhow::Result<()> {
    let store = open_state(state_path).await?;
    let state = store.load().await?;
    let html = render_dashboard(&state.stats, Utc::now());
    tokio::fs::write(output, html)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        output = %output.display(),
        actions = state.stats.total_actions,
        "Dashboard written"
    );
    Ok(())
}
