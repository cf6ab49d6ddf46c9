use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use vigild::alerts::notifier::{LogNotifier, Notifier, SlackNotifier};
use vigild::alerts::summary;
use vigild::clock::SystemClock;
use vigild::config::MonitorConfig;
use vigild::storage::Storage;
use vigild::watchdog::Watchdog;
use vigild::AppContext;

#[derive(Parser)]
#[command(
    name = "vigild",
    about = "Vigil Host — heartbeat & alerting daemon for autonomous agents",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP server port
    #[arg(long, env = "VIGILD_PORT")]
    port: Option<u16>,

    /// Data directory for config and the SQLite database
    #[arg(long, env = "VIGILD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "VIGILD_LOG")]
    log: Option<String>,

    /// Bind address (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "VIGILD_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "VIGILD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand given).
    ///
    /// Runs the heartbeat API and the watchdog in the foreground.
    Serve,
    /// Print the fleet health summary as JSON and exit.
    ///
    /// Reads the same database the daemon writes; useful for cron jobs and
    /// shell dashboards.
    Summary,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = MonitorConfig::new(args.port, args.data_dir, args.log, args.bind_address);
    let _log_guard = setup_logging(&config.log, args.log_file.as_deref(), &config.log_format);

    match args.command {
        None | Some(Command::Serve) => run_server(config).await,
        Some(Command::Summary) => print_summary(config).await,
    }
}

async fn run_server(config: MonitorConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "vigild starting");
    info!(
        data_dir = %config.data_dir.display(),
        port = config.port,
        tick_secs = config.watchdog.tick_interval_secs,
        repeat_hours = config.alerts.repeat_interval_hours,
        "config loaded"
    );

    if config.auth_token.is_none() {
        warn!("no auth token configured — the heartbeat API accepts unauthenticated requests");
    }

    let notifier: Arc<dyn Notifier> = match (&config.alerts.bot_token, &config.alerts.recipient) {
        (Some(token), recipient) if !recipient.is_empty() => {
            info!(recipient = %recipient, "Slack notifier configured");
            Arc::new(SlackNotifier::new(token.clone()))
        }
        _ => {
            warn!("no Slack token/recipient configured — alerts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    let clock = Arc::new(SystemClock);
    let ctx = AppContext::init(config, notifier, clock.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Watchdog scan loop ───────────────────────────────────────────────────
    let watchdog = Arc::new(Watchdog::new(
        ctx.registry.clone(),
        ctx.dispatcher.clone(),
        clock,
        std::time::Duration::from_secs(ctx.config.watchdog.tick_interval_secs),
    ));
    let watchdog_handle = watchdog.spawn(shutdown_rx.clone());

    // ── Daily summary loop ───────────────────────────────────────────────────
    let summary_handle = if ctx.config.alerts.daily_summary {
        Some(summary::spawn_daily(
            ctx.dispatcher.clone(),
            shutdown_rx.clone(),
        ))
    } else {
        None
    };

    // ── Shutdown on ctrl-c ───────────────────────────────────────────────────
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let run_result = vigild::rest::start(ctx, shutdown_rx).await;

    // The server is down — stop the background loops. On the ctrl-c path they
    // have already observed the signal; on a server error they haven't, and
    // every mutation is transactional so aborting mid-tick loses nothing.
    watchdog_handle.abort();
    if let Some(handle) = summary_handle {
        handle.abort();
    }

    run_result
}

async fn print_summary(config: MonitorConfig) -> Result<()> {
    let storage = Storage::new_with_slow_query(
        &config.data_dir,
        config.observability.slow_query_threshold_ms,
    )
    .await?;
    let report = summary::generate(&storage, &SystemClock).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ─── Logging ──────────────────────────────────────────────────────────────────

/// Initialize tracing with the configured level, format, and optional rolling
/// file output. If the log directory cannot be created, falls back to
/// stdout-only logging with a warning — never panics.
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
            .unwrap_or_else(|| std::ffi::OsStr::new("vigild.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
