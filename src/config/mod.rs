use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 8600;
const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
const DEFAULT_REPEAT_INTERVAL_HOURS: i64 = 6;

/// Default declared interval when a heartbeat omits one (hours).
pub const DEFAULT_EXPECTED_INTERVAL_HOURS: i64 = 24;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── WatchdogConfig ───────────────────────────────────────────────────────────

/// Watchdog scan cadence (`[watchdog]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Seconds between overdue scans. Default: 60.
    pub tick_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: DEFAULT_TICK_INTERVAL_SECS,
        }
    }
}

// ─── AlertsConfig ─────────────────────────────────────────────────────────────

/// Alert delivery configuration (`[alerts]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Hours before an unresolved episode is re-alerted. Default: 6.
    pub repeat_interval_hours: i64,
    /// Slack user id (`U…`, opens a DM) or channel id the alerts go to.
    /// Empty = alerts fall back to the daemon log.
    pub recipient: String,
    /// Slack bot token. Also read from the SLACK_BOT_TOKEN env var.
    /// None = alerts fall back to the daemon log.
    pub bot_token: Option<String>,
    /// Send the fleet health summary on a 24 h loop. Default: true.
    pub daily_summary: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            repeat_interval_hours: DEFAULT_REPEAT_INTERVAL_HOURS,
            recipient: String::new(),
            bot_token: None,
            daily_summary: true,
        }
    }
}

// ─── ObservabilityConfig ──────────────────────────────────────────────────────

/// Daemon observability configuration (`[observability]` in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log SQLite queries that exceed this threshold (milliseconds). Default: 100.
    /// Set to 0 to disable slow query logging.
    pub slow_query_threshold_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 100,
        }
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// HTTP server port (default: 8600).
    port: Option<u16>,
    /// Bind address (default: "127.0.0.1"; use "0.0.0.0" for LAN access).
    bind_address: Option<String>,
    /// Log level filter string, e.g. "debug", "info,vigild=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured for log aggregators).
    log_format: Option<String>,
    /// Token required in the X-Auth-Token header. None = auth disabled.
    auth_token: Option<String>,
    /// Watchdog configuration (`[watchdog]`).
    watchdog: Option<WatchdogConfig>,
    /// Alert configuration (`[alerts]`).
    alerts: Option<AlertsConfig>,
    /// Observability configuration (`[observability]`).
    observability: Option<ObservabilityConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── MonitorConfig ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub port: u16,
    /// Bind address for the HTTP server (VIGILD_BIND env var, default: "127.0.0.1").
    pub bind_address: String,
    pub data_dir: PathBuf,
    pub log: String,
    /// Log output format: "pretty" (default) | "json".
    pub log_format: String,
    /// Token required in the X-Auth-Token header (VIGILD_AUTH_TOKEN env var).
    /// None = authentication disabled (local-only, trusted loopback use).
    pub auth_token: Option<String>,
    /// Watchdog scan cadence.
    pub watchdog: WatchdogConfig,
    /// Alert delivery: repeat interval, recipient, Slack token, daily summary.
    pub alerts: AlertsConfig,
    /// Observability: slow query threshold.
    pub observability: ObservabilityConfig,
}

impl MonitorConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("VIGILD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("VIGILD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let auth_token = std::env::var("VIGILD_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or(toml.auth_token);

        let watchdog = toml.watchdog.unwrap_or_default();

        let mut alerts = toml.alerts.unwrap_or_default();
        if let Ok(token) = std::env::var("SLACK_BOT_TOKEN") {
            if !token.is_empty() {
                alerts.bot_token = Some(token);
            }
        }
        if let Ok(recipient) = std::env::var("VIGILD_ALERT_RECIPIENT") {
            if !recipient.is_empty() {
                alerts.recipient = recipient;
            }
        }

        let observability = toml.observability.unwrap_or_default();

        Self {
            port,
            bind_address,
            data_dir,
            log,
            log_format,
            auth_token,
            watchdog,
            alerts,
            observability,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/vigild
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("vigild");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/vigild or ~/.local/share/vigild
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("vigild");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("vigild");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\vigild
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("vigild");
        }
    }
    // Fallback
    PathBuf::from(".vigild")
}
