mod logging;

pub use logging::{SqliteLogLayer, SqliteLogSink};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Target used for security-relevant records, e.g. commands dropped for
/// lacking the supervisor role. Always persisted by the SQLite layer.
pub const AUDIT_TARGET: &str = "proctor::audit";

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. `RUST_LOG`, when set, replaces it entirely.
    pub log_level: Level,
    /// Whether to persist warn+ and audit records to SQLite.
    pub log_to_sqlite: bool,
    pub log_db_path: PathBuf,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            log_to_sqlite: true,
            log_db_path: home_dir().join("logs.db"),
        }
    }
}

/// Returned by [`init_telemetry`]; reports where records are persisted.
pub struct TelemetryGuard {
    log_db: Option<PathBuf>,
}

impl TelemetryGuard {
    /// Path of the SQLite log database, if it could be opened.
    pub fn log_db(&self) -> Option<&Path> {
        self.log_db.as_deref()
    }
}

fn open_sink(config: &TelemetryConfig) -> Option<SqliteLogLayer> {
    if !config.log_to_sqlite {
        return None;
    }
    match SqliteLogSink::new(&config.log_db_path) {
        Ok(sink) => Some(SqliteLogLayer::new(Arc::new(sink))),
        Err(e) => {
            eprintln!("proctor-telemetry: failed to open log DB: {e}");
            None
        }
    }
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_span_list(true)
        .with_filter(env_filter);

    let sqlite_layer = open_sink(&config);
    let log_db = sqlite_layer.as_ref().map(|_| config.log_db_path.clone());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(sqlite_layer)
        .init();

    TelemetryGuard { log_db }
}

/// Default data directory (`~/.proctor`).
pub fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".proctor")
}
