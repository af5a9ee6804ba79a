//! Server configuration.
//!
//! Loading flow:
//! 1. Start with [`ProctorConfig::default()`]
//! 2. If a JSON config file is given and exists, deep-merge it over defaults
//! 3. Apply `PROCTOR_*` environment overrides (highest priority)
//!
//! The JWT secret is never read from the file; it comes from
//! `PROCTOR_JWT_SECRET` or the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use proctor_engine::EngineConfig;
use proctor_store::PoolConfig;

use crate::error::ConfigError;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctorConfig {
    pub server: ServerConfig,
    pub engine: EngineSettings,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

/// Transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// Capacity of the engine's outbound event channel.
    pub event_buffer: usize,
    /// Seconds between server-initiated pings.
    pub heartbeat_interval_secs: u64,
    /// Close a connection silent for this many seconds.
    pub heartbeat_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            max_send_queue: 256,
            event_buffer: 1024,
            heartbeat_interval_secs: 25,
            heartbeat_timeout_secs: 60,
            max_message_size: 4 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub mailbox_capacity: usize,
    pub idle_timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            mailbox_capacity: engine.mailbox_capacity,
            idle_timeout_secs: engine.idle_timeout.as_secs(),
        }
    }
}

impl EngineSettings {
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            mailbox_capacity: self.mailbox_capacity,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Session database path. Defaults to `~/.proctor/proctor.db`.
    pub db_path: Option<PathBuf>,
    /// Pooled connections shared by the session actors.
    pub pool_size: u32,
    pub busy_timeout_ms: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            db_path: None,
            pool_size: pool.pool_size,
            busy_timeout_ms: pool.busy_timeout_ms,
        }
    }
}

impl StoreConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_size: self.pool_size,
            busy_timeout_ms: self.busy_timeout_ms,
            ..Default::default()
        }
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| proctor_telemetry::home_dir().join("proctor.db"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(skip)]
    pub jwt_secret: Option<SecretString>,
    /// Lifetime of tokens minted by `mint-token`.
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_secs: 4 * 60 * 60,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_sqlite: bool,
    pub log_db_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            log_to_sqlite: true,
            log_db_path: None,
        }
    }
}

/// Load config from `path` (if it exists) with env overrides applied.
pub fn load_config(path: Option<&Path>) -> Result<ProctorConfig, ConfigError> {
    let defaults = serde_json::to_value(ProctorConfig::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading config file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "config file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut config: ProctorConfig = serde_json::from_value(merged)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Objects merge per key; arrays and primitives are replaced; nulls in
/// `source` leave `target` untouched.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `PROCTOR_*` overrides. Values that fail to parse or fall outside
/// their range are ignored with a warning.
pub fn apply_env_overrides(config: &mut ProctorConfig, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("PROCTOR_HOST") {
        config.server.host = v;
    }
    if let Some(v) = ranged(&read, "PROCTOR_PORT", 0u16, u16::MAX) {
        config.server.port = v;
    }
    if let Some(v) = ranged(&read, "PROCTOR_MAX_SEND_QUEUE", 1usize, 65_536) {
        config.server.max_send_queue = v;
    }
    if let Some(v) = ranged(&read, "PROCTOR_HEARTBEAT_INTERVAL_SECS", 1u64, 600) {
        config.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = ranged(&read, "PROCTOR_HEARTBEAT_TIMEOUT_SECS", 1u64, 3600) {
        config.server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = ranged(&read, "PROCTOR_MAILBOX_CAPACITY", 1usize, 65_536) {
        config.engine.mailbox_capacity = v;
    }
    if let Some(v) = ranged(&read, "PROCTOR_IDLE_TIMEOUT_SECS", 1u64, 86_400) {
        config.engine.idle_timeout_secs = v;
    }
    if let Some(v) = ranged(&read, "PROCTOR_DB_POOL_SIZE", 1u32, 256) {
        config.store.pool_size = v;
    }
    if let Some(v) = read("PROCTOR_DB_PATH") {
        config.store.db_path = Some(PathBuf::from(v));
    }
    if let Some(v) = read("PROCTOR_JWT_SECRET") {
        config.auth.jwt_secret = Some(SecretString::from(v));
    }
    if let Some(v) = read("PROCTOR_LOG_LEVEL") {
        config.logging.level = v;
    }
    if let Some(v) = read("PROCTOR_LOG_TO_SQLITE") {
        match parse_bool(&v) {
            Some(b) => config.logging.log_to_sqlite = b,
            None => tracing::warn!(key = "PROCTOR_LOG_TO_SQLITE", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

/// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_range<T: std::str::FromStr + PartialOrd>(val: &str, min: T, max: T) -> Option<T> {
    let n: T = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn ranged<T: std::str::FromStr + PartialOrd>(
    read: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: T,
    max: T,
) -> Option<T> {
    let val = read(name)?;
    let result = parse_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "out-of-range env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults() {
        let cfg = ProctorConfig::default();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.engine.mailbox_capacity, 64);
        assert!(cfg.auth.jwt_secret.is_none());
        assert!(cfg.store.resolved_db_path().ends_with(".proctor/proctor.db"));
    }

    #[test]
    fn merge_nested_override_keeps_siblings() {
        let merged = deep_merge(
            json!({"server": {"host": "a", "port": 1}}),
            json!({"server": {"port": 2}, "extra": null}),
        );
        assert_eq!(merged, json!({"server": {"host": "a", "port": 2}}));
    }

    #[test]
    fn merge_replaces_arrays_and_primitives() {
        assert_eq!(deep_merge(json!([1, 2]), json!([3])), json!([3]));
        assert_eq!(deep_merge(json!({"a": 1}), json!(5)), json!(5));
    }

    #[test]
    fn load_from_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proctor.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 4100}, "engine": {"idle_timeout_secs": 9}}"#,
        )
        .unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.server.port, 4100);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.engine.idle_timeout_secs, 9);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(cfg.server.max_send_queue, 256);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Json(_))));
    }

    #[test]
    fn env_overrides_apply_with_ranges() {
        let mut cfg = ProctorConfig::default();
        apply_env_overrides(
            &mut cfg,
            env(&[
                ("PROCTOR_PORT", "8080"),
                ("PROCTOR_MAILBOX_CAPACITY", "0"),
                ("PROCTOR_HEARTBEAT_TIMEOUT_SECS", "abc"),
                ("PROCTOR_JWT_SECRET", "s3cret"),
                ("PROCTOR_LOG_TO_SQLITE", "off"),
                ("PROCTOR_HOST", ""),
                ("PROCTOR_DB_POOL_SIZE", "4"),
            ]),
        );
        assert_eq!(cfg.store.pool_size, 4);
        assert_eq!(cfg.store.pool_config().pool_size, 4);
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.engine.mailbox_capacity, 64);
        assert_eq!(cfg.server.heartbeat_timeout_secs, 60);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert!(!cfg.logging.log_to_sqlite);
        assert_eq!(cfg.auth.jwt_secret.unwrap().expose_secret(), "s3cret");
    }

    #[test]
    fn secret_is_not_serialized() {
        let mut cfg = ProctorConfig::default();
        cfg.auth.jwt_secret = Some(SecretString::from("hidden"));
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("hidden"));
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_range("70", 1u16, 65535), Some(70));
        assert_eq!(parse_range("70000", 1u64, 600), None);
    }
}
