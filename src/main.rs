//! # proctor
//!
//! Proctoring server binary: loads configuration, initializes telemetry,
//! opens the session store and serves the WebSocket and HTTP gateway.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tracing::Level;

use proctor_core::ids::{SessionId, UserId};
use proctor_core::{Principal, Role};
use proctor_server::config::AuthConfig;
use proctor_server::{load_config, JwtAuthenticator, ProctorConfig, ServerError};
use proctor_store::Database;
use proctor_telemetry::{home_dir, init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "proctor", version, about = "Proctored exam session server")]
struct Cli {
    /// JSON config file, merged over built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Shared JWT secret (overrides PROCTOR_JWT_SECRET).
    #[arg(long, global = true)]
    jwt_secret: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server until ctrl-c.
    Serve {
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Print a signed token, for local testing without the login service.
    MintToken {
        #[arg(long)]
        user: UserId,
        /// STUDENT or ADMIN.
        #[arg(long, default_value = "STUDENT")]
        role: Role,
        /// Exam session a student token is bound to.
        #[arg(long)]
        session: Option<SessionId>,
        /// Lifetime in seconds; defaults to `auth.token_ttl_secs`.
        #[arg(long)]
        ttl: Option<u64>,
    },
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn authenticator(auth: &AuthConfig) -> Result<JwtAuthenticator> {
    let secret = auth.jwt_secret.as_ref().ok_or(ServerError::MissingSecret)?;
    Ok(JwtAuthenticator::new(secret))
}

fn telemetry_config(config: &ProctorConfig) -> TelemetryConfig {
    let logging = &config.logging;
    let log_level = logging.level.parse::<Level>().unwrap_or_else(|_| {
        eprintln!("proctor: unknown log level {:?}, using info", logging.level);
        Level::INFO
    });
    TelemetryConfig {
        log_level,
        log_to_sqlite: logging.log_to_sqlite,
        log_db_path: logging
            .log_db_path
            .clone()
            .unwrap_or_else(|| home_dir().join("logs.db")),
    }
}

async fn serve(config: ProctorConfig) -> Result<()> {
    let telemetry = telemetry_config(&config);
    if telemetry.log_to_sqlite {
        ensure_parent_dir(&telemetry.log_db_path)?;
    }
    let guard = init_telemetry(telemetry);
    if let Some(path) = guard.log_db() {
        tracing::info!(path = %path.display(), "persisting warnings and audit records");
    }

    let auth = authenticator(&config.auth)?;

    let db_path = config.store.resolved_db_path();
    ensure_parent_dir(&db_path)?;
    let db = Database::open_with(&db_path, &config.store.pool_config())
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    let handle = proctor_server::start(
        config.server.clone(),
        config.engine.to_engine_config(),
        db,
        Arc::new(auth),
    )
    .await?;
    tracing::info!(port = handle.port, "proctor server ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    handle.shutdown(None).await;
    Ok(())
}

fn mint_token(
    config: &ProctorConfig,
    user: UserId,
    role: Role,
    session: Option<SessionId>,
    ttl: Option<u64>,
) -> Result<String> {
    let auth = authenticator(&config.auth)?;
    let principal = Principal {
        user_id: user,
        role,
        session_id: session,
    };
    let ttl = Duration::from_secs(ttl.unwrap_or(config.auth.token_ttl_secs));
    Ok(auth.issue(&principal, ttl)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(secret) = cli.jwt_secret {
        config.auth.jwt_secret = Some(SecretString::from(secret));
    }

    match cli.command {
        Command::Serve {
            host,
            port,
            db_path,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if db_path.is_some() {
                config.store.db_path = db_path;
            }
            serve(config).await
        }
        Command::MintToken {
            user,
            role,
            session,
            ttl,
        } => {
            let token = mint_token(&config, user, role, session, ttl)?;
            println!("{token}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_secret() -> ProctorConfig {
        let mut config = ProctorConfig::default();
        config.auth.jwt_secret = Some(SecretString::from("cli-secret"));
        config
    }

    #[test]
    fn cli_parses_serve_overrides() {
        let cli = Cli::parse_from(["proctor", "--config", "/etc/proctor.json", "serve", "--port", "0"]);
        assert_eq!(cli.config.as_deref(), Some(Path::new("/etc/proctor.json")));
        match cli.command {
            Command::Serve { port, host, .. } => {
                assert_eq!(port, Some(0));
                assert!(host.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_unknown_role() {
        let parsed = Cli::try_parse_from(["proctor", "mint-token", "--user", "usr_1", "--role", "root"]);
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn minted_token_verifies_with_same_secret() {
        use proctor_server::Authenticator;

        let config = config_with_secret();
        let sid = SessionId::from_raw("sess_1");
        let token = mint_token(
            &config,
            UserId::from_raw("usr_1"),
            Role::Student,
            Some(sid.clone()),
            Some(60),
        )
        .unwrap();

        let auth = authenticator(&config.auth).unwrap();
        let principal = auth.authenticate(&token).await.unwrap();
        assert_eq!(principal.session_id, Some(sid));
        assert_eq!(principal.role, Role::Student);
    }

    #[test]
    fn mint_without_secret_fails() {
        let config = ProctorConfig::default();
        let err = mint_token(&config, UserId::new(), Role::Admin, None, None).unwrap_err();
        assert!(err.to_string().contains("JWT secret"));
    }

    #[test]
    fn telemetry_falls_back_to_info_and_home_log_db() {
        let mut config = ProctorConfig::default();
        config.logging.level = "loud".into();
        let t = telemetry_config(&config);
        assert_eq!(t.log_level, Level::INFO);
        assert!(t.log_db_path.ends_with(".proctor/logs.db"));
    }
}
