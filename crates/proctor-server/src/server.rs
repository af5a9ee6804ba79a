//! Axum HTTP + WebSocket server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use proctor_engine::{EngineConfig, ProctorEngine};
use proctor_store::Database;

use crate::auth::Authenticator;
use crate::broadcast::BroadcastRouter;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::{api, bridge, socket};

/// Shared state handed to every handler and connection task.
#[derive(Clone)]
pub struct AppState {
    pub engine: ProctorEngine,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<BroadcastRouter>,
    pub authenticator: Arc<dyn Authenticator>,
    pub config: Arc<ServerConfig>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        engine: ProctorEngine,
        authenticator: Arc<dyn Authenticator>,
        config: ServerConfig,
    ) -> Self {
        let router = Arc::new(BroadcastRouter::new());
        Self {
            engine,
            registry: Arc::new(ConnectionRegistry::new(Arc::clone(&router))),
            router,
            authenticator,
            config: Arc::new(config),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(socket::ws_handler))
        .route("/health", get(api::health))
        .route("/api/monitor/live", get(api::live_sessions))
        .route("/api/exams/{id}/live", get(api::exam_live_sessions))
        .route("/api/sessions/{id}/violations", get(api::session_violations))
        .route("/api/sessions/{id}/submit", post(api::submit_session))
        .route("/api/sessions/{id}/expire", post(api::expire_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, wire the engine to the router, and serve in the background.
pub async fn start(
    config: ServerConfig,
    engine_config: EngineConfig,
    db: Database,
    authenticator: Arc<dyn Authenticator>,
) -> Result<ServerHandle, ServerError> {
    let (event_tx, event_rx) = broadcast::channel(config.event_buffer.max(16));
    let engine = ProctorEngine::new(db, event_tx, engine_config);

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(engine, authenticator, config);
    let shutdown = Arc::clone(&state.shutdown);

    let bridge = bridge::spawn_bridge(Arc::clone(&state.router), event_rx, shutdown.token());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "proctor server listening");

    let engine = state.engine.clone();
    let registry = Arc::clone(&state.registry);
    let app = build_router(state);
    let token = shutdown.token();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        engine,
        registry,
        shutdown,
        tasks: vec![server, bridge],
    })
}

/// Keeps the server's background tasks alive until [`ServerHandle::shutdown`].
pub struct ServerHandle {
    pub port: u16,
    engine: ProctorEngine,
    registry: Arc<ConnectionRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn engine(&self) -> &ProctorEngine {
        &self.engine
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Close every connection and wait for the server tasks to stop.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        info!("shutting down");
        self.shutdown.graceful_shutdown(self.tasks, timeout).await;
    }
}
