//! HTTP and WebSocket gateway for the proctoring engine.

pub mod api;
pub mod auth;
pub mod bridge;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod socket;

pub use auth::{Authenticator, JwtAuthenticator};
pub use config::{load_config, ProctorConfig, ServerConfig};
pub use error::{ApiError, AuthError, ConfigError, ServerError};
pub use server::{build_router, start, AppState, ServerHandle};
