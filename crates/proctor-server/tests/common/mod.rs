//! Shared harness for the end-to-end tests: a real server on an ephemeral
//! port over an on-disk store, plus a small WebSocket client toolkit.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde_json::Value;
use tempfile::TempDir;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use proctor_core::ids::{ExamId, SessionId};
use proctor_core::{Principal, Role};
use proctor_engine::{EngineConfig, ProctorEngine};
use proctor_server::{start, JwtAuthenticator, ServerConfig, ServerHandle};
use proctor_store::exams::ExamRepo;
use proctor_store::users::UserRepo;
use proctor_store::Database;

pub const TIMEOUT: Duration = Duration::from_secs(5);
const SECRET: &str = "integration-secret";

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub struct TestServer {
    pub handle: ServerHandle,
    pub db: Database,
    pub exam: ExamId,
    pub base_url: String,
    pub ws_url: String,
    auth: JwtAuthenticator,
    _dir: TempDir,
}

impl TestServer {
    pub async fn boot(max_violations: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("proctor.db")).unwrap();
        let exam = ExamRepo::new(db.clone())
            .create("CS101", "Intro to Computing", 45, max_violations)
            .unwrap();

        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let secret = SecretString::from(SECRET);
        let handle = start(
            config,
            EngineConfig::default(),
            db.clone(),
            Arc::new(JwtAuthenticator::new(&secret)),
        )
        .await
        .unwrap();

        Self {
            base_url: format!("http://127.0.0.1:{}", handle.port),
            ws_url: format!("ws://127.0.0.1:{}/ws", handle.port),
            handle,
            db,
            exam: exam.id,
            auth: JwtAuthenticator::new(&secret),
            _dir: dir,
        }
    }

    pub fn engine(&self) -> &ProctorEngine {
        self.handle.engine()
    }

    /// Seed a student and open their session for the test exam.
    pub async fn student(&self, name: &str, number: &str) -> Principal {
        let user = UserRepo::new(self.db.clone())
            .create(Some(number), name, Role::Student)
            .unwrap();
        let row = self
            .engine()
            .open_session(user.id.clone(), self.exam.clone(), None)
            .await
            .unwrap();
        Principal::student(user.id, row.id)
    }

    pub fn supervisor(&self) -> Principal {
        let user = UserRepo::new(self.db.clone())
            .create(None, "Proctor", Role::Admin)
            .unwrap();
        Principal::supervisor(user.id)
    }

    pub fn token(&self, principal: &Principal) -> String {
        self.auth.issue(principal, Duration::from_secs(600)).unwrap()
    }

    /// Open a socket and wait until the server has registered it.
    pub async fn connect(&self, principal: &Principal) -> WsStream {
        let before = self.handle.registry().connection_count();
        let url = format!("{}?token={}", self.ws_url, self.token(principal));
        let (ws, _) = timeout(TIMEOUT, connect_async(url.as_str()))
            .await
            .unwrap()
            .unwrap();
        self.wait_for(|s| s.handle.registry().connection_count() > before)
            .await;
        ws
    }

    /// Poll `cond` until it holds or the test times out.
    pub async fn wait_for(&self, cond: impl Fn(&Self) -> bool) {
        let deadline = Instant::now() + TIMEOUT;
        while !cond(self) {
            assert!(Instant::now() < deadline, "condition not reached in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(self) {
        self.handle.shutdown(Some(Duration::from_secs(2))).await;
    }
}

pub fn session_of(principal: &Principal) -> SessionId {
    principal.session_id.clone().unwrap()
}

pub async fn send(ws: &mut WsStream, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Next event frame, skipping control frames.
pub async fn next_event(ws: &mut WsStream, within: Duration) -> Option<Value> {
    let deadline = Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let msg = timeout(remaining, ws.next()).await.ok()??.ok()?;
        if let Message::Text(text) = msg {
            return Some(serde_json::from_str(text.as_str()).unwrap());
        }
    }
}

/// Wait for the first event called `name`, discarding others.
pub async fn recv_event(ws: &mut WsStream, name: &str) -> Value {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Some(frame) = next_event(ws, remaining).await else {
            panic!("no `{name}` event before timeout");
        };
        if frame["event"] == name {
            return frame;
        }
    }
}

/// Assert no event called `name` arrives within `within`.
pub async fn expect_none(ws: &mut WsStream, name: &str, within: Duration) {
    let deadline = Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match next_event(ws, remaining).await {
            Some(frame) => assert_ne!(frame["event"], name, "unexpected {frame}"),
            None => return,
        }
    }
}
