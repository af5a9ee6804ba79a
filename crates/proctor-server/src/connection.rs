//! One live WebSocket connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use proctor_core::events::OutboundEvent;
use proctor_core::ids::{ConnectionId, SessionId};
use proctor_core::Principal;

/// Outbound side of a connection plus its identity and liveness.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub principal: Principal,
    /// Frames queued for the socket's write task.
    tx: mpsc::Sender<Arc<str>>,
    pub connected_at: Instant,
    /// Last inbound frame or pong.
    last_seen: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(principal: Principal, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            principal,
            tx,
            connected_at: now,
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// The exam session this connection belongs to, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.principal.session_id.as_ref()
    }

    pub fn is_supervisor(&self) -> bool {
        self.principal.is_supervisor()
    }

    /// Enqueue an already-serialized frame. Never blocks: a full or closed
    /// queue drops the frame and returns `false`.
    pub fn send(&self, frame: Arc<str>) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(conn_id = %self.id, dropped, "send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Serialize and enqueue one event.
    pub fn send_event(&self, event: &OutboundEvent) -> bool {
        match encode(event) {
            Some(frame) => self.send(frame),
            None => false,
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn mark_seen(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

/// Wire form of an outbound event.
pub fn encode(event: &OutboundEvent) -> Option<Arc<str>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to serialize event");
            None
        }
    }
}
