//! Connection registry: which sessions currently hold live handles.
//!
//! Rebuilt empty on every start and never persisted. Registering a
//! connection also subscribes it to its broadcast topic.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use proctor_core::events::Audience;
use proctor_core::ids::{ConnectionId, SessionId};

use crate::broadcast::BroadcastRouter;
use crate::connection::ClientConnection;

#[derive(Default)]
struct SessionPresence {
    handles: HashSet<ConnectionId>,
    last_heartbeat: Option<Instant>,
}

pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    sessions: DashMap<SessionId, SessionPresence>,
    router: Arc<BroadcastRouter>,
}

impl ConnectionRegistry {
    pub fn new(router: Arc<BroadcastRouter>) -> Self {
        Self {
            connections: DashMap::new(),
            sessions: DashMap::new(),
            router,
        }
    }

    /// Track `conn` and join its topic. Returns `true` when it is the first
    /// live handle of its session.
    pub fn register_connection(&self, conn: Arc<ClientConnection>) -> bool {
        let _ = self.connections.insert(conn.id.clone(), Arc::clone(&conn));

        if conn.is_supervisor() {
            self.router.join(Audience::Supervisors, conn);
            return false;
        }
        let Some(session_id) = conn.session_id().cloned() else {
            return false;
        };

        let first = {
            let mut presence = self.sessions.entry(session_id.clone()).or_default();
            let _ = presence.handles.insert(conn.id.clone());
            presence.handles.len() == 1
        };
        debug!(conn_id = %conn.id, session_id = %session_id, first, "connection registered");
        self.router.join(Audience::Session(session_id), conn);
        first
    }

    /// Forget `conn` and leave its topic. Returns `true` when it was the
    /// last live handle of its session.
    pub fn remove_connection(&self, conn: &ClientConnection) -> bool {
        let _ = self.connections.remove(&conn.id);

        if conn.is_supervisor() {
            self.router.leave(&Audience::Supervisors, &conn.id);
            return false;
        }
        let Some(session_id) = conn.session_id() else {
            return false;
        };
        self.router.leave(&Audience::Session(session_id.clone()), &conn.id);

        let mut last = false;
        if let Some(mut presence) = self.sessions.get_mut(session_id) {
            last = presence.handles.remove(&conn.id) && presence.handles.is_empty();
        }
        let _ = self
            .sessions
            .remove_if(session_id, |_, presence| presence.handles.is_empty());
        debug!(conn_id = %conn.id, session_id = %session_id, last, "connection removed");
        last
    }

    pub fn is_online(&self, session_id: &SessionId) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|p| !p.handles.is_empty())
    }

    pub fn list_online(&self) -> HashSet<SessionId> {
        self.sessions
            .iter()
            .filter(|e| !e.handles.is_empty())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Record a heartbeat for an online session.
    pub fn touch(&self, session_id: &SessionId) {
        if let Some(mut presence) = self.sessions.get_mut(session_id) {
            presence.last_heartbeat = Some(Instant::now());
        }
    }

    /// Time since the session's last heartbeat, if it is online and has sent one.
    pub fn since_heartbeat(&self, session_id: &SessionId) -> Option<Duration> {
        self.sessions
            .get(session_id)
            .and_then(|p| p.last_heartbeat)
            .map(|t| t.elapsed())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn handle_count(&self, session_id: &SessionId) -> usize {
        self.sessions.get(session_id).map_or(0, |p| p.handles.len())
    }
}
