//! Topic fan-out to connected clients.
//!
//! Two kinds of topic exist: the supervisor group and one group per exam
//! session. Delivery is fire-and-forget; a subscriber whose queue is full
//! or closed misses the frame.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use proctor_core::events::{Audience, OutboundEvent};
use proctor_core::ids::{ConnectionId, SessionId};

use crate::connection::{self, ClientConnection};

#[derive(Default)]
pub struct BroadcastRouter {
    topics: DashMap<Audience, HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, topic: Audience, conn: Arc<ClientConnection>) {
        debug!(conn_id = %conn.id, ?topic, "joined topic");
        let _ = self.topics.entry(topic).or_default().insert(conn.id.clone(), conn);
    }

    pub fn leave(&self, topic: &Audience, conn_id: &ConnectionId) {
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            let _ = subscribers.remove(conn_id);
        }
        let _ = self.topics.remove_if(topic, |_, subscribers| subscribers.is_empty());
    }

    /// Deliver `event` to every subscriber of `topic`. Returns how many
    /// subscribers accepted the frame.
    pub fn publish(&self, topic: &Audience, event: &OutboundEvent) -> usize {
        let subscribers: Vec<Arc<ClientConnection>> = match self.topics.get(topic) {
            Some(subs) => subs.values().cloned().collect(),
            None => return 0,
        };
        let Some(frame) = connection::encode(event) else {
            return 0;
        };

        let mut delivered = 0;
        for conn in &subscribers {
            if conn.send(frame.clone()) {
                delivered += 1;
            } else {
                warn!(conn_id = %conn.id, event = event.name(), "failed to deliver event");
            }
        }
        debug!(event = event.name(), ?topic, recipients = subscribers.len(), delivered, "published");
        delivered
    }

    pub fn broadcast_to_supervisors(&self, event: &OutboundEvent) -> usize {
        self.publish(&Audience::Supervisors, event)
    }

    pub fn send_to_session(&self, session_id: &SessionId, event: &OutboundEvent) -> usize {
        self.publish(&Audience::Session(session_id.clone()), event)
    }

    pub fn send_to_connection(&self, conn: &ClientConnection, event: &OutboundEvent) -> bool {
        conn.send_event(event)
    }

    pub fn subscriber_count(&self, topic: &Audience) -> usize {
        self.topics.get(topic).map_or(0, |subs| subs.len())
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }
}
