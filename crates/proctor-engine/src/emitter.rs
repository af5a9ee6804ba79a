use tokio::sync::broadcast;
use tracing::trace;

use proctor_core::events::{Dispatch, OutboundEvent};
use proctor_core::ids::SessionId;

/// Ordered outbound channel from session actors to the transport's router.
#[derive(Clone)]
pub struct Emitter {
    tx: broadcast::Sender<Dispatch>,
}

impl Emitter {
    pub fn new(tx: broadcast::Sender<Dispatch>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Dispatch> {
        self.tx.subscribe()
    }

    pub fn to_supervisors(&self, event: OutboundEvent) {
        self.emit(Dispatch::supervisors(event));
    }

    pub fn to_session(&self, session_id: &SessionId, event: OutboundEvent) {
        self.emit(Dispatch::session(session_id.clone(), event));
    }

    fn emit(&self, dispatch: Dispatch) {
        let name = dispatch.event.name();
        if self.tx.send(dispatch).is_err() {
            trace!(event = name, "no event subscribers");
        }
    }
}
