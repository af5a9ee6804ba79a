use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use proctor_core::ids::SessionId;
use proctor_store::Database;

use crate::actor::{self, SessionContext};
use crate::command::{Reply, SessionCommand};
use crate::emitter::Emitter;
use crate::error::EngineError;

#[derive(Clone)]
struct ActorHandle {
    tx: mpsc::Sender<SessionCommand>,
    generation: u64,
    /// Resolves once the actor task has finished, drain included.
    stopped: watch::Receiver<()>,
}

/// Owns the live session actors, spawning one on first use and again after
/// an actor goes idle or dies.
pub(crate) struct SessionHub {
    actors: Arc<DashMap<SessionId, ActorHandle>>,
    db: Database,
    emitter: Emitter,
    mailbox_capacity: usize,
    idle_timeout: Duration,
    generation: AtomicU64,
}

impl SessionHub {
    pub fn new(
        db: Database,
        emitter: Emitter,
        mailbox_capacity: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            actors: Arc::new(DashMap::new()),
            db,
            emitter,
            mailbox_capacity: mailbox_capacity.max(1),
            idle_timeout,
            generation: AtomicU64::new(0),
        }
    }

    /// Number of sessions with a running actor.
    pub fn active_actors(&self) -> usize {
        self.actors.len()
    }

    fn handle(&self, session_id: &SessionId) -> ActorHandle {
        self.actors
            .entry(session_id.clone())
            .or_insert_with(|| self.spawn(session_id))
            .clone()
    }

    fn spawn(&self, session_id: &SessionId) -> ActorHandle {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let ctx = SessionContext::new(session_id.clone(), self.db.clone(), self.emitter.clone());
        let actors = Arc::clone(&self.actors);
        let id = session_id.clone();
        let idle = self.idle_timeout;
        let (alive, stopped) = watch::channel(());

        tokio::spawn(async move {
            actor::run(ctx, rx, idle).await;
            actors.remove_if(&id, |_, h| h.generation == generation);
            drop(alive);
        });
        debug!(session_id = %session_id, generation, "session actor spawned");
        ActorHandle {
            tx,
            generation,
            stopped,
        }
    }

    /// Enqueue a command. A closed mailbox means the actor is retiring; the
    /// replacement is only spawned after it has finished draining, so a
    /// session never has two actors at once.
    async fn send(&self, session_id: &SessionId, cmd: SessionCommand) -> Result<(), EngineError> {
        let mut cmd = cmd;
        for _ in 0..2 {
            let handle = self.handle(session_id);
            match handle.tx.send(cmd).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    let mut stopped = handle.stopped.clone();
                    // Only ever errors, once the actor task has ended.
                    let _ = stopped.changed().await;
                    debug!(session_id = %session_id, generation = handle.generation, "session actor retired, respawning");
                    self.actors
                        .remove_if(session_id, |_, h| h.generation == handle.generation);
                    cmd = returned;
                }
            }
        }
        warn!(session_id = %session_id, "session actor unavailable after respawn");
        Err(EngineError::ActorUnavailable(session_id.clone()))
    }

    /// Send a command built around a reply channel and wait for the answer.
    pub async fn request<T>(
        &self,
        session_id: &SessionId,
        make: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(session_id, make(tx)).await?;
        rx.await
            .map_err(|_| EngineError::ActorUnavailable(session_id.clone()))?
    }
}
