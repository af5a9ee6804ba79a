use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info_span, Instrument};

use proctor_core::ids::SessionId;
use proctor_store::sessions::SessionRepo;
use proctor_store::{Database, StoreError};

use crate::command::{Reply, SessionCommand};
use crate::emitter::Emitter;
use crate::error::EngineError;
use crate::{autosave, disqualify, ledger, timer};

/// Display fields attached to supervisor notifications.
#[derive(Clone, Debug)]
pub(crate) struct StudentProfile {
    pub student_id: Option<String>,
    pub student_name: String,
}

/// State owned by one session actor.
pub(crate) struct SessionContext {
    pub session_id: SessionId,
    pub db: Database,
    pub emitter: Emitter,
    profile: Option<StudentProfile>,
}

impl SessionContext {
    pub fn new(session_id: SessionId, db: Database, emitter: Emitter) -> Self {
        Self {
            session_id,
            db,
            emitter,
            profile: None,
        }
    }

    /// Run a blocking store call for this session off the async runtime.
    pub async fn store<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(Database, &SessionId) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let id = self.session_id.clone();
        tokio::task::spawn_blocking(move || f(db, &id))
            .await
            .map_err(|e| EngineError::Internal(format!("store task failed: {e}")))?
            .map_err(|e| EngineError::from_store(&self.session_id, e))
    }

    /// Student display fields, loaded once per actor lifetime.
    pub async fn profile(&mut self) -> Result<StudentProfile, EngineError> {
        if let Some(profile) = &self.profile {
            return Ok(profile.clone());
        }
        let view = self.store(|db, id| SessionRepo::new(db).view(id)).await?;
        let profile = StudentProfile {
            student_id: view.student_id,
            student_name: view.student_name,
        };
        self.profile = Some(profile.clone());
        Ok(profile)
    }
}

/// Process commands until the mailbox closes or stays empty for `idle`.
/// On idle the mailbox is closed first and drained, so every accepted
/// command still gets a reply.
pub(crate) async fn run(
    mut ctx: SessionContext,
    mut rx: mpsc::Receiver<SessionCommand>,
    idle: Duration,
) {
    let span = info_span!("session_actor", session_id = %ctx.session_id);
    async move {
        debug!("session actor started");
        loop {
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Some(cmd)) => handle(&mut ctx, cmd).await,
                Ok(None) => break,
                Err(_) => {
                    rx.close();
                    while let Ok(cmd) = rx.try_recv() {
                        handle(&mut ctx, cmd).await;
                    }
                    debug!("session actor idle");
                    break;
                }
            }
        }
        debug!("session actor stopped");
    }
    .instrument(span)
    .await
}

async fn handle(ctx: &mut SessionContext, cmd: SessionCommand) {
    let name = cmd.name();
    match cmd {
        SessionCommand::RecordViolation { report, reply } => {
            let result = ledger::record(ctx, report).await;
            respond(name, reply, result);
        }
        SessionCommand::SaveAnswer {
            question_id,
            selected_answer,
            reply,
        } => {
            let result = autosave::save(ctx, question_id, selected_answer).await;
            respond(name, reply, result);
        }
        SessionCommand::SaveAnswers { answers, reply } => {
            let result = autosave::save_bulk(ctx, answers).await;
            respond(name, reply, result);
        }
        SessionCommand::Heartbeat {
            time_remaining,
            reply,
        } => {
            let result = timer::heartbeat(ctx, time_remaining).await;
            respond(name, reply, result);
        }
        SessionCommand::Snapshot {
            image,
            timestamp,
            reply,
        } => {
            let result = timer::snapshot(ctx, image, timestamp).await;
            respond(name, reply, result);
        }
        SessionCommand::Connected { reply } => {
            let result = disqualify::connected(ctx).await;
            respond(name, reply, result);
        }
        SessionCommand::Disconnected { reply } => {
            let result = disqualify::disconnected(ctx).await;
            respond(name, reply, result);
        }
        SessionCommand::Warn { message, reply } => {
            let result = disqualify::warn(ctx, message).await;
            respond(name, reply, result);
        }
        SessionCommand::ForceSubmit { reply } => {
            let result = disqualify::force_submit(ctx).await;
            respond(name, reply, result);
        }
        SessionCommand::Disqualify { reason, reply } => {
            let result = disqualify::disqualify(ctx, reason).await;
            respond(name, reply, result);
        }
        SessionCommand::Submit {
            submission_type,
            reply,
        } => {
            let result = disqualify::submit(ctx, submission_type).await;
            respond(name, reply, result);
        }
        SessionCommand::Expire { reply } => {
            let result = disqualify::expire(ctx).await;
            respond(name, reply, result);
        }
    }
}

fn respond<T>(command: &'static str, reply: Reply<T>, result: Result<T, EngineError>) {
    if let Err(e) = &result {
        if e.is_failure() {
            error!(command, error = %e, "session command failed");
        } else {
            debug!(command, error = %e, "session command declined");
        }
    }
    if reply.send(result).is_err() {
        debug!(command, "caller dropped before reply");
    }
}
