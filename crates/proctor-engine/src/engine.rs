use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use proctor_core::events::{Dispatch, ViolationReport};
use proctor_core::ids::{ExamId, QuestionId, SessionId, UserId};
use proctor_core::SubmissionType;
use proctor_store::answers::AnswerRow;
use proctor_store::sessions::{SessionRepo, SessionRow, SessionView, Transition};
use proctor_store::violations::{ViolationRepo, ViolationRow};
use proctor_store::{Database, StoreError};

use crate::command::SessionCommand;
use crate::emitter::Emitter;
use crate::error::EngineError;
use crate::hub::SessionHub;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Bound of each session actor's mailbox.
    pub mailbox_capacity: usize,
    /// How long an actor may sit without work before it retires.
    pub idle_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// What the originating connection is told after a violation is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReceipt {
    pub violation_count: u32,
    pub max_violations: u32,
    /// This violation moved the session to `DISQUALIFIED`.
    pub disqualified: bool,
}

/// Entry point for every session operation. Mutations are routed to the
/// session's actor; reads go straight to the store.
#[derive(Clone)]
pub struct ProctorEngine {
    hub: Arc<SessionHub>,
    db: Database,
    emitter: Emitter,
}

impl ProctorEngine {
    pub fn new(db: Database, event_tx: broadcast::Sender<Dispatch>, config: EngineConfig) -> Self {
        let emitter = Emitter::new(event_tx);
        let hub = Arc::new(SessionHub::new(
            db.clone(),
            emitter.clone(),
            config.mailbox_capacity,
            config.idle_timeout,
        ));
        Self { hub, db, emitter }
    }

    /// Receive every outbound event, in emission order.
    pub fn subscribe(&self) -> broadcast::Receiver<Dispatch> {
        self.emitter.subscribe()
    }

    pub fn active_actors(&self) -> usize {
        self.hub.active_actors()
    }

    // ── Violation ledger ──

    pub async fn record_violation(
        &self,
        session_id: &SessionId,
        report: ViolationReport,
    ) -> Result<ViolationReceipt, EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::RecordViolation { report, reply })
            .await
    }

    // ── Autosave ──

    pub async fn save_answer(
        &self,
        session_id: &SessionId,
        question_id: QuestionId,
        selected_answer: Option<String>,
    ) -> Result<AnswerRow, EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::SaveAnswer {
                question_id,
                selected_answer,
                reply,
            })
            .await
    }

    pub async fn save_answers(
        &self,
        session_id: &SessionId,
        answers: Vec<(QuestionId, Option<String>)>,
    ) -> Result<usize, EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::SaveAnswers { answers, reply })
            .await
    }

    // ── Timer ──

    pub async fn heartbeat(
        &self,
        session_id: &SessionId,
        time_remaining: i64,
    ) -> Result<SessionRow, EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::Heartbeat {
                time_remaining,
                reply,
            })
            .await
    }

    pub async fn snapshot(
        &self,
        session_id: &SessionId,
        image: String,
        timestamp: Option<i64>,
    ) -> Result<(), EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::Snapshot {
                image,
                timestamp,
                reply,
            })
            .await
    }

    // ── Presence ──

    pub async fn connected(&self, session_id: &SessionId) -> Result<SessionRow, EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::Connected { reply })
            .await
    }

    pub async fn disconnected(&self, session_id: &SessionId) -> Result<Transition, EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::Disconnected { reply })
            .await
    }

    // ── Supervisor commands ──

    pub async fn warn(&self, session_id: &SessionId, message: String) -> Result<(), EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::Warn { message, reply })
            .await
    }

    pub async fn force_submit(&self, session_id: &SessionId) -> Result<(), EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::ForceSubmit { reply })
            .await
    }

    pub async fn disqualify(
        &self,
        session_id: &SessionId,
        reason: String,
    ) -> Result<Transition, EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::Disqualify { reason, reply })
            .await
    }

    // ── External collaborators ──

    pub async fn submit(
        &self,
        session_id: &SessionId,
        submission_type: SubmissionType,
    ) -> Result<Transition, EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::Submit {
                submission_type,
                reply,
            })
            .await
    }

    pub async fn expire(&self, session_id: &SessionId) -> Result<Transition, EngineError> {
        self.hub
            .request(session_id, |reply| SessionCommand::Expire { reply })
            .await
    }

    // ── Reads ──

    /// Start or resume the student's session for an exam.
    pub async fn open_session(
        &self,
        user_id: UserId,
        exam_id: ExamId,
        client_address: Option<String>,
    ) -> Result<SessionRow, EngineError> {
        self.read(move |db| {
            SessionRepo::new(db).open_or_resume(&user_id, &exam_id, client_address.as_deref())
        })
        .await
    }

    pub async fn session(&self, session_id: &SessionId) -> Result<SessionRow, EngineError> {
        let id = session_id.clone();
        self.read(move |db| SessionRepo::new(db).get(&id))
            .await
            .map_err(|e| classify(session_id, e))
    }

    pub async fn live_sessions(&self) -> Result<Vec<SessionView>, EngineError> {
        self.read(|db| SessionRepo::new(db).list_live()).await
    }

    pub async fn live_sessions_for_exam(
        &self,
        exam_id: &ExamId,
    ) -> Result<Vec<SessionView>, EngineError> {
        let exam_id = exam_id.clone();
        self.read(move |db| SessionRepo::new(db).list_live_for_exam(&exam_id))
            .await
    }

    pub async fn violations(&self, session_id: &SessionId) -> Result<Vec<ViolationRow>, EngineError> {
        let id = session_id.clone();
        let repo_id = id.clone();
        // Distinguish an unknown session from one with no violations.
        self.read(move |db| {
            SessionRepo::new(db.clone()).get(&repo_id)?;
            ViolationRepo::new(db).list(&repo_id)
        })
        .await
        .map_err(|e| classify(&id, e))
    }

    async fn read<F, T>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db))
            .await
            .map_err(|e| EngineError::Internal(format!("store task failed: {e}")))?
            .map_err(EngineError::Store)
    }
}

fn classify(session_id: &SessionId, e: EngineError) -> EngineError {
    match e {
        EngineError::Store(inner) => EngineError::from_store(session_id, inner),
        other => other,
    }
}
