use std::path::Path;
use std::time::Duration;

use tokio::sync::broadcast;

use proctor_core::events::{Dispatch, ViolationReport};
use proctor_core::ids::{ExamId, SessionId, UserId};
use proctor_core::{Role, SessionStatus};
use proctor_store::exams::ExamRepo;
use proctor_store::sessions::{SessionRepo, SessionRow};
use proctor_store::users::UserRepo;
use proctor_store::Database;

use crate::{EngineConfig, ProctorEngine};

/// An engine over an in-memory store with one open session.
pub(crate) struct Harness {
    pub db: Database,
    pub engine: ProctorEngine,
    pub user: UserId,
    pub exam: ExamId,
    pub session: SessionId,
}

impl Harness {
    pub fn new(max_violations: u32) -> Self {
        Self::with_idle(max_violations, Duration::from_secs(60))
    }

    pub fn with_idle(max_violations: u32, idle_timeout: Duration) -> Self {
        Self::seeded(Database::in_memory().unwrap(), max_violations, idle_timeout)
    }

    /// Same seed over a pooled file store under `dir`.
    pub fn on_disk(dir: &Path, max_violations: u32) -> Self {
        let db = Database::open(&dir.join("proctor.db")).unwrap();
        Self::seeded(db, max_violations, Duration::from_secs(60))
    }

    fn seeded(db: Database, max_violations: u32, idle_timeout: Duration) -> Self {
        let user = UserRepo::new(db.clone())
            .create(Some("S-100"), "Ada Lovelace", Role::Student)
            .unwrap();
        let exam = ExamRepo::new(db.clone())
            .create("CS101", "Intro", 45, max_violations)
            .unwrap();
        let session = SessionRepo::new(db.clone())
            .open_or_resume(&user.id, &exam.id, Some("127.0.0.1"))
            .unwrap();

        let (tx, _) = broadcast::channel(256);
        let engine = ProctorEngine::new(
            db.clone(),
            tx,
            EngineConfig {
                mailbox_capacity: 16,
                idle_timeout,
            },
        );
        Self {
            db,
            engine,
            user: user.id,
            exam: exam.id,
            session: session.id,
        }
    }

    /// Another student's open session on the same exam.
    pub fn second_session(&self) -> SessionId {
        let user = UserRepo::new(self.db.clone())
            .create(Some("S-200"), "Grace Hopper", Role::Student)
            .unwrap();
        SessionRepo::new(self.db.clone())
            .open_or_resume(&user.id, &self.exam, None)
            .unwrap()
            .id
    }

    pub async fn session_row(&self) -> SessionRow {
        self.engine.session(&self.session).await.unwrap()
    }

    pub async fn status(&self) -> SessionStatus {
        self.session_row().await.status
    }
}

pub(crate) fn report(kind: &str) -> ViolationReport {
    ViolationReport {
        event_type: kind.into(),
        description: format!("{kind} detected"),
        metadata: None,
    }
}

/// Everything emitted so far.
pub(crate) fn drain(rx: &mut broadcast::Receiver<Dispatch>) -> Vec<Dispatch> {
    let mut out = Vec::new();
    while let Ok(d) = rx.try_recv() {
        out.push(d);
    }
    out
}
