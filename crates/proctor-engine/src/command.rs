use tokio::sync::oneshot;

use proctor_core::events::ViolationReport;
use proctor_core::ids::QuestionId;
use proctor_core::SubmissionType;
use proctor_store::answers::AnswerRow;
use proctor_store::sessions::{SessionRow, Transition};

use crate::engine::ViolationReceipt;
use crate::error::EngineError;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

/// Work items accepted by a session actor, processed strictly in arrival order.
pub(crate) enum SessionCommand {
    RecordViolation {
        report: ViolationReport,
        reply: Reply<ViolationReceipt>,
    },
    SaveAnswer {
        question_id: QuestionId,
        selected_answer: Option<String>,
        reply: Reply<AnswerRow>,
    },
    SaveAnswers {
        answers: Vec<(QuestionId, Option<String>)>,
        reply: Reply<usize>,
    },
    Heartbeat {
        time_remaining: i64,
        reply: Reply<SessionRow>,
    },
    Snapshot {
        image: String,
        timestamp: Option<i64>,
        reply: Reply<()>,
    },
    /// First live handle for the session opened.
    Connected { reply: Reply<SessionRow> },
    /// Last live handle for the session closed.
    Disconnected { reply: Reply<Transition> },
    Warn {
        message: String,
        reply: Reply<()>,
    },
    ForceSubmit { reply: Reply<()> },
    Disqualify {
        reason: String,
        reply: Reply<Transition>,
    },
    Submit {
        submission_type: SubmissionType,
        reply: Reply<Transition>,
    },
    Expire { reply: Reply<Transition> },
}

impl SessionCommand {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::RecordViolation { .. } => "record_violation",
            Self::SaveAnswer { .. } => "save_answer",
            Self::SaveAnswers { .. } => "save_answers",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Snapshot { .. } => "snapshot",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Warn { .. } => "warn",
            Self::ForceSubmit { .. } => "force_submit",
            Self::Disqualify { .. } => "disqualify",
            Self::Submit { .. } => "submit",
            Self::Expire { .. } => "expire",
        }
    }
}
