//! Wire events exchanged with student and supervisor connections.
//!
//! Every frame is `{ "event": <name>, "data": { ... } }` with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::ids::{QuestionId, SessionId};
use crate::status::SessionStatus;

pub const DEFAULT_WARNING: &str = "You have received a warning from the administrator.";
pub const FORCE_SUBMIT_REASON: &str = "Administrator has force-submitted your exam.";
pub const DEFAULT_DISQUALIFY_REASON: &str = "You have been disqualified by the administrator.";
pub const THRESHOLD_REASON: &str = "threshold exceeded";

/// Milliseconds since the Unix epoch, the timestamp unit on the wire.
pub fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── Inbound ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "violation")]
    Violation(ViolationReport),

    #[serde(rename = "answer:save")]
    AnswerSave(AnswerSave),

    #[serde(rename = "answer:saveBulk")]
    AnswerSaveBulk(AnswerSaveBulk),

    #[serde(rename = "heartbeat")]
    Heartbeat(HeartbeatReport),

    /// Camera frame, relayed to supervisors and never stored.
    #[serde(rename = "snapshot")]
    Snapshot(SnapshotFrame),

    #[serde(rename = "admin:warn")]
    AdminWarn(AdminWarn),

    #[serde(rename = "admin:forceSubmit")]
    AdminForceSubmit(AdminTarget),

    #[serde(rename = "admin:disqualify")]
    AdminDisqualify(AdminDisqualify),
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Violation(_) => "violation",
            Self::AnswerSave(_) => "answer:save",
            Self::AnswerSaveBulk(_) => "answer:saveBulk",
            Self::Heartbeat(_) => "heartbeat",
            Self::Snapshot(_) => "snapshot",
            Self::AdminWarn(_) => "admin:warn",
            Self::AdminForceSubmit(_) => "admin:forceSubmit",
            Self::AdminDisqualify(_) => "admin:disqualify",
        }
    }

    /// Commands only a supervisor connection may issue.
    pub fn is_admin_command(&self) -> bool {
        matches!(
            self,
            Self::AdminWarn(_) | Self::AdminForceSubmit(_) | Self::AdminDisqualify(_)
        )
    }

    /// The session an admin command is aimed at.
    pub fn target_session(&self) -> Option<&SessionId> {
        match self {
            Self::AdminWarn(w) => Some(&w.target_session_id),
            Self::AdminForceSubmit(t) => Some(&t.target_session_id),
            Self::AdminDisqualify(d) => Some(&d.target_session_id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReport {
    pub event_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSave {
    pub question_id: QuestionId,
    #[serde(default)]
    pub selected_answer: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSaveBulk {
    pub answers: Vec<AnswerSave>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReport {
    pub time_remaining: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotFrame {
    pub image: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminWarn {
    pub target_session_id: SessionId,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminTarget {
    pub target_session_id: SessionId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminDisqualify {
    pub target_session_id: SessionId,
    #[serde(default)]
    pub reason: Option<String>,
}

// ── Outbound ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "violation:ack")]
    ViolationAck(ViolationAck),

    #[serde(rename = "violation:rejected")]
    ViolationRejected(Rejection),

    #[serde(rename = "violation:new")]
    ViolationNew(ViolationNotice),

    #[serde(rename = "answer:saved")]
    AnswerSaved(AnswerSaved),

    #[serde(rename = "answer:savedBulk")]
    AnswerSavedBulk(AnswersSaved),

    #[serde(rename = "answer:rejected")]
    AnswerRejected(Rejection),

    #[serde(rename = "heartbeat:rejected")]
    HeartbeatRejected(Rejection),

    #[serde(rename = "student:connected")]
    StudentConnected(PresenceNotice),

    #[serde(rename = "student:disconnected")]
    StudentDisconnected(PresenceNotice),

    #[serde(rename = "student:heartbeat")]
    StudentHeartbeat(HeartbeatNotice),

    #[serde(rename = "student:disqualified")]
    StudentDisqualified(DisqualificationNotice),

    #[serde(rename = "student:snapshot")]
    StudentSnapshot(SnapshotNotice),

    /// Submission or expiry observed by the core.
    #[serde(rename = "student:status")]
    StudentStatus(StatusNotice),

    #[serde(rename = "warning")]
    Warning(Notice),

    #[serde(rename = "force:submit")]
    ForceSubmit(ReasonNotice),

    #[serde(rename = "disqualified")]
    Disqualified(ReasonNotice),

    #[serde(rename = "error")]
    Error(Rejection),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ViolationAck(_) => "violation:ack",
            Self::ViolationRejected(_) => "violation:rejected",
            Self::ViolationNew(_) => "violation:new",
            Self::AnswerSaved(_) => "answer:saved",
            Self::AnswerSavedBulk(_) => "answer:savedBulk",
            Self::AnswerRejected(_) => "answer:rejected",
            Self::HeartbeatRejected(_) => "heartbeat:rejected",
            Self::StudentConnected(_) => "student:connected",
            Self::StudentDisconnected(_) => "student:disconnected",
            Self::StudentHeartbeat(_) => "student:heartbeat",
            Self::StudentDisqualified(_) => "student:disqualified",
            Self::StudentSnapshot(_) => "student:snapshot",
            Self::StudentStatus(_) => "student:status",
            Self::Warning(_) => "warning",
            Self::ForceSubmit(_) => "force:submit",
            Self::Disqualified(_) => "disqualified",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectCode {
    SessionNotActive,
    SessionNotFound,
    NoSession,
    StoreFailure,
    InvalidEvent,
    Unavailable,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub code: RejectCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<QuestionId>,
}

impl Rejection {
    pub fn new(code: RejectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            question_id: None,
        }
    }

    pub fn for_question(mut self, question_id: QuestionId) -> Self {
        self.question_id = Some(question_id);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationAck {
    pub violation_count: u32,
    pub max_violations: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationNotice {
    pub session_id: SessionId,
    pub student_id: Option<String>,
    pub student_name: String,
    pub event_type: String,
    pub description: String,
    pub violation_count: u32,
    pub max_violations: u32,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSaved {
    pub question_id: QuestionId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswersSaved {
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub session_id: SessionId,
    pub student_id: Option<String>,
    pub student_name: String,
    pub status: SessionStatus,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatNotice {
    pub session_id: SessionId,
    pub student_id: Option<String>,
    pub time_remaining: u32,
    pub online: bool,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisqualificationNotice {
    pub session_id: SessionId,
    pub student_id: Option<String>,
    pub student_name: String,
    pub reason: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotNotice {
    pub session_id: SessionId,
    pub student_id: Option<String>,
    pub student_name: String,
    pub image: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotice {
    pub session_id: SessionId,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub message: String,
    pub timestamp: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonNotice {
    pub reason: String,
    pub timestamp: i64,
}

// ── Routing ──────────────────────────────────────────────────────────────

/// Broadcast group an event is addressed to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Audience {
    Supervisors,
    Session(SessionId),
}

/// An outbound event plus where it goes. Produced by the engine, consumed by
/// the transport's router.
#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    pub audience: Audience,
    pub event: OutboundEvent,
}

impl Dispatch {
    pub fn supervisors(event: OutboundEvent) -> Self {
        Self {
            audience: Audience::Supervisors,
            event,
        }
    }

    pub fn session(session_id: SessionId, event: OutboundEvent) -> Self {
        Self {
            audience: Audience::Session(session_id),
            event,
        }
    }
}
