use proctor_core::events::{RejectCode, Rejection};
use proctor_core::ids::SessionId;
use proctor_core::SessionStatus;
use proctor_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The session's status does not admit the action; nothing was changed.
    #[error("session {session_id} is not active ({status})")]
    SessionNotActive {
        session_id: SessionId,
        status: SessionStatus,
    },

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("store error: {0}")]
    Store(StoreError),

    /// The session's actor could not accept or finish the command.
    #[error("session actor unavailable: {0}")]
    ActorUnavailable(SessionId),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Lift a store error, classifying status refusals and missing rows.
    pub fn from_store(session_id: &SessionId, e: StoreError) -> Self {
        match e {
            StoreError::NotActive { status, .. } => Self::SessionNotActive {
                session_id: session_id.clone(),
                status,
            },
            StoreError::NotFound(ref what) if what.starts_with("session") => {
                Self::SessionNotFound(session_id.clone())
            }
            other => Self::Store(other),
        }
    }

    pub fn reject_code(&self) -> RejectCode {
        match self {
            Self::SessionNotActive { .. } => RejectCode::SessionNotActive,
            Self::SessionNotFound(_) => RejectCode::SessionNotFound,
            Self::Store(_) => RejectCode::StoreFailure,
            Self::ActorUnavailable(_) | Self::Internal(_) => RejectCode::Unavailable,
        }
    }

    /// Whether this is an operational failure worth an `error!` record, as
    /// opposed to an expected refusal.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::SessionNotActive { .. } | Self::SessionNotFound(_))
    }

    pub fn to_rejection(&self) -> Rejection {
        Rejection::new(self.reject_code(), self.to_string())
    }
}
