//! HTTP endpoints: health, supervisor monitoring, and the submission and
//! expiry entry points used by external collaborators.

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use proctor_core::ids::{ExamId, SessionId};
use proctor_core::{Principal, SubmissionType};
use proctor_store::sessions::{SessionRow, SessionView, Transition};
use proctor_store::violations::ViolationRow;
use proctor_telemetry::AUDIT_TARGET;

use crate::auth::bearer_token;
use crate::error::{ApiError, AuthError};
use crate::server::AppState;

/// The verified caller of an HTTP request.
pub struct Caller(pub Principal);

impl Caller {
    fn require_supervisor(&self) -> Result<(), ApiError> {
        if self.0.is_supervisor() {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers, None).ok_or(AuthError::MissingToken)?;
        let principal = state.authenticator.authenticate(token).await?;
        Ok(Self(principal))
    }
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "onlineSessions": state.registry.list_online().len(),
        "connections": state.registry.connection_count(),
        "activeActors": state.engine.active_actors(),
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    }))
}

/// A non-terminal session as the monitoring dashboard sees it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSession {
    #[serde(flatten)]
    pub view: SessionView,
    pub is_online: bool,
    /// Seconds since the last heartbeat over a live connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_heartbeat: Option<u64>,
}

fn with_presence(state: &AppState, views: Vec<SessionView>) -> Vec<LiveSession> {
    let online = state.registry.list_online();
    views
        .into_iter()
        .map(|view| {
            let id = &view.session.id;
            LiveSession {
                is_online: online.contains(id),
                seconds_since_heartbeat: state.registry.since_heartbeat(id).map(|d| d.as_secs()),
                view,
            }
        })
        .collect()
}

pub async fn live_sessions(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Vec<LiveSession>>, ApiError> {
    caller.require_supervisor()?;
    let views = state.engine.live_sessions().await?;
    Ok(Json(with_presence(&state, views)))
}

/// Live sessions of a single exam, newest first.
pub async fn exam_live_sessions(
    State(state): State<AppState>,
    caller: Caller,
    Path(exam_id): Path<ExamId>,
) -> Result<Json<Vec<LiveSession>>, ApiError> {
    caller.require_supervisor()?;
    let views = state.engine.live_sessions_for_exam(&exam_id).await?;
    Ok(Json(with_presence(&state, views)))
}

pub async fn session_violations(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<SessionId>,
) -> Result<Json<Vec<ViolationRow>>, ApiError> {
    caller.require_supervisor()?;
    Ok(Json(state.engine.violations(&id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub submission_type: SubmissionType,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub session: SessionRow,
    /// `false` when the session was already terminal and left untouched.
    pub applied: bool,
}

impl From<Transition> for TransitionResponse {
    fn from(t: Transition) -> Self {
        let applied = t.is_applied();
        Self {
            session: t.into_row(),
            applied,
        }
    }
}

pub async fn submit_session(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<SessionId>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    if !caller.0.may_act_on(&id) {
        return Err(ApiError::Forbidden);
    }
    let t = state.engine.submit(&id, body.submission_type).await?;
    info!(
        target: AUDIT_TARGET,
        user_id = %caller.0.user_id,
        session_id = %id,
        submission_type = %body.submission_type,
        applied = t.is_applied(),
        "session submit"
    );
    Ok(Json(t.into()))
}

pub async fn expire_session(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<SessionId>,
) -> Result<Json<TransitionResponse>, ApiError> {
    caller.require_supervisor()?;
    let t = state.engine.expire(&id).await?;
    info!(
        target: AUDIT_TARGET,
        user_id = %caller.0.user_id,
        session_id = %id,
        applied = t.is_applied(),
        "session expire"
    );
    Ok(Json(t.into()))
}
