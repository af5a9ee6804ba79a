//! Status transitions driven by connections, supervisors and external
//! collaborators, plus the notifications each one produces.

use tracing::info;

use proctor_core::events::{
    timestamp_ms, DisqualificationNotice, Notice, OutboundEvent, PresenceNotice, ReasonNotice,
    StatusNotice, FORCE_SUBMIT_REASON,
};
use proctor_core::{SessionStatus, SubmissionType};
use proctor_store::sessions::{SessionRepo, SessionRow, Transition};

use crate::actor::{SessionContext, StudentProfile};
use crate::error::EngineError;

async fn transition(
    ctx: &SessionContext,
    expected: &'static [SessionStatus],
    next: SessionStatus,
) -> Result<Transition, EngineError> {
    ctx.store(move |db, id| SessionRepo::new(db).transition_status(id, expected, next))
        .await
}

/// Tell the student and the supervisors that the session was disqualified.
pub(crate) fn announce_disqualified(ctx: &SessionContext, profile: &StudentProfile, reason: &str) {
    let timestamp = timestamp_ms();
    ctx.emitter.to_session(
        &ctx.session_id,
        OutboundEvent::Disqualified(ReasonNotice {
            reason: reason.to_owned(),
            timestamp,
        }),
    );
    ctx.emitter
        .to_supervisors(OutboundEvent::StudentDisqualified(DisqualificationNotice {
            session_id: ctx.session_id.clone(),
            student_id: profile.student_id.clone(),
            student_name: profile.student_name.clone(),
            reason: reason.to_owned(),
            timestamp,
        }));
}

fn presence(ctx: &SessionContext, profile: &StudentProfile, status: SessionStatus) -> PresenceNotice {
    PresenceNotice {
        session_id: ctx.session_id.clone(),
        student_id: profile.student_id.clone(),
        student_name: profile.student_name.clone(),
        status,
        timestamp: timestamp_ms(),
    }
}

/// A first handle opened: bring a `DISCONNECTED` session back to `ACTIVE`
/// and tell supervisors the student is present. Count and time are kept.
pub(crate) async fn connected(ctx: &mut SessionContext) -> Result<SessionRow, EngineError> {
    let profile = ctx.profile().await?;
    let t = transition(ctx, &[SessionStatus::Disconnected], SessionStatus::Active).await?;
    if t.is_applied() {
        info!("session reconnected");
    }
    let row = t.into_row();
    if !row.status.is_terminal() {
        ctx.emitter
            .to_supervisors(OutboundEvent::StudentConnected(presence(ctx, &profile, row.status)));
    }
    Ok(row)
}

/// The last handle closed. Only an `ACTIVE` session changes; anything else
/// is left alone.
pub(crate) async fn disconnected(ctx: &mut SessionContext) -> Result<Transition, EngineError> {
    let profile = ctx.profile().await?;
    let t = transition(ctx, &[SessionStatus::Active], SessionStatus::Disconnected).await?;
    if t.is_applied() {
        info!("session disconnected");
        ctx.emitter.to_supervisors(OutboundEvent::StudentDisconnected(presence(
            ctx,
            &profile,
            SessionStatus::Disconnected,
        )));
    }
    Ok(t)
}

pub(crate) async fn disqualify(
    ctx: &mut SessionContext,
    reason: String,
) -> Result<Transition, EngineError> {
    let profile = ctx.profile().await?;
    let t = transition(ctx, &SessionStatus::OPEN, SessionStatus::Disqualified).await?;
    if t.is_applied() {
        info!(%reason, "session disqualified by supervisor");
        announce_disqualified(ctx, &profile, &reason);
    }
    Ok(t)
}

pub(crate) async fn submit(
    ctx: &mut SessionContext,
    submission_type: SubmissionType,
) -> Result<Transition, EngineError> {
    let t = transition(ctx, &SessionStatus::OPEN, SessionStatus::Submitted).await?;
    if t.is_applied() {
        info!(%submission_type, "session submitted");
        ctx.emitter.to_supervisors(OutboundEvent::StudentStatus(StatusNotice {
            session_id: ctx.session_id.clone(),
            status: SessionStatus::Submitted,
            reason: Some(submission_type.to_string()),
            timestamp: timestamp_ms(),
        }));
    }
    Ok(t)
}

pub(crate) async fn expire(ctx: &mut SessionContext) -> Result<Transition, EngineError> {
    let t = transition(ctx, &SessionStatus::OPEN, SessionStatus::Expired).await?;
    if t.is_applied() {
        info!("session expired");
        ctx.emitter.to_supervisors(OutboundEvent::StudentStatus(StatusNotice {
            session_id: ctx.session_id.clone(),
            status: SessionStatus::Expired,
            reason: None,
            timestamp: timestamp_ms(),
        }));
    }
    Ok(t)
}

pub(crate) async fn warn(ctx: &mut SessionContext, message: String) -> Result<(), EngineError> {
    ctx.profile().await?;
    ctx.emitter.to_session(
        &ctx.session_id,
        OutboundEvent::Warning(Notice {
            message,
            timestamp: timestamp_ms(),
        }),
    );
    Ok(())
}

/// Instruct the student's client to submit. The status is left to the
/// submission that follows.
pub(crate) async fn force_submit(ctx: &mut SessionContext) -> Result<(), EngineError> {
    ctx.profile().await?;
    ctx.emitter.to_session(
        &ctx.session_id,
        OutboundEvent::ForceSubmit(ReasonNotice {
            reason: FORCE_SUBMIT_REASON.to_owned(),
            timestamp: timestamp_ms(),
        }),
    );
    Ok(())
}
