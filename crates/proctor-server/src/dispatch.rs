//! Inbound frame handling: parse, authorize, route to the engine, reply to
//! the originating connection.

use tracing::{debug, info, instrument, warn};

use proctor_core::events::{
    AnswerSaved, AnswersSaved, InboundEvent, OutboundEvent, RejectCode, Rejection,
    ViolationAck, DEFAULT_DISQUALIFY_REASON, DEFAULT_WARNING,
};
use proctor_core::ids::SessionId;
use proctor_telemetry::AUDIT_TARGET;

use crate::connection::ClientConnection;
use crate::server::AppState;

#[instrument(skip_all, fields(conn_id = %conn.id, event = tracing::field::Empty))]
pub async fn handle_frame(state: &AppState, conn: &ClientConnection, text: &str) {
    let event: InboundEvent = match serde_json::from_str(text) {
        Ok(ev) => ev,
        Err(e) => {
            debug!(error = %e, "unparseable frame");
            reply(
                state,
                conn,
                OutboundEvent::Error(Rejection::new(
                    RejectCode::InvalidEvent,
                    format!("invalid event: {e}"),
                )),
            );
            return;
        }
    };
    let _ = tracing::Span::current().record("event", event.name());

    if event.is_admin_command() {
        if conn.is_supervisor() {
            handle_admin(state, conn, event).await;
        } else {
            warn!(
                target: AUDIT_TARGET,
                conn_id = %conn.id,
                user_id = %conn.principal.user_id,
                role = %conn.principal.role,
                event = event.name(),
                target_session = event.target_session().map(SessionId::as_str),
                "unauthorized command dropped"
            );
        }
        return;
    }

    let Some(session_id) = conn.session_id().cloned() else {
        reply(
            state,
            conn,
            OutboundEvent::Error(Rejection::new(
                RejectCode::NoSession,
                "connection is not bound to an exam session",
            )),
        );
        return;
    };
    handle_student(state, conn, &session_id, event).await;
}

async fn handle_student(
    state: &AppState,
    conn: &ClientConnection,
    session_id: &SessionId,
    event: InboundEvent,
) {
    let engine = &state.engine;
    match event {
        InboundEvent::Violation(report) => {
            let out = match engine.record_violation(session_id, report).await {
                Ok(receipt) => OutboundEvent::ViolationAck(ViolationAck {
                    violation_count: receipt.violation_count,
                    max_violations: receipt.max_violations,
                }),
                Err(e) => OutboundEvent::ViolationRejected(e.to_rejection()),
            };
            reply(state, conn, out);
        }
        InboundEvent::AnswerSave(answer) => {
            let question_id = answer.question_id.clone();
            let out = match engine
                .save_answer(session_id, answer.question_id, answer.selected_answer)
                .await
            {
                Ok(row) => OutboundEvent::AnswerSaved(AnswerSaved {
                    question_id: row.question_id,
                }),
                Err(e) => OutboundEvent::AnswerRejected(e.to_rejection().for_question(question_id)),
            };
            reply(state, conn, out);
        }
        InboundEvent::AnswerSaveBulk(bulk) => {
            let answers = bulk
                .answers
                .into_iter()
                .map(|a| (a.question_id, a.selected_answer))
                .collect();
            let out = match engine.save_answers(session_id, answers).await {
                Ok(count) => OutboundEvent::AnswerSavedBulk(AnswersSaved { count }),
                Err(e) => OutboundEvent::AnswerRejected(e.to_rejection()),
            };
            reply(state, conn, out);
        }
        InboundEvent::Heartbeat(beat) => {
            match engine.heartbeat(session_id, beat.time_remaining).await {
                Ok(_) => state.registry.touch(session_id),
                Err(e) => reply(state, conn, OutboundEvent::HeartbeatRejected(e.to_rejection())),
            }
        }
        InboundEvent::Snapshot(frame) => {
            if let Err(e) = engine.snapshot(session_id, frame.image, frame.timestamp).await {
                reply(state, conn, OutboundEvent::Error(e.to_rejection()));
            }
        }
        InboundEvent::AdminWarn(_)
        | InboundEvent::AdminForceSubmit(_)
        | InboundEvent::AdminDisqualify(_) => {}
    }
}

async fn handle_admin(state: &AppState, conn: &ClientConnection, event: InboundEvent) {
    let engine = &state.engine;
    let name = event.name();
    let (target, result) = match event {
        InboundEvent::AdminWarn(w) => {
            let message = w.message.unwrap_or_else(|| DEFAULT_WARNING.to_owned());
            let r = engine.warn(&w.target_session_id, message).await;
            (w.target_session_id, r.map(|()| true))
        }
        InboundEvent::AdminForceSubmit(t) => {
            let r = engine.force_submit(&t.target_session_id).await;
            (t.target_session_id, r.map(|()| true))
        }
        InboundEvent::AdminDisqualify(d) => {
            let reason = d.reason.unwrap_or_else(|| DEFAULT_DISQUALIFY_REASON.to_owned());
            let r = engine.disqualify(&d.target_session_id, reason).await;
            (d.target_session_id, r.map(|t| t.is_applied()))
        }
        _ => return,
    };

    match result {
        Ok(applied) => info!(
            target: AUDIT_TARGET,
            user_id = %conn.principal.user_id,
            event = name,
            target_session = %target,
            applied,
            "supervisor command"
        ),
        Err(e) => reply(state, conn, OutboundEvent::Error(e.to_rejection())),
    }
}

fn reply(state: &AppState, conn: &ClientConnection, event: OutboundEvent) {
    if !state.router.send_to_connection(conn, &event) {
        debug!(conn_id = %conn.id, event = event.name(), "reply not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use proctor_core::ids::UserId;
    use proctor_core::{Principal, Role, SessionStatus};
    use proctor_store::exams::ExamRepo;
    use proctor_store::users::UserRepo;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use crate::server::tests::test_state_with_db;

    struct Fixture {
        state: AppState,
        session: SessionId,
    }

    async fn fixture(max: u32) -> Fixture {
        let (state, db) = test_state_with_db();
        let user = UserRepo::new(db.clone())
            .create(Some("S-1"), "Student One", Role::Student)
            .unwrap();
        let exam = ExamRepo::new(db).create("EX", "Exam", 30, max).unwrap();
        let session = state
            .engine
            .open_session(user.id, exam.id, None)
            .await
            .unwrap()
            .id;
        Fixture { state, session }
    }

    fn connect(principal: Principal) -> (ClientConnection, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(16);
        (ClientConnection::new(principal, tx), rx)
    }

    fn next(rx: &mut mpsc::Receiver<Arc<str>>) -> Value {
        serde_json::from_str(&rx.try_recv().expect("a reply")).unwrap()
    }

    #[tokio::test]
    async fn violation_is_acknowledged_with_count() {
        let f = fixture(3).await;
        let (conn, mut rx) = connect(Principal::student(UserId::new(), f.session.clone()));
        let frame = json!({"event": "violation", "data": {"eventType": "TAB_SWITCH"}});
        handle_frame(&f.state, &conn, &frame.to_string()).await;

        let ack = next(&mut rx);
        assert_eq!(ack["event"], "violation:ack");
        assert_eq!(ack["data"]["violationCount"], 1);
        assert_eq!(ack["data"]["maxViolations"], 3);
    }

    #[tokio::test]
    async fn answer_save_acks_and_rejects_after_submit() {
        let f = fixture(3).await;
        let (conn, mut rx) = connect(Principal::student(UserId::new(), f.session.clone()));
        let frame = json!({"event": "answer:save", "data": {"questionId": "q1", "selectedAnswer": "B"}});
        handle_frame(&f.state, &conn, &frame.to_string()).await;
        assert_eq!(next(&mut rx)["event"], "answer:saved");

        f.state
            .engine
            .submit(&f.session, proctor_core::SubmissionType::Manual)
            .await
            .unwrap();
        handle_frame(&f.state, &conn, &frame.to_string()).await;
        let rejected = next(&mut rx);
        assert_eq!(rejected["event"], "answer:rejected");
        assert_eq!(rejected["data"]["code"], "SESSION_NOT_ACTIVE");
        assert_eq!(rejected["data"]["questionId"], "q1");
    }

    #[tokio::test]
    async fn student_admin_command_is_dropped_without_reply() {
        let f = fixture(3).await;
        let (conn, mut rx) = connect(Principal::student(UserId::new(), SessionId::new()));
        let frame = json!({"event": "admin:disqualify", "data": {"targetSessionId": f.session}});
        handle_frame(&f.state, &conn, &frame.to_string()).await;

        assert!(rx.try_recv().is_err());
        let row = f.state.engine.session(&f.session).await.unwrap();
        assert_eq!(row.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn supervisor_disqualify_applies() {
        let f = fixture(3).await;
        let (conn, mut rx) = connect(Principal::supervisor(UserId::new()));
        let frame = json!({"event": "admin:disqualify", "data": {"targetSessionId": f.session, "reason": "phone"}});
        handle_frame(&f.state, &conn, &frame.to_string()).await;

        assert!(rx.try_recv().is_err());
        let row = f.state.engine.session(&f.session).await.unwrap();
        assert_eq!(row.status, SessionStatus::Disqualified);
    }

    #[tokio::test]
    async fn supervisor_command_on_unknown_session_reports_error() {
        let f = fixture(3).await;
        let (conn, mut rx) = connect(Principal::supervisor(UserId::new()));
        let frame = json!({"event": "admin:warn", "data": {"targetSessionId": "sess_missing"}});
        handle_frame(&f.state, &conn, &frame.to_string()).await;
        let err = next(&mut rx);
        assert_eq!(err["event"], "error");
        assert_eq!(err["data"]["code"], "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn malformed_and_unbound_frames_get_errors() {
        let f = fixture(3).await;
        let (conn, mut rx) = connect(Principal::supervisor(UserId::new()));
        handle_frame(&f.state, &conn, "{not json").await;
        assert_eq!(next(&mut rx)["data"]["code"], "INVALID_EVENT");

        handle_frame(&f.state, &conn, r#"{"event":"teleport","data":{}}"#).await;
        assert_eq!(next(&mut rx)["data"]["code"], "INVALID_EVENT");

        let frame = json!({"event": "heartbeat", "data": {"timeRemaining": 10}});
        handle_frame(&f.state, &conn, &frame.to_string()).await;
        assert_eq!(next(&mut rx)["data"]["code"], "NO_SESSION");
    }

    #[tokio::test]
    async fn heartbeat_touches_registry_and_rejects_on_terminal() {
        let f = fixture(3).await;
        let (tx, mut rx) = mpsc::channel(16);
        let conn = Arc::new(ClientConnection::new(
            Principal::student(UserId::new(), f.session.clone()),
            tx,
        ));
        f.state.registry.register_connection(Arc::clone(&conn));
        let frame = json!({"event": "heartbeat", "data": {"timeRemaining": 1200}});
        handle_frame(&f.state, &conn, &frame.to_string()).await;
        assert!(rx.try_recv().is_err());
        assert!(f.state.registry.since_heartbeat(&f.session).is_some());
        let row = f.state.engine.session(&f.session).await.unwrap();
        assert_eq!(row.time_remaining_seconds, 1200);

        f.state.engine.expire(&f.session).await.unwrap();
        handle_frame(&f.state, &conn, &frame.to_string()).await;
        assert_eq!(next(&mut rx)["event"], "heartbeat:rejected");
    }
}
