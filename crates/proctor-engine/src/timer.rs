//! Heartbeats and camera frames from the student's client.

use tracing::debug;

use proctor_core::events::{timestamp_ms, HeartbeatNotice, OutboundEvent, SnapshotNotice};
use proctor_store::sessions::{SessionRepo, SessionRow};

use crate::actor::SessionContext;
use crate::error::EngineError;

/// Overwrite the remaining time (clamped at zero) and relay it to
/// supervisors. Terminal sessions decline; expiry itself is decided
/// outside the engine.
pub(crate) async fn heartbeat(
    ctx: &mut SessionContext,
    time_remaining: i64,
) -> Result<SessionRow, EngineError> {
    let profile = ctx.profile().await?;
    let row = ctx
        .store(move |db, id| SessionRepo::new(db).update_time_remaining(id, time_remaining))
        .await?;
    debug!(time_remaining = row.time_remaining_seconds, "heartbeat");

    ctx.emitter.to_supervisors(OutboundEvent::StudentHeartbeat(HeartbeatNotice {
        session_id: ctx.session_id.clone(),
        student_id: profile.student_id,
        time_remaining: row.time_remaining_seconds,
        online: true,
        timestamp: timestamp_ms(),
    }));
    Ok(row)
}

/// Relay a camera frame to supervisors. Frames are never stored.
pub(crate) async fn snapshot(
    ctx: &mut SessionContext,
    image: String,
    timestamp: Option<i64>,
) -> Result<(), EngineError> {
    let profile = ctx.profile().await?;
    ctx.emitter.to_supervisors(OutboundEvent::StudentSnapshot(SnapshotNotice {
        session_id: ctx.session_id.clone(),
        student_id: profile.student_id,
        student_name: profile.student_name,
        image,
        timestamp: timestamp.unwrap_or_else(timestamp_ms),
    }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use proctor_core::events::OutboundEvent;
    use proctor_core::{SessionStatus, SubmissionType};

    use std::time::{Duration, Instant};

    use crate::testutil::{drain, Harness};
    use crate::EngineError;

    #[tokio::test]
    async fn heartbeat_overwrites_and_clamps() {
        let h = Harness::new(3);
        let mut rx = h.engine.subscribe();

        assert_eq!(h.engine.heartbeat(&h.session, 1200).await.unwrap().time_remaining_seconds, 1200);
        assert_eq!(h.engine.heartbeat(&h.session, -30).await.unwrap().time_remaining_seconds, 0);

        let events = drain(&mut rx);
        match &events[1].event {
            OutboundEvent::StudentHeartbeat(n) => {
                assert_eq!(n.time_remaining, 0);
                assert!(n.online);
                assert_eq!(n.student_id.as_deref(), Some("S-100"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_store_work_on_one_session_does_not_stall_another() {
        let dir = tempfile::tempdir().unwrap();
        let h = Harness::on_disk(dir.path(), 3);
        let other = h.second_session();
        h.engine.heartbeat(&other, 100).await.unwrap();

        let (held_tx, held_rx) = tokio::sync::oneshot::channel();
        let db = h.db.clone();
        let slow = tokio::task::spawn_blocking(move || {
            db.with_conn(|_| {
                let _ = held_tx.send(());
                std::thread::sleep(Duration::from_millis(800));
                Ok(())
            })
        });
        held_rx.await.unwrap();

        let started = Instant::now();
        let row = h.engine.heartbeat(&other, 99).await.unwrap();
        assert_eq!(row.time_remaining_seconds, 99);
        assert!(
            started.elapsed() < Duration::from_millis(300),
            "heartbeat waited {:?}",
            started.elapsed()
        );
        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn heartbeat_counts_while_disconnected() {
        let h = Harness::new(3);
        h.engine.disconnected(&h.session).await.unwrap();
        let row = h.engine.heartbeat(&h.session, 90).await.unwrap();
        assert_eq!(row.status, SessionStatus::Disconnected);
        assert_eq!(row.time_remaining_seconds, 90);
    }

    #[tokio::test]
    async fn heartbeat_on_terminal_session_is_declined() {
        let h = Harness::new(3);
        h.engine.submit(&h.session, SubmissionType::Manual).await.unwrap();
        let mut rx = h.engine.subscribe();
        assert_matches!(
            h.engine.heartbeat(&h.session, 30).await,
            Err(EngineError::SessionNotActive { .. })
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_relayed_with_fallback_timestamp() {
        let h = Harness::new(3);
        let mut rx = h.engine.subscribe();
        h.engine.snapshot(&h.session, "data:image/jpeg;base64,AAAA".into(), None).await.unwrap();
        h.engine.snapshot(&h.session, "data:image/jpeg;base64,BBBB".into(), Some(42)).await.unwrap();

        let events = drain(&mut rx);
        match (&events[0].event, &events[1].event) {
            (OutboundEvent::StudentSnapshot(a), OutboundEvent::StudentSnapshot(b)) => {
                assert!(a.timestamp > 42);
                assert_eq!(b.timestamp, 42);
                assert_eq!(b.image, "data:image/jpeg;base64,BBBB");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
