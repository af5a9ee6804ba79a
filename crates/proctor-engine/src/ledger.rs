//! Violation intake: append, count and threshold check as one store write.

use tracing::info;

use proctor_core::events::{
    timestamp_ms, OutboundEvent, ViolationNotice, ViolationReport, THRESHOLD_REASON,
};
use proctor_store::violations::ViolationRepo;

use crate::actor::SessionContext;
use crate::disqualify;
use crate::engine::ViolationReceipt;
use crate::error::EngineError;

pub(crate) async fn record(
    ctx: &mut SessionContext,
    report: ViolationReport,
) -> Result<ViolationReceipt, EngineError> {
    let profile = ctx.profile().await?;
    let ViolationReport {
        event_type,
        description,
        metadata,
    } = report;

    let outcome = ctx
        .store(move |db, id| {
            ViolationRepo::new(db).record(id, &event_type, &description, metadata.as_ref())
        })
        .await?;

    info!(
        event_type = %outcome.violation.event_type,
        violation_count = outcome.violation_count,
        max_violations = outcome.max_violations,
        "violation recorded"
    );

    ctx.emitter.to_supervisors(OutboundEvent::ViolationNew(ViolationNotice {
        session_id: ctx.session_id.clone(),
        student_id: profile.student_id.clone(),
        student_name: profile.student_name.clone(),
        event_type: outcome.violation.event_type.clone(),
        description: outcome.violation.description.clone(),
        violation_count: outcome.violation_count,
        max_violations: outcome.max_violations,
        timestamp: timestamp_ms(),
    }));

    let disqualified = outcome.disqualified.is_some();
    if disqualified {
        disqualify::announce_disqualified(ctx, &profile, THRESHOLD_REASON);
    }

    Ok(ViolationReceipt {
        violation_count: outcome.violation_count,
        max_violations: outcome.max_violations,
        disqualified,
    })
}
