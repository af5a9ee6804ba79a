use chrono::Utc;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use proctor_core::ids::{SessionId, ViolationId};
use proctor_core::SessionStatus;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;
use crate::sessions::{self, SessionRow};

/// One immutable entry of a session's violation log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationRow {
    pub id: ViolationId,
    pub session_id: SessionId,
    pub event_type: String,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: String,
}

/// Everything one accepted violation changed.
#[derive(Clone, Debug, PartialEq)]
pub struct ViolationOutcome {
    pub violation: ViolationRow,
    /// Counter value returned by the increment itself.
    pub violation_count: u32,
    pub max_violations: u32,
    /// Set when this violation crossed the threshold and moved the session
    /// to `DISQUALIFIED`.
    pub disqualified: Option<SessionRow>,
}

pub struct ViolationRepo {
    db: Database,
}

impl ViolationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a violation and bump the session counter in one transaction.
    ///
    /// The counter is incremented with `UPDATE … RETURNING` so concurrent
    /// callers each observe a distinct value. When the returned count reaches
    /// the limit the session is moved to `DISQUALIFIED` before commit. A
    /// terminal session records nothing and yields `StoreError::NotActive`.
    #[instrument(skip(self, description, metadata), fields(session_id = %session_id, event_type))]
    pub fn record(
        &self,
        session_id: &SessionId,
        event_type: &str,
        description: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<ViolationOutcome, StoreError> {
        let metadata_json = metadata.map(serde_json::to_string).transpose()?;
        let now = Utc::now().to_rfc3339();

        self.db.with_tx(|tx| {
            let counted: Option<(i64, i64)> = tx
                .query_row(
                    "UPDATE sessions SET violation_count = violation_count + 1, updated_at = ?1
                     WHERE id = ?2 AND status IN ('ACTIVE', 'DISCONNECTED')
                     RETURNING violation_count, max_violations",
                    rusqlite::params![now, session_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((count, max)) = counted else {
                return Err(sessions::not_active(sessions::fetch(tx, session_id)?));
            };
            let violation_count = to_u32(count, "violation_count")?;
            let max_violations = to_u32(max, "max_violations")?;

            let id = ViolationId::new();
            tx.execute(
                "INSERT INTO violations (id, session_id, event_type, description, metadata, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    session_id.as_str(),
                    event_type,
                    description,
                    metadata_json,
                    now,
                ],
            )?;

            let disqualified = if violation_count >= max_violations {
                sessions::transition_in(
                    tx,
                    session_id,
                    &SessionStatus::OPEN,
                    SessionStatus::Disqualified,
                )?
            } else {
                None
            };
            if disqualified.is_some() {
                info!(session_id = %session_id, violation_count, max_violations, "violation threshold reached");
            }

            Ok(ViolationOutcome {
                violation: ViolationRow {
                    id,
                    session_id: session_id.clone(),
                    event_type: event_type.to_owned(),
                    description: description.to_owned(),
                    metadata: metadata.cloned(),
                    timestamp: now.clone(),
                },
                violation_count,
                max_violations,
                disqualified,
            })
        })
    }

    /// The session's violations in the order they were recorded.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<ViolationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, event_type, description, metadata, timestamp
                 FROM violations WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_violation(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn count(&self, session_id: &SessionId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM violations WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }
}

fn to_u32(raw: i64, column: &'static str) -> Result<u32, StoreError> {
    u32::try_from(raw).map_err(|_| StoreError::CorruptRow {
        table: "sessions",
        column,
        detail: format!("out of range: {raw}"),
    })
}

fn row_to_violation(row: &rusqlite::Row<'_>) -> Result<ViolationRow, StoreError> {
    let metadata = row_helpers::get_opt::<String>(row, 4, "violations", "metadata")?
        .map(|raw| row_helpers::parse_json(&raw, "violations", "metadata"))
        .transpose()?;
    Ok(ViolationRow {
        id: ViolationId::from_raw(row_helpers::get::<String>(row, 0, "violations", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "violations",
            "session_id",
        )?),
        event_type: row_helpers::get(row, 2, "violations", "event_type")?,
        description: row_helpers::get(row, 3, "violations", "description")?,
        metadata,
        timestamp: row_helpers::get(row, 5, "violations", "timestamp")?,
    })
}
