use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use proctor_core::ids::{ExamId, SessionId, UserId};
use proctor_core::SessionStatus;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub(crate) const SESSION_COLUMNS: &str = "id, user_id, exam_id, status, violation_count, \
     max_violations, time_remaining_seconds, start_time, end_time, client_address, \
     created_at, updated_at";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRow {
    pub id: SessionId,
    pub user_id: UserId,
    pub exam_id: ExamId,
    pub status: SessionStatus,
    pub violation_count: u32,
    pub max_violations: u32,
    pub time_remaining_seconds: u32,
    pub start_time: String,
    pub end_time: Option<String>,
    pub client_address: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A session joined with the display fields supervisors see.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionRow,
    pub student_id: Option<String>,
    pub student_name: String,
    pub exam_code: String,
    pub exam_title: String,
}

/// Result of a conditional status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The row held one of the expected statuses and now holds the new one.
    Applied(SessionRow),
    /// The row was left untouched; carries its current state.
    Unchanged(SessionRow),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn row(&self) -> &SessionRow {
        match self {
            Self::Applied(r) | Self::Unchanged(r) => r,
        }
    }

    pub fn into_row(self) -> SessionRow {
        match self {
            Self::Applied(r) | Self::Unchanged(r) => r,
        }
    }
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Return the caller's open session for this exam, or start a new one
    /// with the exam's duration and violation limit. An existing session is
    /// returned as-is; reconnecting it is the engine's job.
    #[instrument(skip(self), fields(user_id = %user_id, exam_id = %exam_id))]
    pub fn open_or_resume(
        &self,
        user_id: &UserId,
        exam_id: &ExamId,
        client_address: Option<&str>,
    ) -> Result<SessionRow, StoreError> {
        self.db.with_tx(|tx| {
            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {SESSION_COLUMNS} FROM sessions
                         WHERE user_id = ?1 AND exam_id = ?2 AND status IN ('ACTIVE', 'DISCONNECTED')"
                    ),
                    [user_id.as_str(), exam_id.as_str()],
                    |row| Ok(row_to_session(row)),
                )
                .optional()?
                .transpose()?;
            if let Some(row) = existing {
                debug!(session_id = %row.id, status = %row.status, "resuming open session");
                return Ok(row);
            }

            let (duration_minutes, max_violations): (u32, u32) = tx
                .query_row(
                    "SELECT duration_minutes, max_violations FROM exams WHERE id = ?1",
                    [exam_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("exam {exam_id}")))?;

            let id = SessionId::new();
            let now = Utc::now().to_rfc3339();
            let time_remaining = duration_minutes.saturating_mul(60);
            tx.execute(
                "INSERT INTO sessions (id, user_id, exam_id, status, violation_count, max_violations,
                                       time_remaining_seconds, start_time, client_address,
                                       created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'ACTIVE', 0, ?4, ?5, ?6, ?7, ?6, ?6)",
                rusqlite::params![
                    id.as_str(),
                    user_id.as_str(),
                    exam_id.as_str(),
                    max_violations,
                    time_remaining,
                    now,
                    client_address,
                ],
            )?;

            Ok(SessionRow {
                id,
                user_id: user_id.clone(),
                exam_id: exam_id.clone(),
                status: SessionStatus::Active,
                violation_count: 0,
                max_violations,
                time_remaining_seconds: time_remaining,
                start_time: now.clone(),
                end_time: None,
                client_address: client_address.map(str::to_owned),
                created_at: now.clone(),
                updated_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| fetch(conn, id))
    }

    /// A session with its student and exam display fields.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn view(&self, id: &SessionId) -> Result<SessionView, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&view_query("s.id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_view(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// Every non-terminal session, newest first.
    #[instrument(skip(self))]
    pub fn list_live(&self) -> Result<Vec<SessionView>, StoreError> {
        self.query_live("", [])
    }

    /// Non-terminal sessions of one exam, newest first. An unknown exam
    /// simply has none.
    #[instrument(skip(self), fields(exam_id = %exam_id))]
    pub fn list_live_for_exam(&self, exam_id: &ExamId) -> Result<Vec<SessionView>, StoreError> {
        self.query_live(" AND s.exam_id = ?1", [exam_id.as_str()])
    }

    fn query_live<P: rusqlite::Params>(
        &self,
        extra_filter: &str,
        params: P,
    ) -> Result<Vec<SessionView>, StoreError> {
        self.db.with_conn(|conn| {
            let filter = format!("s.status IN ('ACTIVE', 'DISCONNECTED'){extra_filter}");
            let mut stmt = conn.prepare(&format!(
                "{} ORDER BY s.start_time DESC, s.id DESC",
                view_query(&filter)
            ))?;
            let mut rows = stmt.query(params)?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_view(row)?);
            }
            Ok(results)
        })
    }

    /// Move the session to `next` only if it currently holds one of
    /// `expected`. Entering a terminal status stamps `end_time`.
    #[instrument(skip(self, expected), fields(session_id = %id, next = %next))]
    pub fn transition_status(
        &self,
        id: &SessionId,
        expected: &[SessionStatus],
        next: SessionStatus,
    ) -> Result<Transition, StoreError> {
        self.db.with_tx(|tx| match transition_in(tx, id, expected, next)? {
            Some(row) => Ok(Transition::Applied(row)),
            None => fetch(tx, id).map(Transition::Unchanged),
        })
    }

    /// Overwrite the remaining time of an open session, clamped at zero.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn update_time_remaining(
        &self,
        id: &SessionId,
        seconds: i64,
    ) -> Result<SessionRow, StoreError> {
        let clamped = seconds.clamp(0, i64::from(u32::MAX));
        let now = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| {
            let updated = tx
                .query_row(
                    &format!(
                        "UPDATE sessions SET time_remaining_seconds = ?1, updated_at = ?2
                         WHERE id = ?3 AND status IN ('ACTIVE', 'DISCONNECTED')
                         RETURNING {SESSION_COLUMNS}"
                    ),
                    rusqlite::params![clamped, now, id.as_str()],
                    |row| Ok(row_to_session(row)),
                )
                .optional()?
                .transpose()?;
            match updated {
                Some(row) => Ok(row),
                None => Err(not_active(fetch(tx, id)?)),
            }
        })
    }
}

/// Conditional status write usable inside a larger transaction. Returns the
/// updated row, or `None` when the current status was not in `expected`.
pub(crate) fn transition_in(
    conn: &Connection,
    id: &SessionId,
    expected: &[SessionStatus],
    next: SessionStatus,
) -> Result<Option<SessionRow>, StoreError> {
    let sources: Vec<&'static str> = expected
        .iter()
        .filter(|s| s.can_transition_to(next))
        .map(SessionStatus::as_str)
        .collect();
    if sources.is_empty() {
        return Ok(None);
    }

    let now = Utc::now().to_rfc3339();
    let end_time = next.is_terminal().then(|| now.clone());
    let sql = format!(
        "UPDATE sessions SET status = ?1, end_time = COALESCE(?2, end_time), updated_at = ?3
         WHERE id = ?4 AND status IN ({})
         RETURNING {SESSION_COLUMNS}",
        row_helpers::placeholders(4, sources.len())
    );

    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![
        Box::new(next.as_str()),
        Box::new(end_time),
        Box::new(now),
        Box::new(id.as_str().to_owned()),
    ];
    params.extend(sources.into_iter().map(|s| Box::new(s) as Box<dyn rusqlite::ToSql>));

    conn.query_row(
        &sql,
        rusqlite::params_from_iter(params.iter()),
        |row| Ok(row_to_session(row)),
    )
    .optional()?
    .transpose()
}

pub(crate) fn fetch(conn: &Connection, id: &SessionId) -> Result<SessionRow, StoreError> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
        [id.as_str()],
        |row| Ok(row_to_session(row)),
    )
    .optional()?
    .transpose()?
    .ok_or_else(|| StoreError::NotFound(format!("session {id}")))
}

/// The error to report for a write refused because of the session's status.
pub(crate) fn not_active(row: SessionRow) -> StoreError {
    StoreError::NotActive {
        session_id: row.id.to_string(),
        status: row.status,
    }
}

fn view_query(filter: &str) -> String {
    let cols = SESSION_COLUMNS
        .split(',')
        .map(|c| format!("s.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {cols}, u.student_id, u.name, e.exam_code, e.title
         FROM sessions s
         JOIN users u ON u.id = s.user_id
         JOIN exams e ON e.id = s.exam_id
         WHERE {filter}"
    )
}

pub(crate) fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let status: String = row_helpers::get(row, 3, "sessions", "status")?;
    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "sessions", "user_id")?),
        exam_id: ExamId::from_raw(row_helpers::get::<String>(row, 2, "sessions", "exam_id")?),
        status: row_helpers::parse_enum(&status, "sessions", "status")?,
        violation_count: row_helpers::get_u32(row, 4, "sessions", "violation_count")?,
        max_violations: row_helpers::get_u32(row, 5, "sessions", "max_violations")?,
        time_remaining_seconds: row_helpers::get_u32(row, 6, "sessions", "time_remaining_seconds")?,
        start_time: row_helpers::get(row, 7, "sessions", "start_time")?,
        end_time: row_helpers::get_opt(row, 8, "sessions", "end_time")?,
        client_address: row_helpers::get_opt(row, 9, "sessions", "client_address")?,
        created_at: row_helpers::get(row, 10, "sessions", "created_at")?,
        updated_at: row_helpers::get(row, 11, "sessions", "updated_at")?,
    })
}

fn row_to_view(row: &rusqlite::Row<'_>) -> Result<SessionView, StoreError> {
    Ok(SessionView {
        session: row_to_session(row)?,
        student_id: row_helpers::get_opt(row, 12, "users", "student_id")?,
        student_name: row_helpers::get(row, 13, "users", "name")?,
        exam_code: row_helpers::get(row, 14, "exams", "exam_code")?,
        exam_title: row_helpers::get(row, 15, "exams", "title")?,
    })
}
