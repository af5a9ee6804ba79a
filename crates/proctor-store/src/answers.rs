use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use proctor_core::ids::{QuestionId, SessionId};
use proctor_core::SessionStatus;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;
use crate::sessions;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRow {
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub selected_answer: Option<String>,
    pub saved_at: String,
}

pub struct AnswerRepo {
    db: Database,
}

impl AnswerRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert one answer. Only an `ACTIVE` session accepts writes; the last
    /// call to reach the store wins.
    #[instrument(skip(self, selected_answer), fields(session_id = %session_id, question_id = %question_id))]
    pub fn save(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
        selected_answer: Option<&str>,
    ) -> Result<AnswerRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| {
            ensure_active(tx, session_id)?;
            upsert(tx, session_id, question_id, selected_answer, &now)?;
            Ok(AnswerRow {
                session_id: session_id.clone(),
                question_id: question_id.clone(),
                selected_answer: selected_answer.map(str::to_owned),
                saved_at: now.clone(),
            })
        })
    }

    /// Upsert a batch after a single status check. Either every answer is
    /// stored or none is.
    #[instrument(skip(self, answers), fields(session_id = %session_id, count = answers.len()))]
    pub fn save_bulk(
        &self,
        session_id: &SessionId,
        answers: &[(QuestionId, Option<String>)],
    ) -> Result<usize, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| {
            ensure_active(tx, session_id)?;
            for (question_id, selected) in answers {
                upsert(tx, session_id, question_id, selected.as_deref(), &now)?;
            }
            Ok(answers.len())
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id, question_id = %question_id))]
    pub fn get(
        &self,
        session_id: &SessionId,
        question_id: &QuestionId,
    ) -> Result<AnswerRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, question_id, selected_answer, saved_at
                 FROM answers WHERE session_id = ?1 AND question_id = ?2",
            )?;
            let mut rows = stmt.query([session_id.as_str(), question_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_answer(row),
                None => Err(StoreError::NotFound(format!(
                    "answer {question_id} in session {session_id}"
                ))),
            }
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<AnswerRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, question_id, selected_answer, saved_at
                 FROM answers WHERE session_id = ?1 ORDER BY question_id ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_answer(row)?);
            }
            Ok(results)
        })
    }
}

fn ensure_active(conn: &Connection, session_id: &SessionId) -> Result<(), StoreError> {
    let row = sessions::fetch(conn, session_id)?;
    if row.status == SessionStatus::Active {
        Ok(())
    } else {
        Err(sessions::not_active(row))
    }
}

fn upsert(
    conn: &Connection,
    session_id: &SessionId,
    question_id: &QuestionId,
    selected_answer: Option<&str>,
    saved_at: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO answers (session_id, question_id, selected_answer, saved_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(session_id, question_id)
         DO UPDATE SET selected_answer = excluded.selected_answer, saved_at = excluded.saved_at",
        rusqlite::params![session_id.as_str(), question_id.as_str(), selected_answer, saved_at],
    )?;
    Ok(())
}

fn row_to_answer(row: &rusqlite::Row<'_>) -> Result<AnswerRow, StoreError> {
    Ok(AnswerRow {
        session_id: SessionId::from_raw(row_helpers::get::<String>(
            row,
            0,
            "answers",
            "session_id",
        )?),
        question_id: QuestionId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "answers",
            "question_id",
        )?),
        selected_answer: row_helpers::get_opt(row, 2, "answers", "selected_answer")?,
        saved_at: row_helpers::get(row, 3, "answers", "saved_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::tests::fixture;
    use crate::sessions::SessionRepo;
    use assert_matches::assert_matches;

    fn open() -> (Database, SessionId) {
        let f = fixture(3);
        let s = SessionRepo::new(f.db.clone())
            .open_or_resume(&f.user, &f.exam, None)
            .unwrap();
        (f.db, s.id)
    }

    #[test]
    fn save_is_idempotent_and_last_write_wins() {
        let (db, sid) = open();
        let repo = AnswerRepo::new(db);
        let q = QuestionId::from_raw("q1");

        repo.save(&sid, &q, Some("A")).unwrap();
        repo.save(&sid, &q, Some("A")).unwrap();
        assert_eq!(repo.list(&sid).unwrap().len(), 1);

        repo.save(&sid, &q, Some("C")).unwrap();
        assert_eq!(repo.get(&sid, &q).unwrap().selected_answer.as_deref(), Some("C"));
        assert_eq!(repo.list(&sid).unwrap().len(), 1);
    }

    #[test]
    fn cleared_answer_is_stored_as_null() {
        let (db, sid) = open();
        let repo = AnswerRepo::new(db);
        let q = QuestionId::from_raw("q1");
        repo.save(&sid, &q, Some("B")).unwrap();
        repo.save(&sid, &q, None).unwrap();
        assert_eq!(repo.get(&sid, &q).unwrap().selected_answer, None);
    }

    #[test]
    fn disconnected_session_declines_saves() {
        let (db, sid) = open();
        SessionRepo::new(db.clone())
            .transition_status(&sid, &[SessionStatus::Active], SessionStatus::Disconnected)
            .unwrap();
        let repo = AnswerRepo::new(db);
        assert_matches!(
            repo.save(&sid, &QuestionId::from_raw("q1"), Some("A")),
            Err(StoreError::NotActive { status: SessionStatus::Disconnected, .. })
        );
        assert!(repo.list(&sid).unwrap().is_empty());
    }

    #[test]
    fn bulk_save_writes_all_or_nothing() {
        let (db, sid) = open();
        let repo = AnswerRepo::new(db.clone());
        let batch = vec![
            (QuestionId::from_raw("q1"), Some("A".to_string())),
            (QuestionId::from_raw("q2"), Some("B".to_string())),
            (QuestionId::from_raw("q1"), Some("D".to_string())),
        ];
        assert_eq!(repo.save_bulk(&sid, &batch).unwrap(), 3);
        let stored = repo.list(&sid).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].selected_answer.as_deref(), Some("D"));

        SessionRepo::new(db)
            .transition_status(&sid, &SessionStatus::OPEN, SessionStatus::Submitted)
            .unwrap();
        assert_matches!(
            repo.save_bulk(&sid, &[(QuestionId::from_raw("q3"), None)]),
            Err(StoreError::NotActive { .. })
        );
        assert_eq!(repo.list(&sid).unwrap().len(), 2);
    }

    #[test]
    fn unknown_session_is_not_found() {
        let (db, _) = open();
        assert_matches!(
            AnswerRepo::new(db).save(&SessionId::from_raw("sess_x"), &QuestionId::from_raw("q"), None),
            Err(StoreError::NotFound(_))
        );
    }
}
