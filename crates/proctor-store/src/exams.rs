use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use proctor_core::ids::ExamId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub const DEFAULT_MAX_VIOLATIONS: u32 = 3;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamRow {
    pub id: ExamId,
    pub exam_code: String,
    pub title: String,
    pub duration_minutes: u32,
    pub max_violations: u32,
    pub created_at: String,
}

pub struct ExamRepo {
    db: Database,
}

impl ExamRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, title))]
    pub fn create(
        &self,
        exam_code: &str,
        title: &str,
        duration_minutes: u32,
        max_violations: u32,
    ) -> Result<ExamRow, StoreError> {
        let id = ExamId::new();
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO exams (id, exam_code, title, duration_minutes, max_violations, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    id.as_str(),
                    exam_code,
                    title,
                    duration_minutes,
                    max_violations,
                    now
                ],
            )?;
            Ok(ExamRow {
                id,
                exam_code: exam_code.to_owned(),
                title: title.to_owned(),
                duration_minutes,
                max_violations,
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(exam_id = %id))]
    pub fn get(&self, id: &ExamId) -> Result<ExamRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, exam_code, title, duration_minutes, max_violations, created_at
                 FROM exams WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_exam(row),
                None => Err(StoreError::NotFound(format!("exam {id}"))),
            }
        })
    }
}

fn row_to_exam(row: &rusqlite::Row<'_>) -> Result<ExamRow, StoreError> {
    Ok(ExamRow {
        id: ExamId::from_raw(row_helpers::get::<String>(row, 0, "exams", "id")?),
        exam_code: row_helpers::get(row, 1, "exams", "exam_code")?,
        title: row_helpers::get(row, 2, "exams", "title")?,
        duration_minutes: row_helpers::get_u32(row, 3, "exams", "duration_minutes")?,
        max_violations: row_helpers::get_u32(row, 4, "exams", "max_violations")?,
        created_at: row_helpers::get(row, 5, "exams", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn create_and_get() {
        let repo = ExamRepo::new(Database::in_memory().unwrap());
        let exam = repo.create("CS101-MID", "Midterm", 60, DEFAULT_MAX_VIOLATIONS).unwrap();
        let fetched = repo.get(&exam.id).unwrap();
        assert_eq!(fetched, exam);
        assert_eq!(fetched.max_violations, 3);
    }

    #[test]
    fn zero_max_violations_rejected() {
        let repo = ExamRepo::new(Database::in_memory().unwrap());
        assert_matches!(repo.create("X", "X", 30, 0), Err(StoreError::Conflict(_)));
    }

    #[test]
    fn exam_code_is_unique() {
        let repo = ExamRepo::new(Database::in_memory().unwrap());
        repo.create("DUP", "A", 30, 3).unwrap();
        assert_matches!(repo.create("DUP", "B", 30, 3), Err(StoreError::Conflict(_)));
    }
}
