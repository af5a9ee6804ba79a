use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use proctor_core::ids::UserId;
use proctor_core::Role;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Account rows are owned by the external identity service; the core only
/// reads them for display fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRow {
    pub id: UserId,
    /// Institutional student number; absent for supervisors.
    pub student_id: Option<String>,
    pub name: String,
    pub role: Role,
    pub created_at: String,
}

pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(role = %role))]
    pub fn create(
        &self,
        student_id: Option<&str>,
        name: &str,
        role: Role,
    ) -> Result<UserRow, StoreError> {
        let id = UserId::new();
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, student_id, name, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id.as_str(), student_id, name, role.as_str(), now],
            )?;
            Ok(UserRow {
                id,
                student_id: student_id.map(str::to_owned),
                name: name.to_owned(),
                role,
                created_at: now,
            })
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, student_id, name, role, created_at FROM users WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_user(row),
                None => Err(StoreError::NotFound(format!("user {id}"))),
            }
        })
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserRow, StoreError> {
    let role: String = row_helpers::get(row, 3, "users", "role")?;
    Ok(UserRow {
        id: UserId::from_raw(row_helpers::get::<String>(row, 0, "users", "id")?),
        student_id: row_helpers::get_opt(row, 1, "users", "student_id")?,
        name: row_helpers::get(row, 2, "users", "name")?,
        role: row_helpers::parse_enum(&role, "users", "role")?,
        created_at: row_helpers::get(row, 4, "users", "created_at")?,
    })
}
