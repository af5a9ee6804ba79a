use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{SessionId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "STUDENT",
            Self::Admin => "ADMIN",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STUDENT" => Ok(Self::Student),
            "ADMIN" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A verified caller, resolved before any handler runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
    /// Present for student connections opened against a specific exam session.
    pub session_id: Option<SessionId>,
}

impl Principal {
    pub fn student(user_id: UserId, session_id: SessionId) -> Self {
        Self {
            user_id,
            role: Role::Student,
            session_id: Some(session_id),
        }
    }

    pub fn supervisor(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
            session_id: None,
        }
    }

    pub fn is_supervisor(&self) -> bool {
        self.role == Role::Admin
    }

    /// Supervisors may act on any session; everyone else only on their own.
    pub fn may_act_on(&self, session_id: &SessionId) -> bool {
        self.is_supervisor() || self.session_id.as_ref() == Some(session_id)
    }
}
