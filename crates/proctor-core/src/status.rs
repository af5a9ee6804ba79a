//! Session lifecycle states and the legal transitions between them.
//!
//! ```text
//! ACTIVE       -> DISCONNECTED | SUBMITTED | DISQUALIFIED | EXPIRED
//! DISCONNECTED -> ACTIVE | SUBMITTED | DISQUALIFIED | EXPIRED
//! SUBMITTED, DISQUALIFIED, EXPIRED -> (none)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Disconnected,
    Submitted,
    Disqualified,
    Expired,
}

impl SessionStatus {
    /// Statuses from which a session can still change.
    pub const OPEN: [SessionStatus; 2] = [SessionStatus::Active, SessionStatus::Disconnected];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Disconnected => "DISCONNECTED",
            Self::Submitted => "SUBMITTED",
            Self::Disqualified => "DISQUALIFIED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::Disqualified | Self::Expired)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    /// Self-loops are not transitions.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match self {
            Self::Active => next != Self::Active,
            Self::Disconnected => next != Self::Disconnected,
            Self::Submitted | Self::Disqualified | Self::Expired => false,
        }
    }

    /// Statuses a session may currently hold for `next` to be reachable.
    pub fn sources_of(next: SessionStatus) -> Vec<SessionStatus> {
        [Self::Active, Self::Disconnected]
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "DISCONNECTED" => Ok(Self::Disconnected),
            "SUBMITTED" => Ok(Self::Submitted),
            "DISQUALIFIED" => Ok(Self::Disqualified),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// How a session reached `SUBMITTED`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionType {
    Manual,
    AutoTime,
    AutoViolation,
    ForceSubmit,
}

impl Default for SubmissionType {
    fn default() -> Self {
        Self::Manual
    }
}

impl fmt::Display for SubmissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "MANUAL",
            Self::AutoTime => "AUTO_TIME",
            Self::AutoViolation => "AUTO_VIOLATION",
            Self::ForceSubmit => "FORCE_SUBMIT",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionStatus; 5] = [
        SessionStatus::Active,
        SessionStatus::Disconnected,
        SessionStatus::Submitted,
        SessionStatus::Disqualified,
        SessionStatus::Expired,
    ];

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn active_reaches_every_other_state() {
        for to in ALL.iter().filter(|s| **s != SessionStatus::Active) {
            assert!(SessionStatus::Active.can_transition_to(*to));
        }
    }

    #[test]
    fn disconnected_can_come_back() {
        assert!(SessionStatus::Disconnected.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Disconnected.can_transition_to(SessionStatus::Disconnected));
    }

    #[test]
    fn sources_of_active_is_only_disconnected() {
        assert_eq!(
            SessionStatus::sources_of(SessionStatus::Active),
            vec![SessionStatus::Disconnected]
        );
        assert_eq!(
            SessionStatus::sources_of(SessionStatus::Disqualified),
            SessionStatus::OPEN.to_vec()
        );
    }

    #[test]
    fn string_forms_match_storage() {
        for s in ALL {
            assert_eq!(s.as_str().parse::<SessionStatus>().unwrap(), s);
            assert_eq!(serde_json::to_value(s).unwrap(), s.as_str());
        }
        assert!("active".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn submission_type_wire_names() {
        let t: SubmissionType = serde_json::from_str("\"AUTO_TIME\"").unwrap();
        assert_eq!(t, SubmissionType::AutoTime);
        assert_eq!(SubmissionType::ForceSubmit.to_string(), "FORCE_SUBMIT");
        assert_eq!(SubmissionType::default(), SubmissionType::Manual);
    }
}
