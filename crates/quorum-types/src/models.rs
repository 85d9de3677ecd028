use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Admission state of a participant in a session's roster.
/// Removal is modeled as row deletion, never as a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Waiting,
    Approved,
}

impl ParticipantStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Approved => "approved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "approved" => Some(Self::Approved),
            _ => None,
        }
    }
}

/// Session lifecycle: admitting -> starting -> started, with closed
/// reachable from any state via explicit deactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Admitting,
    Starting,
    Started,
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admitting => "admitting",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admitting" => Some(Self::Admitting),
            "starting" => Some(Self::Starting),
            "started" => Some(Self::Started),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Wire model for a roster entry, username already resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub status: ParticipantStatus,
}
