use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Participant;

/// Events fanned out to every connection bound to a session's group.
/// A connection that (re)binds late must rely on the `session-update`
/// snapshot, not on having observed prior events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A user joined the session's roster
    ParticipantJoined { participant: Participant },

    /// The host admitted a participant
    ParticipantApproved { participant_id: Uuid },

    /// The host removed a participant
    ParticipantRemoved { participant_id: Uuid },

    /// Full authoritative roster snapshot
    SessionUpdate { participants: Vec<Participant> },

    /// Countdown has begun
    QuizStarting { seconds_remaining: i64 },

    /// Countdown elapsed; the quiz is live
    QuizStarted { quiz_id: Uuid },

    /// A command from this connection failed
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// Authenticate the WebSocket connection (first frame, once)
    Identify { token: String },

    /// Bind this connection to a session's broadcast group
    JoinSession { session_id: Uuid },

    /// Host action: admit a waiting participant
    ApproveParticipant {
        session_id: Uuid,
        participant_id: Uuid,
    },

    /// Host action: remove a participant from the roster
    RemoveParticipant {
        session_id: Uuid,
        participant_id: Uuid,
    },

    /// Host action: begin the start countdown
    StartQuiz { session_id: Uuid },
}
