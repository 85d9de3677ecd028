//! Database row types — these map directly to SQLite rows.
//! Distinct from quorum-types wire models to keep the DB layer independent.

#[derive(Debug)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

#[derive(Debug)]
pub struct QuizRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub is_ready: bool,
    pub max_participants: Option<i64>,
}

#[derive(Debug)]
pub struct SessionRow {
    pub id: String,
    pub code: String,
    pub host_id: String,
    pub quiz_id: String,
    pub status: String,
    pub start_deadline: Option<String>,
    pub max_participants: Option<i64>,
}

#[derive(Debug)]
pub struct ParticipantRow {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub status: String,
}

/// Roster entry with the username resolved in the same query.
#[derive(Debug)]
pub struct RosterRow {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub status: String,
}

/// Result of the atomic join transaction.
#[derive(Debug)]
pub enum JoinOutcome {
    /// A new waiting row was inserted.
    Created(ParticipantRow),
    /// The (session, user) pair already had a row; returned unchanged.
    Existing(ParticipantRow),
    /// The session's participant cap is reached.
    Full,
    /// The session exists but is no longer admitting; carries the status.
    NotAdmitting(String),
    /// No such session.
    NotFound,
}

/// Result of the guarded admitting -> starting transition.
#[derive(Debug)]
pub enum StartOutcome {
    /// Deadline persisted, session is now starting.
    Begun,
    /// The session has no approved participants.
    NoApproved,
    /// The session is not in the admitting state; carries the status.
    NotAdmitting(String),
    /// No such session.
    NotFound,
}
