use crate::Database;
use crate::models::{
    JoinOutcome, ParticipantRow, QuizRow, RosterRow, SessionRow, StartOutcome, UserRow,
};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, TransactionBehavior};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_username(conn, username))
    }

    pub fn get_username_by_id(&self, id: &str) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT username FROM users WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .map_err(|_| anyhow!("User not found: {}", id))
        })
    }

    // -- Quizzes --

    pub fn create_quiz(
        &self,
        id: &str,
        owner_id: &str,
        name: &str,
        max_participants: Option<i64>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO quizzes (id, owner_id, name, is_ready, max_participants)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                rusqlite::params![id, owner_id, name, max_participants],
            )?;
            Ok(())
        })
    }

    /// Narrow quiz-catalog seam: the quiz, but only if it is ready and
    /// owned by `owner_id`.
    pub fn get_ready_quiz(&self, quiz_id: &str, owner_id: &str) -> Result<Option<QuizRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_id, name, is_ready, max_participants
                 FROM quizzes WHERE id = ?1 AND owner_id = ?2 AND is_ready = 1",
            )?;
            let row = stmt
                .query_row([quiz_id, owner_id], |row| {
                    Ok(QuizRow {
                        id: row.get(0)?,
                        owner_id: row.get(1)?,
                        name: row.get(2)?,
                        is_ready: row.get(3)?,
                        max_participants: row.get(4)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    pub fn get_quiz_name(&self, quiz_id: &str) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT name FROM quizzes WHERE id = ?1", [quiz_id], |row| {
                row.get(0)
            })
            .map_err(|_| anyhow!("Quiz not found: {}", quiz_id))
        })
    }

    // -- Sessions --

    /// Insert a new admitting session. Returns false when the code collides
    /// with another active session (the partial unique index fired), so the
    /// registry can retry with a fresh code.
    pub fn insert_session(
        &self,
        id: &str,
        code: &str,
        host_id: &str,
        quiz_id: &str,
        max_participants: Option<i64>,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO sessions (id, code, host_id, quiz_id, max_participants)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, code, host_id, quiz_id, max_participants],
            );
            match inserted {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| query_session(conn, "id = ?1", id))
    }

    /// Resolve a normalized code to its active (non-closed) session.
    pub fn get_active_session_by_code(&self, code: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| query_session(conn, "code = ?1 AND status != 'closed'", code))
    }

    /// Idempotent deactivation.
    pub fn close_session(&self, id: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("UPDATE sessions SET status = 'closed' WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    /// Guarded admitting -> starting transition. The approved-count check
    /// and the status flip run in one immediate transaction so a concurrent
    /// duplicate start or remove cannot slip between them.
    pub fn begin_start(&self, session_id: &str, deadline_rfc3339: &str) -> Result<StartOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM sessions WHERE id = ?1",
                    [session_id],
                    |row| row.get(0),
                )
                .optional()?;

            match status {
                None => return Ok(StartOutcome::NotFound),
                Some(s) if s != "admitting" => return Ok(StartOutcome::NotAdmitting(s)),
                Some(_) => {}
            }

            let approved: i64 = tx.query_row(
                "SELECT COUNT(*) FROM participants WHERE session_id = ?1 AND status = 'approved'",
                [session_id],
                |row| row.get(0),
            )?;
            if approved == 0 {
                return Ok(StartOutcome::NoApproved);
            }

            tx.execute(
                "UPDATE sessions SET status = 'starting', start_deadline = ?2
                 WHERE id = ?1 AND status = 'admitting'",
                rusqlite::params![session_id, deadline_rfc3339],
            )?;
            tx.commit()?;
            Ok(StartOutcome::Begun)
        })
    }

    /// Guarded starting -> started transition. Returns false if the session
    /// was closed (or already finished) in the meantime.
    pub fn complete_start(&self, session_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET status = 'started'
                 WHERE id = ?1 AND status = 'starting'",
                [session_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Sessions whose countdown was interrupted by a process restart.
    pub fn sessions_pending_start(&self) -> Result<Vec<SessionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, code, host_id, quiz_id, status, start_deadline, max_participants
                 FROM sessions WHERE status = 'starting'",
            )?;
            let rows = stmt
                .query_map([], map_session)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Participants --

    /// Atomic join: existence, idempotency, and the capacity cap are all
    /// checked and the insert performed inside one immediate transaction,
    /// so concurrent joins near the cap cannot overshoot it.
    pub fn join_participant(
        &self,
        session_id: &str,
        user_id: &str,
        new_id: &str,
    ) -> Result<JoinOutcome> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let session: Option<(String, Option<i64>)> = tx
                .query_row(
                    "SELECT status, max_participants FROM sessions WHERE id = ?1",
                    [session_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let cap = match session {
                None => return Ok(JoinOutcome::NotFound),
                Some((status, cap)) => match status.as_str() {
                    // A closed session is indistinguishable from a missing one.
                    "closed" => return Ok(JoinOutcome::NotFound),
                    "admitting" => cap,
                    _ => return Ok(JoinOutcome::NotAdmitting(status)),
                },
            };

            let existing = tx
                .query_row(
                    "SELECT id, session_id, user_id, status FROM participants
                     WHERE session_id = ?1 AND user_id = ?2",
                    [session_id, user_id],
                    map_participant,
                )
                .optional()?;
            if let Some(row) = existing {
                return Ok(JoinOutcome::Existing(row));
            }

            if let Some(cap) = cap {
                let count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM participants WHERE session_id = ?1",
                    [session_id],
                    |row| row.get(0),
                )?;
                if count >= cap {
                    return Ok(JoinOutcome::Full);
                }
            }

            tx.execute(
                "INSERT INTO participants (id, session_id, user_id, status)
                 VALUES (?1, ?2, ?3, 'waiting')",
                [new_id, session_id, user_id],
            )?;
            tx.commit()?;

            Ok(JoinOutcome::Created(ParticipantRow {
                id: new_id.to_string(),
                session_id: session_id.to_string(),
                user_id: user_id.to_string(),
                status: "waiting".to_string(),
            }))
        })
    }

    pub fn get_participant(
        &self,
        session_id: &str,
        participant_id: &str,
    ) -> Result<Option<ParticipantRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, session_id, user_id, status FROM participants
                     WHERE id = ?1 AND session_id = ?2",
                    [participant_id, session_id],
                    map_participant,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Idempotent: approving an already-approved row changes nothing.
    /// Returns false when no row matched, so a caller racing a remove sees
    /// the miss instead of a phantom success.
    pub fn approve_participant(&self, session_id: &str, participant_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE participants SET status = 'approved'
                 WHERE id = ?1 AND session_id = ?2",
                [participant_id, session_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn delete_participant(&self, session_id: &str, participant_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM participants WHERE id = ?1 AND session_id = ?2",
                [participant_id, session_id],
            )?;
            Ok(deleted > 0)
        })
    }

    /// Full roster with usernames resolved in a single JOIN (no N+1).
    pub fn list_roster(&self, session_id: &str) -> Result<Vec<RosterRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.user_id, u.username, p.status
                 FROM participants p
                 LEFT JOIN users u ON p.user_id = u.id
                 WHERE p.session_id = ?1
                 ORDER BY p.created_at, p.rowid",
            )?;
            let rows = stmt
                .query_map([session_id], |row| {
                    Ok(RosterRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        username: row
                            .get::<_, Option<String>>(2)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        status: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_session(conn: &Connection, predicate: &str, param: &str) -> Result<Option<SessionRow>> {
    let sql = format!(
        "SELECT id, code, host_id, quiz_id, status, start_deadline, max_participants
         FROM sessions WHERE {}",
        predicate
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([param], map_session).optional()?;
    Ok(row)
}

fn map_session(row: &rusqlite::Row<'_>) -> std::result::Result<SessionRow, rusqlite::Error> {
    Ok(SessionRow {
        id: row.get(0)?,
        code: row.get(1)?,
        host_id: row.get(2)?,
        quiz_id: row.get(3)?,
        status: row.get(4)?,
        start_deadline: row.get(5)?,
        max_participants: row.get(6)?,
    })
}

fn map_participant(
    row: &rusqlite::Row<'_>,
) -> std::result::Result<ParticipantRow, rusqlite::Error> {
    Ok(ParticipantRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        user_id: row.get(2)?,
        status: row.get(3)?,
    })
}

fn query_user_by_username(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare("SELECT id, username, password, created_at FROM users WHERE username = ?1")?;

    let row = stmt
        .query_row([username], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn seed_user(db: &Database, username: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        db.create_user(&id, username, "hash").unwrap();
        id
    }

    fn seed_quiz(db: &Database, owner: &str, cap: Option<i64>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        db.create_quiz(&id, owner, "Capitals of Europe", cap).unwrap();
        id
    }

    fn seed_session(db: &Database, host: &str, quiz: &str, code: &str, cap: Option<i64>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        assert!(db.insert_session(&id, code, host, quiz, cap).unwrap());
        id
    }

    #[test]
    fn code_is_unique_among_active_sessions_only() {
        let db = db();
        let host = seed_user(&db, "host");
        let quiz = seed_quiz(&db, &host, None);

        let first = seed_session(&db, &host, &quiz, "AB12CD", None);
        let second = uuid::Uuid::new_v4().to_string();
        assert!(!db.insert_session(&second, "AB12CD", &host, &quiz, None).unwrap());

        // A closed session releases its code.
        db.close_session(&first).unwrap();
        assert!(db.insert_session(&second, "AB12CD", &host, &quiz, None).unwrap());
    }

    #[test]
    fn join_is_idempotent_per_user() {
        let db = db();
        let host = seed_user(&db, "host");
        let user = seed_user(&db, "alice");
        let quiz = seed_quiz(&db, &host, None);
        let session = seed_session(&db, &host, &quiz, "QQ11ZZ", None);

        let first_id = uuid::Uuid::new_v4().to_string();
        let created = db.join_participant(&session, &user, &first_id).unwrap();
        assert!(matches!(created, JoinOutcome::Created(ref p) if p.id == first_id));

        let second_id = uuid::Uuid::new_v4().to_string();
        let repeat = db.join_participant(&session, &user, &second_id).unwrap();
        match repeat {
            JoinOutcome::Existing(p) => assert_eq!(p.id, first_id),
            _ => panic!("repeat join must return the existing row"),
        }

        assert_eq!(db.list_roster(&session).unwrap().len(), 1);
    }

    #[test]
    fn join_enforces_capacity_atomically_at_the_row_level() {
        let db = db();
        let host = seed_user(&db, "host");
        let quiz = seed_quiz(&db, &host, Some(2));
        let session = seed_session(&db, &host, &quiz, "CAP2XX", Some(2));

        let a = seed_user(&db, "a");
        let b = seed_user(&db, "b");
        let c = seed_user(&db, "c");

        let a_row = uuid::Uuid::new_v4().to_string();
        assert!(matches!(
            db.join_participant(&session, &a, &a_row).unwrap(),
            JoinOutcome::Created(_)
        ));
        assert!(matches!(
            db.join_participant(&session, &b, &uuid::Uuid::new_v4().to_string()).unwrap(),
            JoinOutcome::Created(_)
        ));
        assert!(matches!(
            db.join_participant(&session, &c, &uuid::Uuid::new_v4().to_string()).unwrap(),
            JoinOutcome::Full
        ));

        // A user already in the roster is unaffected by the cap.
        match db.join_participant(&session, &a, &uuid::Uuid::new_v4().to_string()).unwrap() {
            JoinOutcome::Existing(p) => assert_eq!(p.id, a_row),
            _ => panic!("existing participant must be returned even at capacity"),
        }
    }

    #[test]
    fn join_rejects_missing_closed_and_started_sessions() {
        let db = db();
        let host = seed_user(&db, "host");
        let user = seed_user(&db, "alice");
        let quiz = seed_quiz(&db, &host, None);
        let session = seed_session(&db, &host, &quiz, "GONE00", None);

        let ghost = uuid::Uuid::new_v4().to_string();
        assert!(matches!(
            db.join_participant(&ghost, &user, &uuid::Uuid::new_v4().to_string()).unwrap(),
            JoinOutcome::NotFound
        ));

        db.close_session(&session).unwrap();
        assert!(matches!(
            db.join_participant(&session, &user, &uuid::Uuid::new_v4().to_string()).unwrap(),
            JoinOutcome::NotFound
        ));

        let running = seed_session(&db, &host, &quiz, "RUN000", None);
        let joined = uuid::Uuid::new_v4().to_string();
        db.join_participant(&running, &user, &joined).unwrap();
        db.approve_participant(&running, &joined).unwrap();
        assert!(matches!(
            db.begin_start(&running, "2026-01-01T00:00:30Z").unwrap(),
            StartOutcome::Begun
        ));

        let late = seed_user(&db, "late");
        assert!(matches!(
            db.join_participant(&running, &late, &uuid::Uuid::new_v4().to_string()).unwrap(),
            JoinOutcome::NotAdmitting(s) if s == "starting"
        ));
    }

    #[test]
    fn approve_is_idempotent() {
        let db = db();
        let host = seed_user(&db, "host");
        let user = seed_user(&db, "alice");
        let quiz = seed_quiz(&db, &host, None);
        let session = seed_session(&db, &host, &quiz, "OKOKOK", None);

        let pid = uuid::Uuid::new_v4().to_string();
        db.join_participant(&session, &user, &pid).unwrap();

        assert!(db.approve_participant(&session, &pid).unwrap());
        assert!(db.approve_participant(&session, &pid).unwrap());

        let roster = db.list_roster(&session).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].status, "approved");

        // A row that never existed (or was already deleted) is a miss.
        let ghost = uuid::Uuid::new_v4().to_string();
        assert!(!db.approve_participant(&session, &ghost).unwrap());
    }

    #[test]
    fn removed_participants_leave_no_trace_in_the_roster() {
        let db = db();
        let host = seed_user(&db, "host");
        let user = seed_user(&db, "alice");
        let quiz = seed_quiz(&db, &host, None);
        let session = seed_session(&db, &host, &quiz, "RM0VED", None);

        let pid = uuid::Uuid::new_v4().to_string();
        db.join_participant(&session, &user, &pid).unwrap();

        assert!(db.delete_participant(&session, &pid).unwrap());
        assert!(!db.delete_participant(&session, &pid).unwrap());
        assert!(db.list_roster(&session).unwrap().is_empty());
        assert!(db.get_participant(&session, &pid).unwrap().is_none());
    }

    #[test]
    fn start_requires_an_approved_participant_and_runs_once() {
        let db = db();
        let host = seed_user(&db, "host");
        let user = seed_user(&db, "alice");
        let quiz = seed_quiz(&db, &host, None);
        let session = seed_session(&db, &host, &quiz, "START1", None);

        assert!(matches!(
            db.begin_start(&session, "2026-01-01T00:00:30Z").unwrap(),
            StartOutcome::NoApproved
        ));

        let pid = uuid::Uuid::new_v4().to_string();
        db.join_participant(&session, &user, &pid).unwrap();
        assert!(matches!(
            db.begin_start(&session, "2026-01-01T00:00:30Z").unwrap(),
            StartOutcome::NoApproved
        ));

        db.approve_participant(&session, &pid).unwrap();
        assert!(matches!(
            db.begin_start(&session, "2026-01-01T00:00:30Z").unwrap(),
            StartOutcome::Begun
        ));
        let row = db.get_session(&session).unwrap().unwrap();
        assert_eq!(row.status, "starting");
        assert_eq!(row.start_deadline.as_deref(), Some("2026-01-01T00:00:30Z"));

        // Duplicate start attempts are rejected by the status guard.
        assert!(matches!(
            db.begin_start(&session, "2026-01-01T00:01:00Z").unwrap(),
            StartOutcome::NotAdmitting(s) if s == "starting"
        ));

        assert!(db.complete_start(&session).unwrap());
        assert!(!db.complete_start(&session).unwrap());
        assert_eq!(db.get_session(&session).unwrap().unwrap().status, "started");
    }

    #[test]
    fn pending_starts_are_recoverable_after_restart() {
        let db = db();
        let host = seed_user(&db, "host");
        let user = seed_user(&db, "alice");
        let quiz = seed_quiz(&db, &host, None);
        let session = seed_session(&db, &host, &quiz, "RESUME", None);

        let pid = uuid::Uuid::new_v4().to_string();
        db.join_participant(&session, &user, &pid).unwrap();
        db.approve_participant(&session, &pid).unwrap();
        db.begin_start(&session, "2026-01-01T00:00:30Z").unwrap();

        let pending = db.sessions_pending_start().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, session);
        assert_eq!(pending[0].start_deadline.as_deref(), Some("2026-01-01T00:00:30Z"));
    }

    #[test]
    fn roster_resolves_usernames_in_one_query() {
        let db = db();
        let host = seed_user(&db, "host");
        let alice = seed_user(&db, "alice");
        let bob = seed_user(&db, "bob");
        let quiz = seed_quiz(&db, &host, None);
        let session = seed_session(&db, &host, &quiz, "NAMES1", None);

        db.join_participant(&session, &alice, &uuid::Uuid::new_v4().to_string())
            .unwrap();
        db.join_participant(&session, &bob, &uuid::Uuid::new_v4().to_string())
            .unwrap();

        let names: Vec<String> = db
            .list_roster(&session)
            .unwrap()
            .into_iter()
            .map(|r| r.username)
            .collect();
        assert_eq!(names, vec!["alice".to_string(), "bob".to_string()]);
    }
}
