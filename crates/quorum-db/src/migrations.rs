use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS quizzes (
            id                  TEXT PRIMARY KEY,
            owner_id            TEXT NOT NULL REFERENCES users(id),
            name                TEXT NOT NULL,
            is_ready            INTEGER NOT NULL DEFAULT 0,
            max_participants    INTEGER,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id                  TEXT PRIMARY KEY,
            code                TEXT NOT NULL,
            host_id             TEXT NOT NULL REFERENCES users(id),
            quiz_id             TEXT NOT NULL REFERENCES quizzes(id),
            status              TEXT NOT NULL DEFAULT 'admitting'
                CHECK (status IN ('admitting', 'starting', 'started', 'closed')),
            start_deadline      TEXT,
            max_participants    INTEGER,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- At most one non-closed session may hold a given code.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_active_code
            ON sessions(code) WHERE status != 'closed';

        CREATE TABLE IF NOT EXISTS participants (
            id          TEXT PRIMARY KEY,
            session_id  TEXT NOT NULL REFERENCES sessions(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            status      TEXT NOT NULL DEFAULT 'waiting'
                CHECK (status IN ('waiting', 'approved')),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(session_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_session
            ON participants(session_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
