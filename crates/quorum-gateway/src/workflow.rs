use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use quorum_db::Database;
use quorum_db::models::{SessionRow, StartOutcome};
use quorum_types::events::SessionEvent;
use quorum_types::models::{Participant, ParticipantStatus, SessionStatus};

use crate::countdown;
use crate::dispatcher::Dispatcher;

/// Everything that can go wrong coordinating a session. Every variant is
/// surfaced to the caller — over HTTP as a status code, over the gateway
/// as an `error` event. Nothing is silently dropped.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication required")]
    Authentication,

    #[error("not authorized to manage this session")]
    NotAuthorized,

    #[error("session not found")]
    SessionNotFound,

    #[error("participant not found")]
    ParticipantNotFound,

    #[error("quiz not found or not ready")]
    QuizNotReady,

    #[error("host cannot remove themselves")]
    CannotRemoveSelf,

    #[error("cannot start without approved participants")]
    NoApprovedParticipants,

    #[error("session is full")]
    SessionFull,

    #[error("{0}")]
    Validation(String),

    /// Operational alert: the code generator ran out of retries. Practically
    /// unreachable at expected scale, but never ignored.
    #[error("session code space exhausted")]
    CodeSpaceExhausted,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Run a blocking store call off the async runtime.
pub async fn run_db<T, F>(db: &Arc<Database>, f: F) -> Result<T, SessionError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| SessionError::Internal(anyhow!("spawn_blocking join error: {}", e)))?
        .map_err(SessionError::Internal)
}

/// Look up a session that is still active (not closed).
pub async fn active_session(
    db: &Arc<Database>,
    session_id: Uuid,
) -> Result<SessionRow, SessionError> {
    let sid = session_id.to_string();
    let row = run_db(db, move |db| db.get_session(&sid))
        .await?
        .ok_or(SessionError::SessionNotFound)?;
    if row.status == SessionStatus::Closed.as_str() {
        return Err(SessionError::SessionNotFound);
    }
    Ok(row)
}

/// Full roster snapshot, usernames resolved.
pub async fn roster(db: &Arc<Database>, session_id: Uuid) -> Result<Vec<Participant>, SessionError> {
    let sid = session_id.to_string();
    let rows = run_db(db, move |db| db.list_roster(&sid)).await?;
    rows.into_iter()
        .map(|row| {
            Ok(Participant {
                id: parse_id(&row.id)?,
                user_id: parse_id(&row.user_id)?,
                username: row.username,
                status: ParticipantStatus::parse(&row.status)
                    .ok_or_else(|| SessionError::Internal(anyhow!("corrupt status: {}", row.status)))?,
            })
        })
        .collect()
}

/// Host action: admit a waiting participant. Approving an already-approved
/// participant is a no-op success.
pub async fn approve(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    requester: Uuid,
    session_id: Uuid,
    participant_id: Uuid,
) -> Result<(), SessionError> {
    let session = active_session(db, session_id).await?;
    require_host(&session, requester)?;

    let (sid, pid) = (session_id.to_string(), participant_id.to_string());
    let updated = run_db(db, move |db| db.approve_participant(&sid, &pid)).await?;
    if !updated {
        // Missing, or a concurrent remove won; either way there is no row
        // to announce.
        return Err(SessionError::ParticipantNotFound);
    }

    dispatcher
        .broadcast(session_id, SessionEvent::ParticipantApproved { participant_id })
        .await;
    Ok(())
}

/// Host action: delete a participant row. The host cannot target itself.
pub async fn remove(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    requester: Uuid,
    session_id: Uuid,
    participant_id: Uuid,
) -> Result<(), SessionError> {
    let session = active_session(db, session_id).await?;
    require_host(&session, requester)?;

    let (sid, pid) = (session_id.to_string(), participant_id.to_string());
    let target = run_db(db, {
        let (sid, pid) = (sid.clone(), pid.clone());
        move |db| db.get_participant(&sid, &pid)
    })
    .await?
    .ok_or(SessionError::ParticipantNotFound)?;

    if target.user_id == session.host_id {
        return Err(SessionError::CannotRemoveSelf);
    }

    let deleted = run_db(db, move |db| db.delete_participant(&sid, &pid)).await?;
    if !deleted {
        // Raced with a concurrent remove; the row is gone either way.
        return Err(SessionError::ParticipantNotFound);
    }

    dispatcher
        .broadcast(session_id, SessionEvent::ParticipantRemoved { participant_id })
        .await;
    Ok(())
}

/// Host action: begin the start countdown. Requires at least one approved
/// participant; the admitting -> starting transition and the deadline write
/// are one guarded unit in the store.
pub async fn start(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    requester: Uuid,
    session_id: Uuid,
) -> Result<(), SessionError> {
    let session = active_session(db, session_id).await?;
    require_host(&session, requester)?;
    let quiz_id = parse_id(&session.quiz_id)?;

    let deadline = Utc::now() + chrono::Duration::seconds(countdown::COUNTDOWN_SECS);
    let (sid, stamp) = (session_id.to_string(), deadline.to_rfc3339());
    let outcome = run_db(db, move |db| db.begin_start(&sid, &stamp)).await?;

    match outcome {
        StartOutcome::Begun => {
            info!(
                "Session {} starting, deadline {}",
                session_id,
                deadline.to_rfc3339()
            );
            dispatcher
                .broadcast(
                    session_id,
                    SessionEvent::QuizStarting {
                        seconds_remaining: countdown::COUNTDOWN_SECS,
                    },
                )
                .await;
            countdown::spawn_finisher(db.clone(), dispatcher.clone(), session_id, quiz_id, deadline);
            Ok(())
        }
        StartOutcome::NoApproved => Err(SessionError::NoApprovedParticipants),
        StartOutcome::NotAdmitting(status) => Err(SessionError::Validation(format!(
            "session is already {}",
            status
        ))),
        StartOutcome::NotFound => Err(SessionError::SessionNotFound),
    }
}

/// Host action: deactivate the session. Idempotent.
pub async fn close(
    db: &Arc<Database>,
    requester: Uuid,
    session_id: Uuid,
) -> Result<(), SessionError> {
    let sid = session_id.to_string();
    let session = run_db(db, {
        let sid = sid.clone();
        move |db| db.get_session(&sid)
    })
    .await?
    .ok_or(SessionError::SessionNotFound)?;
    require_host(&session, requester)?;

    run_db(db, move |db| db.close_session(&sid)).await?;
    info!("Session {} closed", session_id);
    Ok(())
}

fn require_host(session: &SessionRow, requester: Uuid) -> Result<(), SessionError> {
    if session.host_id != requester.to_string() {
        return Err(SessionError::NotAuthorized);
    }
    Ok(())
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid, SessionError> {
    raw.parse()
        .map_err(|e| SessionError::Internal(anyhow!("corrupt id '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_db::models::JoinOutcome;

    struct Fixture {
        db: Arc<Database>,
        dispatcher: Dispatcher,
        host: Uuid,
        session: Uuid,
        quiz: Uuid,
    }

    fn fixture() -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let host = Uuid::new_v4();
        let quiz = Uuid::new_v4();
        let session = Uuid::new_v4();
        db.create_user(&host.to_string(), "host", "hash").unwrap();
        db.create_quiz(&quiz.to_string(), &host.to_string(), "Q1", None)
            .unwrap();
        assert!(
            db.insert_session(
                &session.to_string(),
                "AB12CD",
                &host.to_string(),
                &quiz.to_string(),
                None,
            )
            .unwrap()
        );
        Fixture {
            db,
            dispatcher: Dispatcher::new(),
            host,
            session,
            quiz,
        }
    }

    fn join_user(fx: &Fixture, username: &str) -> (Uuid, Uuid) {
        let user = Uuid::new_v4();
        let participant = Uuid::new_v4();
        fx.db.create_user(&user.to_string(), username, "hash").unwrap();
        let outcome = fx
            .db
            .join_participant(
                &fx.session.to_string(),
                &user.to_string(),
                &participant.to_string(),
            )
            .unwrap();
        assert!(matches!(outcome, JoinOutcome::Created(_)));
        (user, participant)
    }

    #[tokio::test]
    async fn non_host_actions_fail_with_an_explicit_error() {
        let fx = fixture();
        let (intruder, participant) = join_user(&fx, "intruder");

        let err = approve(&fx.db, &fx.dispatcher, intruder, fx.session, participant)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotAuthorized));

        let err = start(&fx.db, &fx.dispatcher, intruder, fx.session)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotAuthorized));
    }

    #[tokio::test]
    async fn approve_is_idempotent_and_broadcast() {
        let fx = fixture();
        let (_, participant) = join_user(&fx, "alice");
        let mut rx = fx.dispatcher.join_group(fx.session).await;

        approve(&fx.db, &fx.dispatcher, fx.host, fx.session, participant)
            .await
            .unwrap();
        approve(&fx.db, &fx.dispatcher, fx.host, fx.session, participant)
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::ParticipantApproved { participant_id } if participant_id == participant
        ));

        let roster = roster(&fx.db, fx.session).await.unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].status, ParticipantStatus::Approved);
    }

    #[tokio::test]
    async fn approving_a_missing_participant_reports_not_found() {
        let fx = fixture();
        let err = approve(&fx.db, &fx.dispatcher, fx.host, fx.session, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ParticipantNotFound));
    }

    #[tokio::test]
    async fn approving_a_removed_participant_fails_without_a_ghost_event() {
        let fx = fixture();
        let (_, participant) = join_user(&fx, "alice");
        let mut rx = fx.dispatcher.join_group(fx.session).await;

        remove(&fx.db, &fx.dispatcher, fx.host, fx.session, participant)
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::ParticipantRemoved { .. }
        ));

        let err = approve(&fx.db, &fx.dispatcher, fx.host, fx.session, participant)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::ParticipantNotFound));

        // No participant-approved follows for the deleted row.
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn host_cannot_remove_their_own_row() {
        let fx = fixture();
        // The host joined their own session like any participant.
        let own_row = Uuid::new_v4();
        let outcome = fx
            .db
            .join_participant(
                &fx.session.to_string(),
                &fx.host.to_string(),
                &own_row.to_string(),
            )
            .unwrap();
        assert!(matches!(outcome, JoinOutcome::Created(_)));

        let err = remove(&fx.db, &fx.dispatcher, fx.host, fx.session, own_row)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::CannotRemoveSelf));
        assert_eq!(roster(&fx.db, fx.session).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removal_is_broadcast_and_leaves_the_roster_clean() {
        let fx = fixture();
        let (_, participant) = join_user(&fx, "alice");
        let mut rx = fx.dispatcher.join_group(fx.session).await;

        remove(&fx.db, &fx.dispatcher, fx.host, fx.session, participant)
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::ParticipantRemoved { participant_id } if participant_id == participant
        ));
        assert!(roster(&fx.db, fx.session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_requires_an_approved_participant() {
        let fx = fixture();
        let err = start(&fx.db, &fx.dispatcher, fx.host, fx.session)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoApprovedParticipants));

        let (_, participant) = join_user(&fx, "alice");
        let err = start(&fx.db, &fx.dispatcher, fx.host, fx.session)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoApprovedParticipants));

        approve(&fx.db, &fx.dispatcher, fx.host, fx.session, participant)
            .await
            .unwrap();
        start(&fx.db, &fx.dispatcher, fx.host, fx.session)
            .await
            .unwrap();

        // A second start is a validation failure, not a silent no-op.
        let err = start(&fx.db, &fx.dispatcher, fx.host, fx.session)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn full_admission_and_countdown_scenario() {
        let fx = fixture();
        let (_, participant) = join_user(&fx, "u1");
        let mut rx = fx.dispatcher.join_group(fx.session).await;

        approve(&fx.db, &fx.dispatcher, fx.host, fx.session, participant)
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::ParticipantApproved { .. }
        ));

        start(&fx.db, &fx.dispatcher, fx.host, fx.session)
            .await
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::QuizStarting { seconds_remaining: 30 }
        ));

        // Paused clock: the 30 s countdown elapses without wall time.
        match rx.recv().await.unwrap() {
            SessionEvent::QuizStarted { quiz_id } => assert_eq!(quiz_id, fx.quiz),
            other => panic!("expected quiz-started, got {:?}", other),
        }

        let row = fx.db.get_session(&fx.session.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "started");
    }

    #[tokio::test]
    async fn close_is_host_only_and_idempotent() {
        let fx = fixture();
        let (intruder, _) = join_user(&fx, "intruder");

        let err = close(&fx.db, intruder, fx.session).await.unwrap_err();
        assert!(matches!(err, SessionError::NotAuthorized));

        close(&fx.db, fx.host, fx.session).await.unwrap();
        close(&fx.db, fx.host, fx.session).await.unwrap();

        let err = active_session(&fx.db, fx.session).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionNotFound));
    }
}
