use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use quorum_db::Database;
use quorum_types::events::SessionEvent;

use crate::dispatcher::Dispatcher;

/// Fixed countdown between the host's start action and the quiz going live.
pub const COUNTDOWN_SECS: i64 = 30;

/// Drive a starting session to started once its persisted deadline passes.
///
/// The remaining time is always recomputed from the deadline stored on the
/// session row, never from an in-process timer, so a finisher respawned
/// after a restart resumes mid-countdown instead of losing the transition.
pub fn spawn_finisher(
    db: Arc<Database>,
    dispatcher: Dispatcher,
    session_id: Uuid,
    quiz_id: Uuid,
    deadline: DateTime<Utc>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let remaining = deadline.signed_duration_since(Utc::now());
        if let Ok(wait) = remaining.to_std() {
            tokio::time::sleep(wait).await;
        }
        // A negative remainder means the deadline already passed; fall
        // straight through to the transition.

        let sid = session_id.to_string();
        let flipped = {
            let db = db.clone();
            tokio::task::spawn_blocking(move || db.complete_start(&sid)).await
        };

        match flipped {
            Ok(Ok(true)) => {
                info!("Session {} started (quiz {})", session_id, quiz_id);
                dispatcher
                    .broadcast(session_id, SessionEvent::QuizStarted { quiz_id })
                    .await;
            }
            Ok(Ok(false)) => {
                info!("Session {} left the starting state mid-countdown, start skipped", session_id);
            }
            Ok(Err(e)) => error!("Failed to complete start for session {}: {}", session_id, e),
            Err(e) => error!("Countdown finisher join error for session {}: {}", session_id, e),
        }
    })
}

/// Respawn finishers for every session caught mid-countdown by a restart.
/// Called once at server boot, before the listener accepts traffic.
pub async fn resume_pending(db: &Arc<Database>, dispatcher: &Dispatcher) -> anyhow::Result<()> {
    let rows = {
        let db = db.clone();
        tokio::task::spawn_blocking(move || db.sessions_pending_start()).await??
    };

    let mut resumed = 0usize;
    for row in rows {
        let (session_id, quiz_id) = match (row.id.parse::<Uuid>(), row.quiz_id.parse::<Uuid>()) {
            (Ok(s), Ok(q)) => (s, q),
            _ => {
                warn!("Skipping pending session with corrupt ids: {}", row.id);
                continue;
            }
        };

        // A missing or unparseable deadline degrades to "start now" rather
        // than stranding the session in starting forever.
        let deadline = row
            .start_deadline
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|| {
                warn!("Session {} has no usable start deadline, starting now", session_id);
                Utc::now()
            });

        spawn_finisher(db.clone(), dispatcher.clone(), session_id, quiz_id, deadline);
        resumed += 1;
    }

    if resumed > 0 {
        info!("Resumed {} mid-countdown session(s)", resumed);
    }
    Ok(())
}
