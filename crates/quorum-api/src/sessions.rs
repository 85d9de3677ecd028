use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use rand::Rng;
use tracing::info;
use uuid::Uuid;

use quorum_db::models::JoinOutcome;
use quorum_gateway::workflow::{self, SessionError, run_db};
use quorum_types::api::{
    Claims, CreateSessionRequest, CreateSessionResponse, JoinSessionRequest, JoinSessionResponse,
    SessionDetailsResponse,
};
use quorum_types::events::SessionEvent;
use quorum_types::models::{Participant, ParticipantStatus};

use crate::auth::AppState;
use crate::error::ApiError;

const CODE_LEN: usize = 6;
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// With 36^6 codes and a handful of active sessions, repeated collisions
/// mean something is operationally wrong; give up rather than spin.
const MAX_CODE_ATTEMPTS: usize = 16;

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// POST /sessions — host creates a session for a ready, owned quiz.
pub async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let host = claims.sub;
    let quiz_id = req.quiz_id;

    let quiz = run_db(&state.db, move |db| {
        db.get_ready_quiz(&quiz_id.to_string(), &host.to_string())
    })
    .await?
    .ok_or(ApiError(SessionError::QuizNotReady))?;

    let session_id = Uuid::new_v4();
    let cap = quiz.max_participants;

    // Draw codes until one clears the active-code unique index.
    let code = run_db(&state.db, move |db| {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_code();
            let inserted = db.insert_session(
                &session_id.to_string(),
                &code,
                &host.to_string(),
                &quiz_id.to_string(),
                cap,
            )?;
            if inserted {
                return Ok(Some(code));
            }
        }
        Ok(None)
    })
    .await?
    .ok_or(ApiError(SessionError::CodeSpaceExhausted))?;

    info!("{} created session {} with code {}", claims.username, session_id, code);
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse { session_id, code }),
    ))
}

/// POST /sessions/join — locate an active session by code and join its
/// roster. A repeat join returns the existing row unchanged.
pub async fn join_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<JoinSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let code = req.code.trim().to_uppercase();
    if code.len() != CODE_LEN || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(SessionError::Validation("malformed session code".to_string()).into());
    }

    let user = claims.sub;
    let new_id = Uuid::new_v4();
    let resolved = run_db(&state.db, move |db| {
        let session = match db.get_active_session_by_code(&code)? {
            Some(session) => session,
            None => return Ok(None),
        };
        let outcome = db.join_participant(&session.id, &user.to_string(), &new_id.to_string())?;
        let quiz_name = db.get_quiz_name(&session.quiz_id)?;
        Ok(Some((session, outcome, quiz_name)))
    })
    .await?;

    let (session, outcome, quiz_name) =
        resolved.ok_or(ApiError(SessionError::SessionNotFound))?;
    let session_id = parse_id(&session.id)?;

    let participant_id = match outcome {
        JoinOutcome::Created(row) => {
            let participant = Participant {
                id: new_id,
                user_id: user,
                username: claims.username.clone(),
                status: ParticipantStatus::Waiting,
            };
            info!("{} joined session {}", claims.username, session_id);
            state
                .dispatcher
                .broadcast(session_id, SessionEvent::ParticipantJoined { participant })
                .await;
            parse_id(&row.id)?
        }
        JoinOutcome::Existing(row) => parse_id(&row.id)?,
        JoinOutcome::Full => return Err(SessionError::SessionFull.into()),
        JoinOutcome::NotAdmitting(_) => {
            return Err(
                SessionError::Validation("session has already started".to_string()).into(),
            );
        }
        JoinOutcome::NotFound => return Err(SessionError::SessionNotFound.into()),
    };

    Ok(Json(JoinSessionResponse {
        session_id,
        participant_id,
        quiz_name,
    }))
}

/// GET /sessions/{session_id} — session details with the full roster.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let session = workflow::active_session(&state.db, session_id).await?;
    let participants = workflow::roster(&state.db, session_id).await?;

    let quiz_id = session.quiz_id.clone();
    let quiz_name = run_db(&state.db, move |db| db.get_quiz_name(&quiz_id)).await?;

    Ok(Json(SessionDetailsResponse {
        code: session.code,
        quiz_name,
        is_host: session.host_id == claims.sub.to_string(),
        participants,
    }))
}

/// PUT /sessions/{session_id}/participants/{participant_id}/approve
pub async fn approve_participant(
    State(state): State<AppState>,
    Path((session_id, participant_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    workflow::approve(&state.db, &state.dispatcher, claims.sub, session_id, participant_id)
        .await?;
    Ok(Json(serde_json::json!({})))
}

/// DELETE /sessions/{session_id}/participants/{participant_id}
pub async fn remove_participant(
    State(state): State<AppState>,
    Path((session_id, participant_id)): Path<(Uuid, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    workflow::remove(&state.db, &state.dispatcher, claims.sub, session_id, participant_id)
        .await?;
    Ok(Json(serde_json::json!({})))
}

/// DELETE /sessions/{session_id} — deactivate. Idempotent, host only.
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    workflow::close(&state.db, claims.sub, session_id).await?;
    Ok(Json(serde_json::json!({})))
}

fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|e| ApiError(SessionError::Internal(anyhow::anyhow!("corrupt id '{}': {}", raw, e))))
}
