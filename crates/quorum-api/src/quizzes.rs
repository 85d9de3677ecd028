use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use quorum_gateway::workflow::{SessionError, run_db};
use quorum_types::api::{Claims, CreateQuizRequest, CreateQuizResponse};

use crate::auth::AppState;
use crate::error::ApiError;

/// POST /quizzes — minimal stand-in for the external quiz catalog: a ready
/// quiz owned by the caller, with an optional participant cap. Authoring,
/// questions, and finalization live outside this service.
pub async fn create_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateQuizRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(SessionError::Validation("quiz name must not be empty".to_string()).into());
    }
    if let Some(0) = req.max_participants {
        return Err(
            SessionError::Validation("max_participants must be positive".to_string()).into(),
        );
    }

    let quiz_id = Uuid::new_v4();
    let owner = claims.sub;
    let cap = req.max_participants.map(i64::from);
    run_db(&state.db, move |db| {
        db.create_quiz(&quiz_id.to_string(), &owner.to_string(), &name, cap)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(CreateQuizResponse { quiz_id })))
}
