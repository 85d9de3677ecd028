use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use quorum_gateway::workflow::SessionError;
use quorum_types::api::ErrorBody;

/// Boundary translation of the domain error taxonomy into structured HTTP
/// responses. Every failure produces a `{message}` body; nothing surfaces
/// as a bare status code.
pub struct ApiError(pub SessionError);

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(SessionError::Internal(e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use SessionError::*;

        let status = match &self.0 {
            Authentication => StatusCode::UNAUTHORIZED,
            NotAuthorized => StatusCode::FORBIDDEN,
            SessionNotFound | ParticipantNotFound | QuizNotReady => StatusCode::NOT_FOUND,
            CannotRemoveSelf | NoApprovedParticipants | SessionFull | Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            CodeSpaceExhausted | Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Operational conditions are logged in full, not leaked.
            error!("API error: {}", self.0);
            "internal server error".to_string()
        } else {
            self.0.to_string()
        };

        (status, Json(ErrorBody { message })).into_response()
    }
}
