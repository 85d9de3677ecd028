use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Participant;

// -- JWT Claims --

/// JWT claims shared across quorum-api (REST middleware) and quorum-gateway
/// (WebSocket authentication). Canonical definition lives here in
/// quorum-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Quizzes --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateQuizRequest {
    pub name: String,
    pub max_participants: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CreateQuizResponse {
    pub quiz_id: Uuid,
}

// -- Sessions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateSessionRequest {
    pub quiz_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinSessionRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct JoinSessionResponse {
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub quiz_name: String,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailsResponse {
    pub code: String,
    pub quiz_name: String,
    pub is_host: bool,
    pub participants: Vec<Participant>,
}

/// Structured error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
