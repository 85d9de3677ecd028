use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use uuid::Uuid;

use quorum_db::Database;
use quorum_gateway::dispatcher::Dispatcher;
use quorum_gateway::workflow::{SessionError, run_db};
use quorum_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(SessionError::Validation(
            "username must be 3 to 32 characters".to_string(),
        )
        .into());
    }
    if req.password.len() < 8 {
        return Err(SessionError::Validation(
            "password must be at least 8 characters".to_string(),
        )
        .into());
    }

    let username = req.username.clone();
    let taken = run_db(&state.db, move |db| db.get_user_by_username(&username))
        .await?
        .is_some();
    if taken {
        return Err(SessionError::Validation("username already taken".to_string()).into());
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let password_hash = argon2
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| SessionError::Internal(anyhow::anyhow!("password hash: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let username = req.username.clone();
    run_db(&state.db, move |db| {
        db.create_user(&user_id.to_string(), &username, &password_hash)
    })
    .await?;

    let token = create_token(&state.jwt_secret, user_id, &req.username)
        .map_err(SessionError::Internal)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.clone();
    let user = run_db(&state.db, move |db| db.get_user_by_username(&username))
        .await?
        .ok_or(ApiError(SessionError::Authentication))?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| SessionError::Internal(anyhow::anyhow!("stored hash: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError(SessionError::Authentication))?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| SessionError::Internal(anyhow::anyhow!("corrupt user id: {}", e)))?;

    let token =
        create_token(&state.jwt_secret, user_id, &user.username).map_err(SessionError::Internal)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
