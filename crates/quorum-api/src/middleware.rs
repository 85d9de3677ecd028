use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use quorum_gateway::workflow::SessionError;
use quorum_types::api::Claims;

use crate::error::ApiError;

/// Extract and validate the JWT from the Authorization header. Rejected
/// requests never reach any session logic.
pub async fn require_auth(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError(SessionError::Authentication))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError(SessionError::Authentication))?;

    let secret =
        std::env::var("QUORUM_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError(SessionError::Authentication))?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}
