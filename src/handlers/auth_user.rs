//! Bearer-token extraction for protected routes.

use crate::{
    errors::{AppError, AppResult},
    state::AppState,
};
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use uuid::Uuid;

/// The authenticated caller of a protected route.
///
/// Extraction fails with 401 before the handler body runs.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    /// The raw bearer token, kept for logout and refresh.
    pub token: String,
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("authorization token is required"))?;

    let malformed =
        || AppError::unauthorized("authorization token is malformed, expected format: Bearer <token>");
    let value = value.to_str().map_err(|_| malformed())?;
    match value.split_once(' ') {
        Some(("Bearer", token)) if !token.contains(' ') => Ok(token),
        _ => Err(malformed()),
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let user_id = state.sessions.validate(token).await?;
        Ok(AuthUser {
            user_id,
            token: token.to_string(),
        })
    }
}
