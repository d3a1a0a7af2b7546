//! Registration, login and session endpoints under `/auth`.

use crate::{
    errors::AppError,
    handlers::auth_user::AuthUser,
    models::{
        response::ApiResponse,
        user::{AuthResponse, LoginRequest, RegisterRequest, TokenResponse, UserResponse},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};

/// `POST /auth/register`
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<AuthResponse>>), AppError> {
    let Json(input) = payload?;
    let auth = state.users.register(input).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(auth))))
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<AuthResponse>>, AppError> {
    let Json(input) = payload?;
    let auth = state.users.login(input).await?;
    Ok(Json(ApiResponse::ok(auth)))
}

/// `GET /auth/logout`
pub async fn logout(State(state): State<AppState>, user: AuthUser) -> Result<StatusCode, AppError> {
    state.users.logout(&user.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /auth/refresh`: swap the presented token for a new one.
pub async fn refresh(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<TokenResponse>>, AppError> {
    let token = state.users.refresh(&user.token).await?;
    Ok(Json(ApiResponse::ok(token)))
}

/// `GET /auth/profile`
pub async fn profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<UserResponse>>, AppError> {
    let profile = state.users.profile(user.user_id).await?;
    Ok(Json(ApiResponse::ok(profile)))
}
