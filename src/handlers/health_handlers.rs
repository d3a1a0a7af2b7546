//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that pings the metadata store and token cache

use crate::{errors::AppResult, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness only; never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Pings the metadata store and the token cache. HTTP 200 when both answer,
/// HTTP 503 when either fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (metadata, cache) = tokio::join!(state.metadata.ping(), state.sessions.ping());

    let mut checks = HashMap::new();
    checks.insert("metadata", CheckStatus::from(metadata));
    checks.insert("cache", CheckStatus::from(cache));

    let overall_ok = checks.values().all(|check| check.ok);
    let body = ReadyResponse {
        status: if overall_ok {
            "ok".into()
        } else {
            "error".into()
        },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

/// Clients only learn which dependency is down; the cause goes to the log.
const CHECK_FAILED: &str = "unavailable";

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl From<AppResult<()>> for CheckStatus {
    fn from(result: AppResult<()>) -> Self {
        match result {
            Ok(()) => CheckStatus {
                ok: true,
                error: None,
            },
            Err(err) => {
                tracing::warn!(error = %err, "readiness check failed");
                CheckStatus {
                    ok: false,
                    error: Some(CHECK_FAILED.into()),
                }
            }
        }
    }
}
