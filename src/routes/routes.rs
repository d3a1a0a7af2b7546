//! Defines routes for authentication and photo operations.
//!
//! ## Structure
//! - **Auth endpoints**
//!   - `POST   /auth/register` : create an account, returns a token
//!   - `POST   /auth/login`    : exchange credentials for a token
//!   - `GET    /auth/logout`   : revoke the presented token
//!   - `POST   /auth/refresh`  : swap the presented token for a new one
//!   - `GET    /auth/profile`  : the caller's account
//!
//! - **Photo endpoints** (bearer token required)
//!   - `POST   /photos`              : multipart upload
//!   - `GET    /photos`              : paginated list (`page`, `page_size`)
//!   - `GET    /photos/{id}`         : metadata
//!   - `GET    /photos/{id}/content` : stored bytes
//!   - `PUT    /photos/{id}`         : edit title/description
//!   - `DELETE /photos/{id}`         : remove object and metadata

use crate::{
    config::ServerConfig,
    errors::AppError,
    handlers::{
        auth_handlers::{login, logout, profile, refresh, register},
        health_handlers::{healthz, readyz},
        photo_handlers::{
            delete_photo, get_photo, list_photos, photo_content, update_photo, upload_photo,
        },
    },
    services::validation::MAX_UPLOAD_BYTES,
    state::AppState,
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, Method, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::any::Any;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

/// Room for the multipart framing and text fields around a maximal file.
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES as usize + 64 * 1024;

/// Build the router for all endpoints.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", get(logout))
        .route("/auth/refresh", post(refresh))
        .route("/auth/profile", get(profile))
        .route(
            "/photos",
            post(upload_photo)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
                .get(list_photos),
        )
        .route(
            "/photos/{id}",
            get(get_photo).put(update_photo).delete(delete_photo),
        )
        .route("/photos/{id}/content", get(photo_content))
}

/// The full application: routes, state and the cross-cutting layers.
pub fn app(state: AppState, server: &ServerConfig) -> Router {
    with_layers(routes().with_state(state), server)
}

/// Wrap a router in the middleware stack, outermost first:
/// - `x-request-id` is taken from the client or generated, and echoed back
/// - every request gets a trace span carrying that id
/// - requests that outlive `write_timeout` are answered with 408 and their
///   handler future is dropped, which rolls back any open transaction
/// - CORS
/// - a panicking handler becomes a 500 envelope instead of a dropped connection
pub fn with_layers(router: Router, server: &ServerConfig) -> Router {
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors_layer(&server.cors_allowed_origins))
        .layer(TimeoutLayer::new(server.write_timeout))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

fn request_span(request: &Request) -> tracing::Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id,
    )
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    AppError::internal(format!("handler panicked: {detail}")).into_response()
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() || origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            origins
                .iter()
                .filter_map(|origin| HeaderValue::from_str(origin).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
