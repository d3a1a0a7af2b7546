//! Photo endpoints. Every route requires a bearer token and only ever
//! exposes the caller's own photos.

use crate::{
    errors::{AppError, AppResult},
    handlers::auth_user::AuthUser,
    models::{
        photo::{PhotoResponse, PhotoUpdateInput, PhotoUploadInput, PhotosResponse},
        response::ApiResponse,
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State, multipart::MultipartRejection, rejection::JsonRejection,
    },
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use serde::Deserialize;
use uuid::Uuid;

/// Query params for `GET /photos`. Unparseable numbers fall back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct ListPhotosQuery {
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn parse_photo_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request("invalid photo ID"))
}

struct UploadForm {
    title: String,
    description: Option<String>,
    file: Option<(String, String, Bytes)>,
}

async fn read_upload_form(mut multipart: Multipart) -> AppResult<UploadForm> {
    let mut form = UploadForm {
        title: String::new(),
        description: None,
        file: None,
    };

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => form.title = field.text().await?,
            "description" => {
                form.description = Some(field.text().await?).filter(|d| !d.is_empty());
            }
            "file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                form.file = Some((file_name, content_type, data));
            }
            _ => {}
        }
    }
    Ok(form)
}

/// `POST /photos` (multipart: `title`, `description`, `file`)
pub async fn upload_photo(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ApiResponse<PhotoResponse>>), AppError> {
    let form = tokio::time::timeout(state.read_timeout, read_upload_form(multipart?))
        .await
        .map_err(|_| AppError::bad_request("timed out reading the upload body"))??;
    let Some((file_name, content_type, data)) = form.file else {
        return Err(AppError::bad_request("validation failed: field file is required"));
    };

    let input = PhotoUploadInput {
        title: form.title,
        description: form.description,
        file_name,
        file_size: data.len() as i64,
        content_type,
    };
    let photo = state.photos.upload(user.user_id, input, data).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(photo))))
}

/// `GET /photos?page&page_size`
pub async fn list_photos(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListPhotosQuery>,
) -> Result<Json<ApiResponse<PhotosResponse>>, AppError> {
    let page = query.page.and_then(|p| p.parse().ok());
    let page_size = query.page_size.and_then(|s| s.parse().ok());
    let photos = state.photos.list(user.user_id, page, page_size).await?;
    Ok(Json(ApiResponse::ok(photos)))
}

/// `GET /photos/{id}`
pub async fn get_photo(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<PhotoResponse>>, AppError> {
    let photo = state.photos.get(user.user_id, parse_photo_id(&id)?).await?;
    Ok(Json(ApiResponse::ok(photo)))
}

/// `GET /photos/{id}/content`: the stored bytes, not wrapped in the envelope.
pub async fn photo_content(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let content = state
        .photos
        .content(user.user_id, parse_photo_id(&id)?)
        .await?;

    let mut response = Response::new(Body::from(content.data));
    if let Ok(value) = HeaderValue::from_str(&content.content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

/// `PUT /photos/{id}` with JSON `{title?, description?}`
pub async fn update_photo(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<PhotoUpdateInput>, JsonRejection>,
) -> Result<Json<ApiResponse<PhotoResponse>>, AppError> {
    let photo_id = parse_photo_id(&id)?;
    let Json(input) = payload?;
    let photo = state.photos.update(user.user_id, photo_id, input).await?;
    Ok(Json(ApiResponse::ok(photo)))
}

/// `DELETE /photos/{id}`
pub async fn delete_photo(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.photos.delete(user.user_id, parse_photo_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
