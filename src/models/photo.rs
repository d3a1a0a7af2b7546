//! Represents an uploaded photo and its request/response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Photo metadata as stored in the metadata store.
///
/// The binary content lives in the object store under `storage_key`.
/// `storage_key` and `public_url` are empty until the object write succeeds;
/// a row is only ever inserted after that point.
#[derive(Clone, FromRow, Debug, PartialEq, Eq)]
pub struct Photo {
    /// Unique identifier for this photo.
    pub id: Uuid,

    /// Owning user.
    pub user_id: Uuid,

    pub title: String,

    pub description: Option<String>,

    /// Original filename of the uploaded file.
    pub file_name: String,

    /// Size in bytes.
    pub file_size: i64,

    /// Content type (MIME type) declared at upload.
    pub content_type: String,

    /// Location of the content in the object store.
    pub storage_key: String,

    /// Publicly resolvable URL for the content.
    pub public_url: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Photo {
    /// Build a not-yet-stored photo with a fresh id and no storage location.
    pub fn new(user_id: Uuid, input: &PhotoUploadInput) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: input.title.clone(),
            description: input.description.clone().filter(|d| !d.is_empty()),
            file_name: input.file_name.clone(),
            file_size: input.file_size,
            content_type: input.content_type.clone(),
            storage_key: String::new(),
            public_url: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}

/// Validated-on-entry upload metadata; the bytes travel separately.
#[derive(Debug, Clone)]
pub struct PhotoUploadInput {
    pub title: String,
    pub description: Option<String>,
    pub file_name: String,
    pub file_size: i64,
    pub content_type: String,
}

/// `PUT /photos/{id}` body. Absent fields are left unchanged.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct PhotoUpdateInput {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Public photo representation; the storage key stays internal.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PhotoResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub file_name: String,
    pub file_size: i64,
    pub content_type: String,
    pub public_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Photo> for PhotoResponse {
    fn from(photo: &Photo) -> Self {
        Self {
            id: photo.id,
            user_id: photo.user_id,
            title: photo.title.clone(),
            description: photo.description.clone(),
            file_name: photo.file_name.clone(),
            file_size: photo.file_size,
            content_type: photo.content_type.clone(),
            public_url: photo.public_url.clone(),
            created_at: photo.created_at,
            updated_at: photo.updated_at,
        }
    }
}

/// One page of a user's photos.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct PhotosResponse {
    pub photos: Vec<PhotoResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
}
