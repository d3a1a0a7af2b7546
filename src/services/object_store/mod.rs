//! Binary content storage for photos.
//!
//! Keys are derived, never chosen by clients:
//! `users/{owner}/photos/{YYYYmmdd-HHMMSS}-{8 hex}{.ext}`. The timestamp plus
//! random disambiguator avoids collisions without reading existing keys.

mod memory;
mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

use crate::errors::AppResult;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::Path;
use uuid::Uuid;

/// Where a put landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct ObjectContent {
    pub data: Bytes,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put(
        &self,
        owner_id: Uuid,
        content: Bytes,
        content_type: &str,
        file_name: &str,
    ) -> AppResult<StoredObject>;

    /// A missing key is `NotFound`; anything else is `InternalServer`.
    async fn get(&self, key: &str) -> AppResult<ObjectContent>;

    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> AppResult<()>;
}

/// Build a fresh storage key for `owner_id`.
pub fn storage_key(owner_id: Uuid, now: DateTime<Utc>, file_name: &str) -> String {
    let disambiguator = Uuid::new_v4().simple().to_string();
    format!(
        "users/{}/photos/{}-{}{}",
        owner_id,
        now.format("%Y%m%d-%H%M%S"),
        &disambiguator[..8],
        extension(file_name)
    )
}

/// Lowercased `.ext` of the original name, or empty when it has none or it
/// contains anything but ASCII alphanumerics.
fn extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_layout_includes_owner_time_and_extension() {
        let owner = Uuid::new_v4();
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();

        let key = storage_key(owner, now, "Sunset.JPG");

        let prefix = format!("users/{owner}/photos/20250309-140507-");
        assert!(key.starts_with(&prefix), "{key}");
        let rest = &key[prefix.len()..];
        assert_eq!(rest.len(), 8 + ".jpg".len());
        assert!(rest.ends_with(".jpg"));
        assert!(rest[..8].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn keys_do_not_collide_within_the_same_second() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        assert_ne!(
            storage_key(owner, now, "a.png"),
            storage_key(owner, now, "a.png")
        );
    }

    #[test]
    fn odd_extensions_are_dropped() {
        assert_eq!(extension("noext"), "");
        assert_eq!(extension("archive.tar.GZ"), ".gz");
        assert_eq!(extension("evil.j/pg"), "");
        assert_eq!(extension("trailing."), "");
    }
}
