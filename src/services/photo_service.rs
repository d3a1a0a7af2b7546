//! Upload orchestration across the object store and the metadata store.
//!
//! The two stores cannot share a transaction. An upload writes the object
//! first and the row second; if the row cannot be committed the object is
//! deleted exactly once. A delete removes the object first and the row
//! second, so a failed object delete leaves the photo fully intact.

use crate::errors::{AppError, AppResult};
use crate::models::photo::{
    Photo, PhotoResponse, PhotoUpdateInput, PhotoUploadInput, PhotosResponse,
};
use crate::services::metadata::{self, MetadataStore, PhotoRepository, UserRepository};
use crate::services::object_store::{ObjectContent, ObjectStore};
use crate::services::validation::{validate_update, validate_upload};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Clamp client paging input. Out-of-range sizes fall back to the default
/// rather than the maximum.
pub fn normalize_page(page: Option<i64>, page_size: Option<i64>) -> (i64, i64) {
    let page = page.filter(|p| *p >= 1).unwrap_or(1);
    let page_size = page_size
        .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
        .unwrap_or(DEFAULT_PAGE_SIZE);
    (page, page_size)
}

#[derive(Clone)]
pub struct PhotoService {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
}

impl PhotoService {
    pub fn new(metadata: Arc<dyn MetadataStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self { metadata, objects }
    }

    pub async fn upload(
        &self,
        owner_id: Uuid,
        input: PhotoUploadInput,
        content: Bytes,
    ) -> AppResult<PhotoResponse> {
        validate_upload(&input)?;
        if content.len() as i64 != input.file_size {
            return Err(AppError::bad_request(
                "validation failed: field file_size does not match the uploaded content",
            ));
        }

        // Read-only unit; closes before the object write.
        let mut tx = self.metadata.begin().await?;
        let owner = tx.get_user_by_id(owner_id).await;
        metadata::finish(tx, owner).await?;

        let mut photo = Photo::new(owner_id, &input);
        let stored = self
            .objects
            .put(owner_id, content, &photo.content_type, &photo.file_name)
            .await?;
        photo.storage_key = stored.key;
        photo.public_url = stored.public_url;

        if let Err(err) = self.insert(&photo).await {
            match self.objects.delete(&photo.storage_key).await {
                Ok(()) => warn!(
                    photo_id = %photo.id,
                    key = %photo.storage_key,
                    error = %err,
                    "photo row not stored, removed uploaded object"
                ),
                Err(cleanup_err) => error!(
                    photo_id = %photo.id,
                    key = %photo.storage_key,
                    error = %err,
                    cleanup_error = %cleanup_err,
                    "photo row not stored and uploaded object could not be removed"
                ),
            }
            return Err(err);
        }

        info!(photo_id = %photo.id, %owner_id, size = photo.file_size, "photo uploaded");
        Ok(PhotoResponse::from(&photo))
    }

    async fn insert(&self, photo: &Photo) -> AppResult<()> {
        let mut tx = self.metadata.begin().await?;
        let result = tx.create_photo(photo).await;
        metadata::finish(tx, result).await
    }

    /// Load a photo and check that `requester` owns it.
    async fn owned_photo(&self, requester: Uuid, photo_id: Uuid) -> AppResult<Photo> {
        let mut tx = self.metadata.begin().await?;
        let photo = tx.get_photo(photo_id).await;
        let photo = metadata::finish(tx, photo).await?;
        ensure_owner(&photo, requester)?;
        Ok(photo)
    }

    pub async fn get(&self, requester: Uuid, photo_id: Uuid) -> AppResult<PhotoResponse> {
        let photo = self.owned_photo(requester, photo_id).await?;
        Ok(PhotoResponse::from(&photo))
    }

    /// Stored bytes of a photo the requester owns.
    pub async fn content(&self, requester: Uuid, photo_id: Uuid) -> AppResult<ObjectContent> {
        let photo = self.owned_photo(requester, photo_id).await?;
        self.objects.get(&photo.storage_key).await
    }

    pub async fn list(
        &self,
        requester: Uuid,
        page: Option<i64>,
        page_size: Option<i64>,
    ) -> AppResult<PhotosResponse> {
        let (page, page_size) = normalize_page(page, page_size);
        // Pages past the end saturate to an empty result.
        let offset = (page - 1).saturating_mul(page_size);

        let mut tx = self.metadata.begin().await?;
        let listed = tx.list_photos_by_user(requester, page_size, offset).await;
        let (photos, total) = metadata::finish(tx, listed).await?;

        Ok(PhotosResponse {
            photos: photos.iter().map(PhotoResponse::from).collect(),
            total,
            page,
            page_size,
            total_pages: (total + page_size - 1) / page_size,
        })
    }

    /// Change title and/or description. The object is never touched.
    pub async fn update(
        &self,
        requester: Uuid,
        photo_id: Uuid,
        input: PhotoUpdateInput,
    ) -> AppResult<PhotoResponse> {
        validate_update(&input)?;

        let mut tx = self.metadata.begin().await?;
        let result = async {
            let mut photo = tx.get_photo(photo_id).await?;
            ensure_owner(&photo, requester)?;
            if let Some(title) = input.title {
                photo.title = title;
            }
            if let Some(description) = input.description {
                photo.description = Some(description).filter(|d| !d.is_empty());
            }
            photo.updated_at = Utc::now();
            tx.update_photo(&photo).await?;
            Ok::<_, AppError>(photo)
        }
        .await;
        let photo = metadata::finish(tx, result).await?;

        info!(%photo_id, "photo updated");
        Ok(PhotoResponse::from(&photo))
    }

    pub async fn delete(&self, requester: Uuid, photo_id: Uuid) -> AppResult<()> {
        let photo = self.owned_photo(requester, photo_id).await?;

        self.objects.delete(&photo.storage_key).await.map_err(|err| {
            error!(%photo_id, key = %photo.storage_key, error = %err, "failed to delete photo object");
            err
        })?;

        let mut tx = self.metadata.begin().await?;
        let result = tx.delete_photo(photo_id).await;
        metadata::finish(tx, result).await?;

        info!(%photo_id, "photo deleted");
        Ok(())
    }
}

fn ensure_owner(photo: &Photo, requester: Uuid) -> AppResult<()> {
    if photo.is_owned_by(requester) {
        Ok(())
    } else {
        Err(AppError::forbidden("you don't have access to this photo"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::models::user::User;
    use crate::services::metadata::{MemoryMetadataStore, MetadataTx};
    use crate::services::object_store::{MemoryObjectStore, StoredObject};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Object store that can be told to fail and counts deletes.
    #[derive(Default)]
    struct FlakyObjects {
        inner: MemoryObjectStore,
        fail_put: AtomicBool,
        fail_delete: AtomicBool,
        puts: AtomicUsize,
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStore for FlakyObjects {
        async fn put(
            &self,
            owner_id: Uuid,
            content: Bytes,
            content_type: &str,
            file_name: &str,
        ) -> AppResult<StoredObject> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            if self.fail_put.load(Ordering::SeqCst) {
                return Err(AppError::internal("failed to upload file to S3: boom"));
            }
            self.inner.put(owner_id, content, content_type, file_name).await
        }

        async fn get(&self, key: &str) -> AppResult<ObjectContent> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> AppResult<()> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail_delete.load(Ordering::SeqCst) {
                return Err(AppError::internal("failed to delete file from S3: boom"));
            }
            self.inner.delete(key).await
        }
    }

    /// Metadata store whose photo inserts can be made to fail.
    #[derive(Default)]
    struct FlakyMetadata {
        inner: MemoryMetadataStore,
        fail_photo_insert: Arc<AtomicBool>,
    }

    struct FlakyTx {
        inner: Box<dyn MetadataTx>,
        fail_photo_insert: bool,
    }

    #[async_trait]
    impl MetadataStore for FlakyMetadata {
        async fn begin(&self) -> AppResult<Box<dyn MetadataTx>> {
            Ok(Box::new(FlakyTx {
                inner: self.inner.begin().await?,
                fail_photo_insert: self.fail_photo_insert.load(Ordering::SeqCst),
            }))
        }

        async fn ping(&self) -> AppResult<()> {
            self.inner.ping().await
        }
    }

    #[async_trait]
    impl UserRepository for FlakyTx {
        async fn create_user(&mut self, user: &User) -> AppResult<()> {
            self.inner.create_user(user).await
        }
        async fn get_user_by_id(&mut self, id: Uuid) -> AppResult<User> {
            self.inner.get_user_by_id(id).await
        }
        async fn get_user_by_email(&mut self, email: &str) -> AppResult<User> {
            self.inner.get_user_by_email(email).await
        }
        async fn get_user_by_username(&mut self, username: &str) -> AppResult<User> {
            self.inner.get_user_by_username(username).await
        }
        async fn update_user(&mut self, user: &User) -> AppResult<()> {
            self.inner.update_user(user).await
        }
        async fn delete_user(&mut self, id: Uuid) -> AppResult<()> {
            self.inner.delete_user(id).await
        }
    }

    #[async_trait]
    impl PhotoRepository for FlakyTx {
        async fn create_photo(&mut self, photo: &Photo) -> AppResult<()> {
            if self.fail_photo_insert {
                return Err(AppError::internal("failed to create photo: connection reset"));
            }
            self.inner.create_photo(photo).await
        }
        async fn get_photo(&mut self, id: Uuid) -> AppResult<Photo> {
            self.inner.get_photo(id).await
        }
        async fn list_photos_by_user(
            &mut self,
            user_id: Uuid,
            limit: i64,
            offset: i64,
        ) -> AppResult<(Vec<Photo>, i64)> {
            self.inner.list_photos_by_user(user_id, limit, offset).await
        }
        async fn update_photo(&mut self, photo: &Photo) -> AppResult<()> {
            self.inner.update_photo(photo).await
        }
        async fn delete_photo(&mut self, id: Uuid) -> AppResult<()> {
            self.inner.delete_photo(id).await
        }
    }

    #[async_trait]
    impl MetadataTx for FlakyTx {
        async fn commit(self: Box<Self>) -> AppResult<()> {
            self.inner.commit().await
        }
        async fn rollback(self: Box<Self>) -> AppResult<()> {
            self.inner.rollback().await
        }
    }

    struct Harness {
        service: PhotoService,
        metadata: Arc<FlakyMetadata>,
        objects: Arc<FlakyObjects>,
    }

    impl Harness {
        fn new() -> Self {
            let metadata = Arc::new(FlakyMetadata::default());
            let objects = Arc::new(FlakyObjects::default());
            let service = PhotoService::new(metadata.clone(), objects.clone());
            Self {
                service,
                metadata,
                objects,
            }
        }

        async fn user(&self, name: &str) -> Uuid {
            let user = User::new(name, format!("{name}@example.com"), "hash");
            let mut tx = self.metadata.begin().await.unwrap();
            tx.create_user(&user).await.unwrap();
            tx.commit().await.unwrap();
            user.id
        }

        async fn upload(&self, owner: Uuid, title: &str) -> AppResult<PhotoResponse> {
            let bytes = Bytes::from(vec![7u8; 2048]);
            self.service
                .upload(owner, input(title, bytes.len() as i64), bytes)
                .await
        }

        async fn rows(&self) -> usize {
            self.metadata.inner.photo_count().await
        }
    }

    fn input(title: &str, size: i64) -> PhotoUploadInput {
        PhotoUploadInput {
            title: title.into(),
            description: Some("golden hour".into()),
            file_name: "sunset.jpg".into(),
            file_size: size,
            content_type: "image/jpeg".into(),
        }
    }

    #[test]
    fn page_normalization() {
        assert_eq!(normalize_page(None, None), (1, 10));
        assert_eq!(normalize_page(Some(0), Some(0)), (1, 10));
        assert_eq!(normalize_page(Some(-3), Some(150)), (1, 10));
        assert_eq!(normalize_page(Some(4), Some(100)), (4, 100));
        assert_eq!(normalize_page(Some(2), Some(25)), (2, 25));
    }

    #[tokio::test]
    async fn huge_page_lists_nothing() {
        let h = Harness::new();
        let alice = h.user("alice").await;
        h.upload(alice, "sunset").await.unwrap();

        let listed = h.service.list(alice, Some(i64::MAX), Some(10)).await.unwrap();

        assert!(listed.photos.is_empty());
        assert_eq!(listed.total, 1);
        assert_eq!(listed.page, i64::MAX);
        assert_eq!(listed.total_pages, 1);
    }

    #[tokio::test]
    async fn upload_stores_object_then_row() {
        let h = Harness::new();
        let alice = h.user("alice").await;

        let photo = h.upload(alice, "sunset").await.unwrap();

        assert_eq!(photo.user_id, alice);
        assert_eq!(photo.title, "sunset");
        assert_eq!(photo.file_size, 2048);
        assert!(photo.public_url.starts_with("memory://photos/users/"));
        assert_eq!(h.rows().await, 1);
        assert_eq!(h.objects.inner.len(), 1);

        let content = h.service.content(alice, photo.id).await.unwrap();
        assert_eq!(content.data.len(), 2048);
        assert_eq!(content.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn invalid_upload_does_no_io() {
        let h = Harness::new();
        let alice = h.user("alice").await;

        let err = h
            .service
            .upload(alice, input("", 3), Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::BadRequest));

        let err = h
            .service
            .upload(alice, input("sunset", 10), Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(err.is(ErrorKind::BadRequest));

        assert_eq!(h.objects.puts.load(Ordering::SeqCst), 0);
        assert_eq!(h.rows().await, 0);
    }

    #[tokio::test]
    async fn unknown_owner_is_rejected_before_the_object_write() {
        let h = Harness::new();

        let err = h.upload(Uuid::new_v4(), "sunset").await.unwrap_err();

        assert!(err.is(ErrorKind::NotFound));
        assert_eq!(h.objects.puts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_object_write_leaves_no_row() {
        let h = Harness::new();
        let alice = h.user("alice").await;
        h.objects.fail_put.store(true, Ordering::SeqCst);

        let err = h.upload(alice, "sunset").await.unwrap_err();

        assert!(err.is(ErrorKind::InternalServer));
        assert_eq!(h.rows().await, 0);
        assert_eq!(h.objects.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_row_insert_deletes_the_object_once() {
        let h = Harness::new();
        let alice = h.user("alice").await;
        h.metadata.fail_photo_insert.store(true, Ordering::SeqCst);

        let err = h.upload(alice, "sunset").await.unwrap_err();

        assert!(err.message.contains("failed to create photo"));
        assert_eq!(h.objects.deletes.load(Ordering::SeqCst), 1);
        assert!(h.objects.inner.is_empty());
        assert_eq!(h.rows().await, 0);
    }

    #[tokio::test]
    async fn failed_cleanup_still_reports_the_insert_error() {
        let h = Harness::new();
        let alice = h.user("alice").await;
        h.metadata.fail_photo_insert.store(true, Ordering::SeqCst);
        h.objects.fail_delete.store(true, Ordering::SeqCst);

        let err = h.upload(alice, "sunset").await.unwrap_err();

        assert!(err.message.contains("failed to create photo"));
        assert_eq!(h.objects.deletes.load(Ordering::SeqCst), 1);
        assert_eq!(h.objects.inner.len(), 1);
    }

    #[tokio::test]
    async fn other_users_are_forbidden() {
        let h = Harness::new();
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        let photo = h.upload(alice, "sunset").await.unwrap();

        for err in [
            h.service.get(bob, photo.id).await.unwrap_err(),
            h.service.content(bob, photo.id).await.map(|_| ()).unwrap_err(),
            h.service
                .update(bob, photo.id, PhotoUpdateInput::default())
                .await
                .map(|_| ())
                .unwrap_err(),
            h.service.delete(bob, photo.id).await.unwrap_err(),
        ] {
            assert!(err.is(ErrorKind::Forbidden), "{err}");
        }

        assert_eq!(h.rows().await, 1);
        assert_eq!(h.objects.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_photo_is_not_found() {
        let h = Harness::new();
        let alice = h.user("alice").await;

        let err = h.service.get(alice, Uuid::new_v4()).await.unwrap_err();
        assert!(err.is(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn lists_in_pages() {
        let h = Harness::new();
        let alice = h.user("alice").await;
        let bob = h.user("bob").await;
        for i in 0..25 {
            h.upload(alice, &format!("p{i}")).await.unwrap();
        }
        h.upload(bob, "not alice's").await.unwrap();

        let first = h.service.list(alice, Some(1), Some(10)).await.unwrap();
        assert_eq!(first.photos.len(), 10);
        assert_eq!(first.total, 25);
        assert_eq!(first.total_pages, 3);

        let last = h.service.list(alice, Some(3), Some(10)).await.unwrap();
        assert_eq!(last.photos.len(), 5);

        let oversized = h.service.list(alice, Some(1), Some(150)).await.unwrap();
        assert_eq!(oversized.page_size, 10);
        assert_eq!(oversized.photos.len(), 10);

        let beyond = h.service.list(alice, Some(9), None).await.unwrap();
        assert!(beyond.photos.is_empty());
        assert_eq!(beyond.total, 25);

        let empty = h.service.list(Uuid::new_v4(), None, None).await.unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.total_pages, 0);
    }

    #[tokio::test]
    async fn update_changes_only_metadata() {
        let h = Harness::new();
        let alice = h.user("alice").await;
        let photo = h.upload(alice, "sunset").await.unwrap();

        let updated = h
            .service
            .update(
                alice,
                photo.id,
                PhotoUpdateInput {
                    title: Some("dusk".into()),
                    description: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "dusk");
        assert_eq!(updated.description.as_deref(), Some("golden hour"));
        assert_eq!(updated.public_url, photo.public_url);
        assert!(updated.updated_at >= photo.updated_at);

        let cleared = h
            .service
            .update(
                alice,
                photo.id,
                PhotoUpdateInput {
                    title: None,
                    description: Some(String::new()),
                },
            )
            .await
            .unwrap();
        assert_eq!(cleared.title, "dusk");
        assert_eq!(cleared.description, None);

        assert_eq!(h.objects.puts.load(Ordering::SeqCst), 1);
        assert_eq!(h.objects.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn delete_removes_object_and_row() {
        let h = Harness::new();
        let alice = h.user("alice").await;
        let photo = h.upload(alice, "sunset").await.unwrap();

        h.service.delete(alice, photo.id).await.unwrap();

        assert_eq!(h.rows().await, 0);
        assert!(h.objects.inner.is_empty());
        let err = h.service.delete(alice, photo.id).await.unwrap_err();
        assert!(err.is(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn failed_object_delete_keeps_the_row() {
        let h = Harness::new();
        let alice = h.user("alice").await;
        let photo = h.upload(alice, "sunset").await.unwrap();
        h.objects.fail_delete.store(true, Ordering::SeqCst);

        let err = h.service.delete(alice, photo.id).await.unwrap_err();

        assert!(err.is(ErrorKind::InternalServer));
        assert_eq!(h.rows().await, 1);
        assert!(h.service.get(alice, photo.id).await.is_ok());
    }
}
