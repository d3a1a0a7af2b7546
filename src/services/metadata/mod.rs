//! Transactional metadata repository for users and photos.
//!
//! Every operation runs on a [`MetadataTx`] obtained from
//! [`MetadataStore::begin`]. The handle is bound to one transaction:
//! `commit` persists, `rollback` discards, and dropping it without a commit
//! (early `?` return, panic, or a cancelled request future) rolls back.

mod memory;
mod postgres;

pub use memory::MemoryMetadataStore;
pub use postgres::PgMetadataStore;

use crate::errors::AppResult;
use crate::models::{photo::Photo, user::User};
use async_trait::async_trait;
use tracing::warn;
use uuid::Uuid;

#[async_trait]
pub trait UserRepository: Send {
    /// Fails with `Conflict` if the username or email is taken.
    async fn create_user(&mut self, user: &User) -> AppResult<()>;
    async fn get_user_by_id(&mut self, id: Uuid) -> AppResult<User>;
    async fn get_user_by_email(&mut self, email: &str) -> AppResult<User>;
    async fn get_user_by_username(&mut self, username: &str) -> AppResult<User>;
    /// Writes username, email and `updated_at`.
    async fn update_user(&mut self, user: &User) -> AppResult<()>;
    async fn delete_user(&mut self, id: Uuid) -> AppResult<()>;
}

#[async_trait]
pub trait PhotoRepository: Send {
    async fn create_photo(&mut self, photo: &Photo) -> AppResult<()>;
    async fn get_photo(&mut self, id: Uuid) -> AppResult<Photo>;
    /// Newest first. Returns the page and the user's total photo count.
    async fn list_photos_by_user(
        &mut self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Photo>, i64)>;
    /// Writes title, description and `updated_at`.
    async fn update_photo(&mut self, photo: &Photo) -> AppResult<()>;
    async fn delete_photo(&mut self, id: Uuid) -> AppResult<()>;
}

/// A repository handle bound to one open transaction.
#[async_trait]
pub trait MetadataTx: UserRepository + PhotoRepository {
    async fn commit(self: Box<Self>) -> AppResult<()>;
    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

#[async_trait]
pub trait MetadataStore: Send + Sync + 'static {
    async fn begin(&self) -> AppResult<Box<dyn MetadataTx>>;

    /// Connectivity check for `/readyz`.
    async fn ping(&self) -> AppResult<()>;
}

/// Close a transaction according to the outcome of the work done on it:
/// commit on `Ok`, roll back on `Err`.
///
/// A failed rollback is logged and the unit's own error is returned.
pub async fn finish<T>(tx: Box<dyn MetadataTx>, result: AppResult<T>) -> AppResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}
