//! In-memory metadata store for tests and local runs.
//!
//! A transaction takes the store-wide lock for its whole lifetime and works
//! on a staged copy of the state, so transactions are fully serialized and
//! the staged copy replaces the state only on commit.

use super::{MetadataStore, MetadataTx, PhotoRepository, UserRepository};
use crate::errors::{AppError, AppResult};
use crate::models::{photo::Photo, user::User};
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Clone, Default)]
struct State {
    users: HashMap<Uuid, User>,
    photos: HashMap<Uuid, Photo>,
}

#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    state: Arc<Mutex<State>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed photo rows. Waits for any open transaction to finish.
    pub async fn photo_count(&self) -> usize {
        self.state.lock().await.photos.len()
    }

    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn begin(&self) -> AppResult<Box<dyn MetadataTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
}

impl MemoryTx {
    fn ensure_unique(&self, user: &User) -> AppResult<()> {
        for other in self.staged.users.values().filter(|u| u.id != user.id) {
            if other.email == user.email {
                return Err(AppError::conflict("email already exists"));
            }
            if other.username == user.username {
                return Err(AppError::conflict("username already exists"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MemoryTx {
    async fn create_user(&mut self, user: &User) -> AppResult<()> {
        if self.staged.users.contains_key(&user.id) {
            return Err(AppError::conflict(format!("user {} already exists", user.id)));
        }
        self.ensure_unique(user)?;
        self.staged.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user_by_id(&mut self, id: Uuid) -> AppResult<User> {
        self.staged
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("user with id {id} not found")))
    }

    async fn get_user_by_email(&mut self, email: &str) -> AppResult<User> {
        self.staged
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("user with email {email} not found")))
    }

    async fn get_user_by_username(&mut self, username: &str) -> AppResult<User> {
        self.staged
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| {
                AppError::not_found(format!("user with username {username} not found"))
            })
    }

    async fn update_user(&mut self, user: &User) -> AppResult<()> {
        self.ensure_unique(user)?;
        let stored = self
            .staged
            .users
            .get_mut(&user.id)
            .ok_or_else(|| AppError::not_found(format!("user with id {} not found", user.id)))?;
        stored.username = user.username.clone();
        stored.email = user.email.clone();
        stored.updated_at = user.updated_at;
        Ok(())
    }

    async fn delete_user(&mut self, id: Uuid) -> AppResult<()> {
        if self.staged.users.remove(&id).is_none() {
            return Err(AppError::not_found(format!("user with id {id} not found")));
        }
        self.staged.photos.retain(|_, p| p.user_id != id);
        Ok(())
    }
}

#[async_trait]
impl PhotoRepository for MemoryTx {
    async fn create_photo(&mut self, photo: &Photo) -> AppResult<()> {
        if !self.staged.users.contains_key(&photo.user_id) {
            return Err(AppError::not_found(format!(
                "user with id {} not found",
                photo.user_id
            )));
        }
        if self.staged.photos.contains_key(&photo.id) {
            return Err(AppError::conflict(format!("photo {} already exists", photo.id)));
        }
        self.staged.photos.insert(photo.id, photo.clone());
        Ok(())
    }

    async fn get_photo(&mut self, id: Uuid) -> AppResult<Photo> {
        self.staged
            .photos
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("photo with id {id} not found")))
    }

    async fn list_photos_by_user(
        &mut self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Photo>, i64)> {
        let mut owned: Vec<&Photo> = self
            .staged
            .photos
            .values()
            .filter(|p| p.user_id == user_id)
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = owned.len() as i64;
        let page = owned
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn update_photo(&mut self, photo: &Photo) -> AppResult<()> {
        let stored = self
            .staged
            .photos
            .get_mut(&photo.id)
            .ok_or_else(|| AppError::not_found(format!("photo with id {} not found", photo.id)))?;
        stored.title = photo.title.clone();
        stored.description = photo.description.clone();
        stored.updated_at = photo.updated_at;
        Ok(())
    }

    async fn delete_photo(&mut self, id: Uuid) -> AppResult<()> {
        self.staged
            .photos
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::not_found(format!("photo with id {id} not found")))
    }
}

#[async_trait]
impl MetadataTx for MemoryTx {
    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}
