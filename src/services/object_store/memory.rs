//! In-memory object store for tests and local runs.

use super::{ObjectContent, ObjectStore, StoredObject, storage_key};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct MemoryObjectStore {
    objects: Arc<DashMap<String, ObjectContent>>,
    public_base: String,
}

impl MemoryObjectStore {
    pub fn new(public_base: impl Into<String>) -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
            public_base: public_base.into(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new("memory://photos")
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        owner_id: Uuid,
        content: Bytes,
        content_type: &str,
        file_name: &str,
    ) -> AppResult<StoredObject> {
        let key = storage_key(owner_id, Utc::now(), file_name);
        self.objects.insert(
            key.clone(),
            ObjectContent {
                data: content,
                content_type: content_type.to_string(),
            },
        );
        Ok(StoredObject {
            public_url: format!("{}/{}", self.public_base, key),
            key,
        })
    }

    async fn get(&self, key: &str) -> AppResult<ObjectContent> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found(format!("object `{key}` not found")))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.objects.remove(key);
        Ok(())
    }
}
