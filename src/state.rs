//! Shared handles passed to every handler.

use crate::services::{
    metadata::MetadataStore, object_store::ObjectStore, password::PasswordHasherService,
    photo_service::PhotoService, session_store::SessionStore, user_service::UserService,
};
use std::{sync::Arc, time::Duration};

/// Cheap to clone; every field is a handle onto pooled clients.
#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    pub photos: PhotoService,
    pub sessions: SessionStore,
    pub metadata: Arc<dyn MetadataStore>,
    /// Upper bound on receiving an upload body.
    pub read_timeout: Duration,
}

impl AppState {
    /// Wire the services onto already-connected stores.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        sessions: SessionStore,
        hasher: PasswordHasherService,
        read_timeout: Duration,
    ) -> Self {
        Self {
            users: UserService::new(metadata.clone(), sessions.clone(), hasher),
            photos: PhotoService::new(metadata.clone(), objects),
            sessions,
            metadata,
            read_timeout,
        }
    }
}
