//! Business services and the storage seams they sit on.

pub mod clock;
pub mod metadata;
pub mod object_store;
pub mod password;
pub mod photo_service;
pub mod session_store;
pub mod user_service;
pub mod validation;
