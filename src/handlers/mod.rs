pub mod auth_handlers;
pub mod auth_user;
pub mod health_handlers;
pub mod photo_handlers;
