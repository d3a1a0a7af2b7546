//! Core data models for the photo service.
//!
//! `User` and `Photo` map to database tables via `sqlx::FromRow`; the
//! `*Response` types are the public JSON shapes wrapped in [`response::ApiResponse`].

pub mod photo;
pub mod response;
pub mod user;
