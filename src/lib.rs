//! Multi-tenant photo hosting: accounts, bearer sessions, photo metadata in
//! Postgres and photo bytes in S3.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
