//! Postgres-backed metadata store.

use super::{MetadataStore, MetadataTx, PhotoRepository, UserRepository};
use crate::config::DatabaseConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{photo::Photo, user::User};
use async_trait::async_trait;
use sqlx::{
    PgPool, Postgres, Transaction,
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../../migrations/0001_init.sql");

/// Owns the process-wide connection pool.
///
/// Each [`MetadataStore::begin`] checks out one connection for the lifetime
/// of the returned transaction and hands it back on commit, rollback or drop.
#[derive(Clone, Debug)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(cfg: &DatabaseConfig) -> AppResult<Self> {
        let ssl_mode = cfg.ssl_mode.parse::<PgSslMode>().map_err(|err| {
            AppError::internal(format!("invalid DB_SSLMODE `{}`: {err}", cfg.ssl_mode))
        })?;
        let options = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(cfg.password.expose())
            .database(&cfg.name)
            .ssl_mode(ssl_mode);

        info!(host = %cfg.host, port = cfg.port, db = %cfg.name, "connecting to postgres");
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> AppResult<()> {
        let statements = SCHEMA
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());
        let mut tx = self.pool.begin().await?;
        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn begin(&self) -> AppResult<Box<dyn MetadataTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|err| AppError::internal(format!("failed to start transaction: {err}")))?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ping(&self) -> AppResult<()> {
        let one = sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        if one != 1 {
            return Err(AppError::internal(format!("unexpected ping result: {one}")));
        }
        Ok(())
    }
}

/// Dropping an uncommitted `sqlx::Transaction` issues a rollback when its
/// connection returns to the pool.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

/// Translate write failures: uniqueness -> Conflict, missing owner -> NotFound.
fn map_write_err(err: sqlx::Error, what: &str) -> AppError {
    if let Some(db_err) = err.as_database_error() {
        if db_err.is_unique_violation() {
            return match db_err.constraint() {
                Some("users_username_key") => AppError::conflict("username already exists"),
                Some("users_email_key") => AppError::conflict("email already exists"),
                _ => AppError::conflict(format!("failed to {what}: record already exists")),
            };
        }
        if db_err.is_foreign_key_violation() {
            return AppError::not_found("owning user not found");
        }
    }
    AppError::internal(format!("failed to {what}: {err}"))
}

fn read_err(what: &str) -> impl FnOnce(sqlx::Error) -> AppError + '_ {
    move |err| AppError::internal(format!("failed to {what}: {err}"))
}

#[async_trait]
impl UserRepository for PgTx {
    async fn create_user(&mut self, user: &User) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| map_write_err(err, "create user"))?;
        Ok(())
    }

    async fn get_user_by_id(&mut self, id: Uuid) -> AppResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, created_at, updated_at
             FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(read_err("get user"))?
        .ok_or_else(|| AppError::not_found(format!("user with id {id} not found")))
    }

    async fn get_user_by_email(&mut self, email: &str) -> AppResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, created_at, updated_at
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(read_err("get user"))?
        .ok_or_else(|| AppError::not_found(format!("user with email {email} not found")))
    }

    async fn get_user_by_username(&mut self, username: &str) -> AppResult<User> {
        sqlx::query_as::<_, User>(
            "SELECT id, username, email, password_hash, created_at, updated_at
             FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(read_err("get user"))?
        .ok_or_else(|| AppError::not_found(format!("user with username {username} not found")))
    }

    async fn update_user(&mut self, user: &User) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE users SET username = $2, email = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| map_write_err(err, "update user"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("user with id {} not found", user.id)));
        }
        Ok(())
    }

    async fn delete_user(&mut self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(read_err("delete user"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("user with id {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl PhotoRepository for PgTx {
    async fn create_photo(&mut self, photo: &Photo) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO photos (
                id, user_id, title, description, file_name, file_size,
                content_type, storage_key, public_url, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(photo.id)
        .bind(photo.user_id)
        .bind(&photo.title)
        .bind(&photo.description)
        .bind(&photo.file_name)
        .bind(photo.file_size)
        .bind(&photo.content_type)
        .bind(&photo.storage_key)
        .bind(&photo.public_url)
        .bind(photo.created_at)
        .bind(photo.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| map_write_err(err, "create photo"))?;
        Ok(())
    }

    async fn get_photo(&mut self, id: Uuid) -> AppResult<Photo> {
        sqlx::query_as::<_, Photo>(
            "SELECT id, user_id, title, description, file_name, file_size, content_type,
                    storage_key, public_url, created_at, updated_at
             FROM photos WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(read_err("get photo"))?
        .ok_or_else(|| AppError::not_found(format!("photo with id {id} not found")))
    }

    async fn list_photos_by_user(
        &mut self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Photo>, i64)> {
        let photos = sqlx::query_as::<_, Photo>(
            "SELECT id, user_id, title, description, file_name, file_size, content_type,
                    storage_key, public_url, created_at, updated_at
             FROM photos WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(read_err("list photos"))?;

        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM photos WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(read_err("count photos"))?;

        Ok((photos, total))
    }

    async fn update_photo(&mut self, photo: &Photo) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE photos SET title = $2, description = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(photo.id)
        .bind(&photo.title)
        .bind(&photo.description)
        .bind(photo.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|err| map_write_err(err, "update photo"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("photo with id {} not found", photo.id)));
        }
        Ok(())
    }

    async fn delete_photo(&mut self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM photos WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(read_err("delete photo"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::not_found(format!("photo with id {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataTx for PgTx {
    async fn commit(self: Box<Self>) -> AppResult<()> {
        let PgTx { tx } = *self;
        tx.commit()
            .await
            .map_err(|err| AppError::internal(format!("failed to commit transaction: {err}")))
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        let PgTx { tx } = *self;
        tx.rollback()
            .await
            .map_err(|err| AppError::internal(format!("failed to roll back transaction: {err}")))
    }
}
