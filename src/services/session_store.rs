//! Opaque bearer-token sessions backed by a TTL cache.
//!
//! A token is 32 bytes from the OS RNG, encoded as unpadded URL-safe base64,
//! and stored verbatim as the cache key `auth_token:<token>` with the owning
//! user's id as the value. The cache is the authority on expiry: Redis drops
//! the key on its own, [`MemoryTokenCache`] checks the deadline on read.

use crate::errors::{AppError, AppResult};
use crate::services::clock::{Clock, SystemClock};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::{TryRngCore, rngs::OsRng};
use redis::{AsyncCommands, aio::ConnectionManager};
use std::{fmt, sync::Arc};
use tracing::{debug, info};
use uuid::Uuid;

const TOKEN_PREFIX: &str = "auth_token:";
const TOKEN_BYTES: usize = 32;

/// Minimal key-value surface the session store needs.
#[async_trait]
pub trait TokenCache: Send + Sync + 'static {
    /// Returns `Ok(None)` for absent or expired keys.
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;

    /// Idempotent.
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Round trip to the cache for `/readyz`.
    async fn ping(&self) -> AppResult<()>;
}

/// Redis-backed cache. `SET EX` gives native expiry.
#[derive(Clone)]
pub struct RedisTokenCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisTokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTokenCache")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisTokenCache {
    pub async fn connect(addr: &str, password: &str, db: i64) -> AppResult<Self> {
        let url = if password.is_empty() {
            format!("redis://{addr}/{db}")
        } else {
            format!("redis://:{password}@{addr}/{db}")
        };
        info!(addr, db, "connecting to redis");

        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let secs = ttl.num_seconds().max(1) as u64;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[derive(Clone)]
struct CacheEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// In-process cache for tests and local runs.
///
/// Has no native TTL, so every entry carries its deadline and reads compare
/// it against the injected clock. Expired entries are removed lazily.
#[derive(Clone)]
pub struct MemoryTokenCache {
    data: Arc<DashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryTokenCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryTokenCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let now = self.clock.now();
        let value = match self.data.get(key) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.data.remove(key);
        }
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .ok_or_else(|| AppError::internal("token ttl out of range"))?;
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at,
        };
        self.data.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// A freshly issued session.
#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Issues, validates, revokes and refreshes bearer tokens.
#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn TokenCache>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cache: Arc<dyn TokenCache>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { cache, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn ping(&self) -> AppResult<()> {
        self.cache.ping().await
    }

    fn cache_key(token: &str) -> String {
        format!("{TOKEN_PREFIX}{token}")
    }

    fn generate_token() -> AppResult<String> {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|err| AppError::internal(format!("failed to generate token: {err}")))?;
        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub async fn issue(&self, user_id: Uuid) -> AppResult<SessionToken> {
        let token = Self::generate_token()?;
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AppError::internal("token ttl out of range"))?;

        self.cache
            .set_with_ttl(&Self::cache_key(&token), &user_id.to_string(), self.ttl)
            .await
            .map_err(|err| AppError::internal(format!("failed to save token: {}", err.message)))?;

        debug!(%user_id, %expires_at, "issued session token");
        Ok(SessionToken {
            token,
            user_id,
            expires_at,
        })
    }

    pub async fn validate(&self, token: &str) -> AppResult<Uuid> {
        if token.is_empty() {
            return Err(AppError::unauthorized("invalid or expired token"));
        }

        let stored = self
            .cache
            .get(&Self::cache_key(token))
            .await
            .map_err(|err| {
                AppError::internal(format!("failed to validate token: {}", err.message))
            })?
            .ok_or_else(|| AppError::unauthorized("invalid or expired token"))?;

        Uuid::parse_str(&stored)
            .map_err(|_| AppError::internal("invalid user ID format in token"))
    }

    pub async fn revoke(&self, token: &str) -> AppResult<()> {
        self.cache
            .delete(&Self::cache_key(token))
            .await
            .map_err(|err| AppError::internal(format!("failed to revoke token: {}", err.message)))
    }

    /// Validate, revoke, then issue for the same user.
    ///
    /// If issuing fails after the revoke, the old token stays revoked and the
    /// issue error is returned.
    pub async fn refresh(&self, token: &str) -> AppResult<SessionToken> {
        let user_id = self.validate(token).await?;
        self.revoke(token).await?;
        self.issue(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::services::clock::ManualClock;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn store_with_clock(clock: &ManualClock) -> (SessionStore, MemoryTokenCache) {
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let cache = MemoryTokenCache::new(clock.clone());
        let store = SessionStore::new(Arc::new(cache.clone()), clock, Duration::minutes(60));
        (store, cache)
    }

    #[tokio::test]
    async fn issued_token_validates_to_owner() {
        let (store, _) = store_with_clock(&ManualClock::default());
        let user_id = Uuid::new_v4();

        let session = store.issue(user_id).await.unwrap();

        assert_eq!(session.token.len(), 43);
        assert_eq!(store.validate(&session.token).await.unwrap(), user_id);
    }

    #[tokio::test]
    async fn tokens_are_not_reused() {
        let (store, _) = store_with_clock(&ManualClock::default());
        let user_id = Uuid::new_v4();

        let a = store.issue(user_id).await.unwrap();
        let b = store.issue(user_id).await.unwrap();

        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn expiry_is_issue_time_plus_window() {
        let clock = ManualClock::default();
        let (store, _) = store_with_clock(&clock);

        let session = store.issue(Uuid::new_v4()).await.unwrap();

        assert_eq!(session.expires_at, clock.now() + Duration::minutes(60));
    }

    #[tokio::test]
    async fn oversized_window_fails_without_panicking() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let cache = MemoryTokenCache::new(clock.clone());
        let ttl = Duration::try_minutes(i64::MAX / 60_000).unwrap();
        let store = SessionStore::new(Arc::new(cache.clone()), clock, ttl);

        let err = store.issue(Uuid::new_v4()).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::InternalServer);
        assert!(cache.data.is_empty());
    }

    #[tokio::test]
    async fn revoked_token_is_unauthorized() {
        let (store, _) = store_with_clock(&ManualClock::default());
        let session = store.issue(Uuid::new_v4()).await.unwrap();

        store.revoke(&session.token).await.unwrap();

        let err = store.validate(&session.token).await.unwrap_err();
        assert!(err.is(ErrorKind::Unauthorized));
    }

    #[tokio::test]
    async fn revoking_unknown_token_is_not_an_error() {
        let (store, _) = store_with_clock(&ManualClock::default());
        store.revoke("never-issued").await.unwrap();
    }

    #[tokio::test]
    async fn token_expires_after_window() {
        let clock = ManualClock::default();
        let (store, cache) = store_with_clock(&clock);
        let session = store.issue(Uuid::new_v4()).await.unwrap();

        clock.advance(Duration::minutes(59));
        assert!(store.validate(&session.token).await.is_ok());

        clock.advance(Duration::minutes(1));
        let err = store.validate(&session.token).await.unwrap_err();
        assert!(err.is(ErrorKind::Unauthorized));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn refresh_rotates_token() {
        let (store, _) = store_with_clock(&ManualClock::default());
        let user_id = Uuid::new_v4();
        let old = store.issue(user_id).await.unwrap();

        let new = store.refresh(&old.token).await.unwrap();

        assert_ne!(old.token, new.token);
        assert!(
            store
                .validate(&old.token)
                .await
                .unwrap_err()
                .is(ErrorKind::Unauthorized)
        );
        assert_eq!(store.validate(&new.token).await.unwrap(), user_id);
    }

    #[tokio::test]
    async fn refresh_of_invalid_token_issues_nothing() {
        let (store, cache) = store_with_clock(&ManualClock::default());

        let err = store.refresh("bogus").await.unwrap_err();

        assert!(err.is(ErrorKind::Unauthorized));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn malformed_stored_value_is_internal() {
        let (store, cache) = store_with_clock(&ManualClock::default());
        cache
            .set_with_ttl("auth_token:abc", "not-a-uuid", Duration::minutes(1))
            .await
            .unwrap();

        let err = store.validate("abc").await.unwrap_err();
        assert!(err.is(ErrorKind::InternalServer));
    }

    #[tokio::test]
    async fn empty_token_is_unauthorized() {
        let (store, _) = store_with_clock(&ManualClock::default());
        let err = store.validate("").await.unwrap_err();
        assert!(err.is(ErrorKind::Unauthorized));
    }

    /// Memory cache whose writes can be switched off.
    struct FailingWrites {
        inner: MemoryTokenCache,
        fail: AtomicBool,
    }

    #[async_trait]
    impl TokenCache for FailingWrites {
        async fn get(&self, key: &str) -> AppResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::internal("connection refused"));
            }
            self.inner.set_with_ttl(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> AppResult<()> {
            self.inner.delete(key).await
        }

        async fn ping(&self) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn refresh_keeps_old_token_revoked_when_issue_fails() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let cache = Arc::new(FailingWrites {
            inner: MemoryTokenCache::new(clock.clone()),
            fail: AtomicBool::new(false),
        });
        let store = SessionStore::new(cache.clone(), clock, Duration::minutes(60));
        let old = store.issue(Uuid::new_v4()).await.unwrap();

        cache.fail.store(true, Ordering::SeqCst);
        let err = store.refresh(&old.token).await.unwrap_err();

        assert!(err.is(ErrorKind::InternalServer));
        assert!(err.message.starts_with("failed to save token"));
        assert!(
            store
                .validate(&old.token)
                .await
                .unwrap_err()
                .is(ErrorKind::Unauthorized)
        );
    }
}
