//! Account registration, login and session lifecycle.

use crate::errors::{AppError, AppResult, ErrorKind};
use crate::models::user::{
    AuthResponse, LoginRequest, RegisterRequest, TokenResponse, User, UserResponse,
};
use crate::services::metadata::{self, MetadataStore, UserRepository};
use crate::services::password::PasswordHasherService;
use crate::services::session_store::{SessionStore, SessionToken};
use crate::services::validation::{validate_login, validate_registration};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const INVALID_CREDENTIALS: &str = "invalid email or password";

#[derive(Clone)]
pub struct UserService {
    metadata: Arc<dyn MetadataStore>,
    sessions: SessionStore,
    hasher: PasswordHasherService,
}

impl UserService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        sessions: SessionStore,
        hasher: PasswordHasherService,
    ) -> Self {
        Self {
            metadata,
            sessions,
            hasher,
        }
    }

    pub async fn register(&self, input: RegisterRequest) -> AppResult<AuthResponse> {
        let input = RegisterRequest {
            username: input.username.trim().to_string(),
            email: input.email.trim().to_string(),
            password: input.password,
        };
        validate_registration(&input)?;

        // Friendly pre-check; the unique constraints still decide races.
        let mut tx = self.metadata.begin().await?;
        let taken = async {
            if exists(tx.get_user_by_email(&input.email).await)? {
                return Err(AppError::conflict("email already exists"));
            }
            if exists(tx.get_user_by_username(&input.username).await)? {
                return Err(AppError::conflict("username already exists"));
            }
            Ok::<(), AppError>(())
        }
        .await;
        metadata::finish(tx, taken).await?;

        let password_hash = self.hasher.hash(&input.password)?;
        let user = User::new(input.username, input.email, password_hash);

        let mut tx = self.metadata.begin().await?;
        let created = tx.create_user(&user).await;
        metadata::finish(tx, created).await?;

        let session = self.sessions.issue(user.id).await?;
        info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(auth_response(&user, session))
    }

    pub async fn login(&self, input: LoginRequest) -> AppResult<AuthResponse> {
        let input = LoginRequest {
            email: input.email.trim().to_string(),
            password: input.password,
        };
        validate_login(&input)?;

        let mut tx = self.metadata.begin().await?;
        let found = tx.get_user_by_email(&input.email).await;
        let user = match metadata::finish(tx, found).await {
            Ok(user) => user,
            Err(err) if err.is(ErrorKind::NotFound) => {
                return Err(AppError::unauthorized(INVALID_CREDENTIALS));
            }
            Err(err) => return Err(err),
        };

        if !self.hasher.verify(&input.password, &user.password_hash)? {
            return Err(AppError::unauthorized(INVALID_CREDENTIALS));
        }

        let session = self.sessions.issue(user.id).await?;
        info!(user_id = %user.id, "user logged in");
        Ok(auth_response(&user, session))
    }

    pub async fn profile(&self, user_id: Uuid) -> AppResult<UserResponse> {
        let mut tx = self.metadata.begin().await?;
        let found = tx.get_user_by_id(user_id).await;
        let user = metadata::finish(tx, found).await?;
        Ok(UserResponse::from(&user))
    }

    pub async fn logout(&self, token: &str) -> AppResult<()> {
        self.sessions.revoke(token).await
    }

    pub async fn refresh(&self, token: &str) -> AppResult<TokenResponse> {
        let session = self.sessions.refresh(token).await?;
        Ok(TokenResponse {
            token: session.token,
            expires_at: session.expires_at,
        })
    }
}

/// `Ok(true)` when the lookup found a row, `Ok(false)` on NotFound.
fn exists(lookup: AppResult<User>) -> AppResult<bool> {
    match lookup {
        Ok(_) => Ok(true),
        Err(err) if err.is(ErrorKind::NotFound) => Ok(false),
        Err(err) => Err(err),
    }
}

fn auth_response(user: &User, session: SessionToken) -> AuthResponse {
    AuthResponse {
        user: UserResponse::from(user),
        token: session.token,
        expires_at: session.expires_at,
    }
}
