//! Argon2id password hashing with a server-side pepper.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use rand::{TryRngCore, rngs::OsRng};
use thiserror::Error;

use crate::errors::AppError;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password pepper must not be empty")]
    EmptyPepper,
    #[error("invalid Argon2 parameters: {0}")]
    InvalidParams(String),
    #[error("password hashing error: {0}")]
    Hash(String),
}

impl From<password_hash::Error> for PasswordError {
    fn from(err: password_hash::Error) -> Self {
        PasswordError::Hash(err.to_string())
    }
}

impl From<PasswordError> for AppError {
    fn from(err: PasswordError) -> Self {
        AppError::internal(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct PasswordHasherService {
    argon2: Argon2<'static>,
    pepper: Vec<u8>,
}

impl PasswordHasherService {
    const SALT_LENGTH: usize = password_hash::Salt::RECOMMENDED_LENGTH;

    /// Argon2id with the crate's default cost parameters.
    pub fn new(pepper: impl AsRef<[u8]>) -> Result<Self, PasswordError> {
        Self::with_params(pepper, Params::default())
    }

    /// Cheap parameters for tests.
    pub fn fast(pepper: impl AsRef<[u8]>) -> Result<Self, PasswordError> {
        let params = Params::new(Params::MIN_M_COST * 2, 1, 1, None)
            .map_err(|err| PasswordError::InvalidParams(err.to_string()))?;
        Self::with_params(pepper, params)
    }

    pub fn with_params(pepper: impl AsRef<[u8]>, params: Params) -> Result<Self, PasswordError> {
        let pepper = pepper.as_ref();
        if pepper.is_empty() {
            return Err(PasswordError::EmptyPepper);
        }
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::default(), params),
            pepper: pepper.to_vec(),
        })
    }

    fn material(&self, password: &str) -> Vec<u8> {
        let mut material = Vec::with_capacity(password.len() + self.pepper.len());
        material.extend_from_slice(password.as_bytes());
        material.extend_from_slice(&self.pepper);
        material
    }

    /// Returns a PHC string suitable for storage.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let mut salt_bytes = [0u8; Self::SALT_LENGTH];
        OsRng
            .try_fill_bytes(&mut salt_bytes)
            .map_err(|err| PasswordError::Hash(err.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes)?;
        Ok(self
            .argon2
            .hash_password(&self.material(password), &salt)?
            .to_string())
    }

    /// `Ok(false)` on mismatch; `Err` only when the stored hash is unparseable.
    pub fn verify(&self, password: &str, password_hash: &str) -> Result<bool, PasswordError> {
        let parsed = PasswordHash::new(password_hash)?;
        Ok(self
            .argon2
            .verify_password(&self.material(password), &parsed)
            .is_ok())
    }
}
