use std::collections::HashMap;
use std::path::Path;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::Deserialize;
use thiserror::Error;

use crate::db::models::User;

/// Verifies sign-in credentials. Returns the verified identity, or `None` when
/// the credentials are not accepted.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> Option<User>;
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Failed to read credentials file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed credentials file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to hash password")]
    Hash,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Credential {
    username: String,
    display_name: String,
    #[serde(default)]
    email: String,
    password_hash: String,
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AuthError::Hash)
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Accepts users listed in a JSON credentials file of
/// `[{username, displayName, email, passwordHash}]` with argon2 PHC hashes.
#[derive(Debug, Default)]
pub struct PasswordAuthenticator {
    credentials: HashMap<String, Credential>,
}

impl PasswordAuthenticator {
    /// An authenticator that rejects everyone.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let entries: Vec<Credential> = serde_json::from_str(json)?;
        let credentials = entries
            .into_iter()
            .map(|c| (c.username.clone(), c))
            .collect();
        Ok(Self { credentials })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

impl Authenticator for PasswordAuthenticator {
    fn authenticate(&self, username: &str, password: &str) -> Option<User> {
        let credential = self.credentials.get(username)?;
        if !verify_password(password, &credential.password_hash) {
            return None;
        }
        Some(User {
            username: credential.username.clone(),
            display_name: credential.display_name.clone(),
            email: credential.email.clone(),
        })
    }
}
