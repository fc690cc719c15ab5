//! Authentication boundary.
//!
//! Persistent identity storage and password hashing live outside this
//! server; the [`Authenticator`] trait is the seam. [`MemoryAuthenticator`]
//! is the in-process implementation used by default and by the tests.
//! Tokens never expire here: a restart forgets them, and reconnect falls
//! back to the username index in that case.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors surfaced by authentication operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown username or wrong password.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Registration attempted for a name that already exists.
    #[error("username already taken")]
    UsernameTaken,
}

/// External identity provider, reduced to the three operations the server
/// needs.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validates credentials and issues an opaque token on success.
    async fn authenticate(&self, username: &str, password: &str) -> Result<String, AuthError>;

    /// Creates an account.
    async fn register(&self, username: &str, password: &str) -> Result<(), AuthError>;

    /// Resolves a previously issued token back to its username.
    async fn validate_token(&self, token: &str) -> Option<String>;
}

/// Process-local credential and token store.
pub struct MemoryAuthenticator {
    credentials: RwLock<HashMap<String, String>>,
    tokens: RwLock<HashMap<String, String>>,
}

impl MemoryAuthenticator {
    pub fn new() -> Self {
        Self {
            credentials: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for MemoryAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let credentials = self.credentials.read().await;
        match credentials.get(username) {
            Some(stored) if stored == password => {}
            _ => return Err(AuthError::InvalidCredentials),
        }
        drop(credentials);

        let token = Uuid::new_v4().to_string();
        self.tokens
            .write()
            .await
            .insert(token.clone(), username.to_string());
        Ok(token)
    }

    async fn register(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let mut credentials = self.credentials.write().await;
        if credentials.contains_key(username) {
            return Err(AuthError::UsernameTaken);
        }
        credentials.insert(username.to_string(), password.to_string());
        Ok(())
    }

    async fn validate_token(&self, token: &str) -> Option<String> {
        self.tokens.read().await.get(token).cloned()
    }
}
