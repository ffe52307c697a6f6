use std::fmt;

use async_trait::async_trait;

use crate::error::IngestError;

pub mod oauth;

pub use oauth::OAuthRefresher;

/// Bearer credential handed to the storage collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Placeholder for storages that don't authenticate.
    pub fn none() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keep tokens out of logs
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Supplies a currently valid access token, refreshing it when needed. Failures are
/// `IngestError::Auth` and abort the current cycle only.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn ensure_valid(&self) -> Result<AccessToken, IngestError>;
}

/// A token that never changes.
pub struct StaticToken {
    token: AccessToken,
}

impl StaticToken {
    pub fn new(token: &str) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn ensure_valid(&self) -> Result<AccessToken, IngestError> {
        Ok(self.token.clone())
    }
}
