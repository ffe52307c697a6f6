use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{AccessToken, TokenProvider};
use crate::error::IngestError;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

// Refresh a little early so a token doesn't expire half way through a download
const EXPIRY_MARGIN_SECONDS: i64 = 60;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

struct CachedToken {
    token: AccessToken,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map_or(true, |expires_at| {
                now + TimeDelta::seconds(EXPIRY_MARGIN_SECONDS) < expires_at
            })
    }
}

/// OAuth2 refresh-token grant. Holds the long lived refresh token and trades it for
/// short lived access tokens, caching each until shortly before it expires.
pub struct OAuthRefresher {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthRefresher {
    pub fn new(
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
        timeout: Duration,
    ) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::Auth(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            token_url: token_url.to_owned(),
            client_id: client_id.to_owned(),
            client_secret: client_secret.to_owned(),
            refresh_token: refresh_token.to_owned(),
            cached: Mutex::new(None),
        })
    }

    async fn refresh(&self) -> Result<CachedToken, IngestError> {
        let auth = |e: reqwest::Error| IngestError::Auth(format!("token refresh failed: {e}"));

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(auth)?
            .error_for_status()
            .map_err(auth)?;

        let body: TokenResponse = response.json().await.map_err(auth)?;
        if body.access_token.is_empty() {
            return Err(IngestError::Auth(
                "token endpoint returned an empty access token".to_string(),
            ));
        }

        let expires_at = body
            .expires_in
            .and_then(TimeDelta::try_seconds)
            .map(|lifetime| Utc::now() + lifetime);
        info!(?expires_at, "refreshed access token");

        Ok(CachedToken {
            token: AccessToken::new(body.access_token),
            expires_at,
        })
    }
}

#[async_trait]
impl TokenProvider for OAuthRefresher {
    async fn ensure_valid(&self) -> Result<AccessToken, IngestError> {
        let mut cached = self.cached.lock().await;

        if let Some(current) = cached.as_ref() {
            if current.is_valid_at(Utc::now()) {
                debug!("reusing cached access token");
                return Ok(current.token.clone());
            }
        }

        let fresh = self.refresh().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::{Method::POST, MockServer};

    use super::*;

    fn refresher(server: &MockServer) -> OAuthRefresher {
        OAuthRefresher::new(
            &server.url("/token"),
            "client-id",
            "client-secret",
            "refresh-me",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_refreshes_and_caches() {
        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST)
                .path("/token")
                .body_contains("grant_type=refresh_token")
                .body_contains("refresh_token=refresh-me");
            then.status(200)
                .json_body(serde_json::json!({"access_token": "fresh", "expires_in": 3600}));
        });

        let provider = refresher(&server);
        assert_eq!(provider.ensure_valid().await.unwrap().as_str(), "fresh");
        assert_eq!(provider.ensure_valid().await.unwrap().as_str(), "fresh");
        assert_eq!(token.hits(), 1);
    }

    #[tokio::test]
    async fn test_refreshes_again_when_close_to_expiry() {
        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .json_body(serde_json::json!({"access_token": "short", "expires_in": 30}));
        });

        let provider = refresher(&server);
        provider.ensure_valid().await.unwrap();
        provider.ensure_valid().await.unwrap();
        assert_eq!(token.hits(), 2);
    }

    #[tokio::test]
    async fn test_tokens_without_expiry_are_kept() {
        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200)
                .json_body(serde_json::json!({"access_token": "forever"}));
        });

        let provider = refresher(&server);
        provider.ensure_valid().await.unwrap();
        provider.ensure_valid().await.unwrap();
        assert_eq!(token.hits(), 1);
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_an_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(400)
                .json_body(serde_json::json!({"error": "invalid_grant"}));
        });

        let provider = refresher(&server);
        assert!(matches!(
            provider.ensure_valid().await,
            Err(IngestError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_response_is_an_auth_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).body("<html>maintenance</html>");
        });

        let provider = refresher(&server);
        assert!(matches!(
            provider.ensure_valid().await,
            Err(IngestError::Auth(_))
        ));
    }
}
