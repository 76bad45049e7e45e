//! GCP Authentication
//!
//! Tokens come from the service-account key carried in the decrypted
//! credential. A fixed bearer token can be used instead (emulators, tests).

use crate::credential::CredentialData;
use crate::http::HttpError;
use gcp_auth::{CustomServiceAccount, TokenProvider};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default scopes for GCP API access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Tokens are treated as stale this long before their nominal lifetime ends
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Service-account tokens live an hour; assume half of it
const ASSUMED_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
enum TokenSource {
    ServiceAccount(Arc<dyn TokenProvider>),
    Static(String),
}

/// Bearer tokens for one credential, reused until close to expiry
#[derive(Clone)]
pub struct GcpCredentials {
    source: TokenSource,
    latest: Arc<RwLock<Option<(String, Instant)>>>,
}

impl GcpCredentials {
    /// Build from the service-account fields of a decrypted credential
    pub fn from_credential(secrets: &CredentialData) -> Result<Self, HttpError> {
        let key = secrets
            .to_json()
            .map_err(|e| HttpError::Auth(e.to_string()))?;
        let account = CustomServiceAccount::from_json(&key)
            .map_err(|e| HttpError::Auth(format!("invalid service account key: {}", e)))?;

        Ok(Self::with_source(TokenSource::ServiceAccount(Arc::new(account))))
    }

    /// Always hand out the same bearer token
    pub fn fixed(token: impl Into<String>) -> Self {
        Self::with_source(TokenSource::Static(token.into()))
    }

    fn with_source(source: TokenSource) -> Self {
        Self {
            source,
            latest: Arc::new(RwLock::new(None)),
        }
    }

    async fn reusable(&self) -> Option<String> {
        let latest = self.latest.read().await;
        latest
            .as_ref()
            .filter(|(_, refresh_at)| Instant::now() < *refresh_at)
            .map(|(token, _)| token.clone())
    }

    /// Access token for the next API call
    pub async fn get_token(&self) -> Result<String, HttpError> {
        let provider = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::ServiceAccount(provider) => provider,
        };

        if let Some(token) = self.reusable().await {
            return Ok(token);
        }

        let fresh = provider
            .token(DEFAULT_SCOPES)
            .await
            .map_err(|e| HttpError::Auth(format!("failed to get access token: {}", e)))?
            .as_str()
            .to_string();

        let refresh_at = Instant::now() + ASSUMED_TOKEN_LIFETIME - REFRESH_MARGIN;
        *self.latest.write().await = Some((fresh.clone(), refresh_at));
        tracing::debug!("Fetched GCP access token");

        Ok(fresh)
    }
}
