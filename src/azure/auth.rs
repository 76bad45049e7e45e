//! Azure AD client-credentials tokens
//!
//! Tokens are cached per tenant and client id for the lifetime of the
//! handler, so consecutive calls with the same credential share one token.

use crate::http::{HttpError, RestClient};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Public Azure AD endpoint
pub const DEFAULT_LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Service principal secrets
pub struct ClientSecret<'a> {
    pub tenant_id: &'a str,
    pub client_id: &'a str,
    pub client_secret: &'a str,
}

pub struct AzureAuthenticator {
    http: RestClient,
    login_base_url: String,
    scope: String,
    tokens: RwLock<HashMap<String, CachedToken>>,
}

impl AzureAuthenticator {
    /// `management_base_url` decides the token audience
    pub fn new(http: RestClient, login_base_url: &str, management_base_url: &str) -> Self {
        Self {
            http,
            login_base_url: login_base_url.trim_end_matches('/').to_string(),
            scope: format!("{}/.default", management_base_url.trim_end_matches('/')),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub async fn token(&self, secret: &ClientSecret<'_>) -> Result<String, HttpError> {
        let key = format!("{}/{}", secret.tenant_id, secret.client_id);

        {
            let tokens = self.tokens.read().await;
            if let Some(cached) = tokens.get(&key) {
                if Instant::now() < cached.expires_at {
                    return Ok(cached.token.clone());
                }
            }
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.login_base_url, secret.tenant_id);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", secret.client_id),
            ("client_secret", secret.client_secret),
            ("scope", self.scope.as_str()),
        ];
        let response: TokenResponse = serde_json::from_value(self.http.post_form(&url, &form).await?)?;

        let ttl = Duration::from_secs(response.expires_in.unwrap_or(3600))
            .saturating_sub(TOKEN_EXPIRY_BUFFER);
        tracing::debug!("Fetched Azure token for client {} (ttl {:?})", secret.client_id, ttl);

        let mut tokens = self.tokens.write().await;
        tokens.insert(
            key,
            CachedToken {
                token: response.access_token.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(response.access_token)
    }
}
