//! HTTP utilities for the REST control planes (GCP compute, Azure ARM)

use crate::error::NetError;
use crate::resource::{Provider, ResourceKind};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use thiserror::Error;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

const USER_AGENT: &str = concat!("cloudnet/", env!("CARGO_PKG_VERSION"));

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Pull `error.message` out of a Google or ARM style error body
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message").or_else(|| e.get("error_description")))
        .or_else(|| value.get("error_description"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Error, Debug)]
pub enum HttpError {
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API request failed: {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to parse response JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl HttpError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Map onto the crate taxonomy with the call's context attached
    pub fn into_net(
        self,
        provider: Provider,
        kind: ResourceKind,
        context: &str,
        target: &str,
    ) -> NetError {
        match self {
            Self::Status { status, message } => {
                NetError::from_status(provider, kind, context, target, status, message)
            }
            other => NetError::provider(provider, context, other),
        }
    }
}

/// HTTP client wrapper for bearer-authenticated JSON APIs
#[derive(Clone)]
pub struct RestClient {
    client: Client,
}

impl RestClient {
    pub fn new() -> Result<Self, HttpError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { client })
    }

    pub async fn get(&self, url: &str, token: &str) -> Result<Value, HttpError> {
        self.send(Method::GET, url, token, None).await
    }

    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value, HttpError> {
        self.send(Method::POST, url, token, body).await
    }

    pub async fn put(&self, url: &str, token: &str, body: &Value) -> Result<Value, HttpError> {
        self.send(Method::PUT, url, token, Some(body)).await
    }

    pub async fn patch(&self, url: &str, token: &str, body: &Value) -> Result<Value, HttpError> {
        self.send(Method::PATCH, url, token, Some(body)).await
    }

    pub async fn delete(&self, url: &str, token: &str) -> Result<Value, HttpError> {
        self.send(Method::DELETE, url, token, None).await
    }

    /// Form-encoded POST without bearer auth (OAuth token endpoints)
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Value, HttpError> {
        tracing::debug!("POST {} (form)", url);
        Self::execute(self.client.post(url).form(form)).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value, HttpError> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        Self::execute(request).await
    }

    async fn execute(request: RequestBuilder) -> Result<Value, HttpError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            let message = error_message(&body)
                .map(|m| sanitize_for_log(&m))
                .unwrap_or_else(|| status.to_string());
            return Err(HttpError::Status {
                status: status.as_u16(),
                message,
            });
        }

        // Handle empty response
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&body)?)
    }
}
