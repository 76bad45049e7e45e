//! Credentials
//!
//! Credentials are owned by an external subsystem. This crate only sees the
//! opaque encrypted payload and the decrypted secret map for the duration of
//! one call; nothing here persists them.

use crate::error::{NetError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Stored credential reference
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    /// Provider identifier as stored, e.g. `aws`
    pub provider: String,
    pub encrypted_data: Vec<u8>,
}

impl Credential {
    pub fn new(provider: impl Into<String>, encrypted_data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            encrypted_data,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("encrypted_data", &format_args!("<{} bytes>", self.encrypted_data.len()))
            .finish()
    }
}

/// Decrypted provider secrets
#[derive(Clone, Default)]
pub struct CredentialData {
    fields: Map<String, Value>,
}

impl CredentialData {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Required non-empty string field
    pub fn require(&self, field: &str) -> Result<&str> {
        self.optional(field)
            .ok_or_else(|| NetError::validation(format!("{} not found in credential", field)))
    }

    /// Optional string field, empty strings treated as absent
    pub fn optional(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whole secret map as JSON, for SDKs that take a key file
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }
}

impl fmt::Debug for CredentialData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Security: never print secret values
        f.debug_struct("CredentialData")
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CredentialData {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let fields = iter
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        Self { fields }
    }
}

/// Credential subsystem collaborator
#[async_trait]
pub trait CredentialDecryptor: Send + Sync {
    async fn decrypt(&self, encrypted: &[u8]) -> anyhow::Result<CredentialData>;
}

/// Treats the payload as a plain JSON object (CLI and tests)
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextDecryptor;

#[async_trait]
impl CredentialDecryptor for PlaintextDecryptor {
    async fn decrypt(&self, encrypted: &[u8]) -> anyhow::Result<CredentialData> {
        let value: Value = serde_json::from_slice(encrypted)?;
        match value {
            Value::Object(fields) => Ok(CredentialData::new(fields)),
            _ => Err(anyhow::anyhow!("credential payload is not a JSON object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plaintext_decryptor_reads_json_object() {
        let data = PlaintextDecryptor
            .decrypt(br#"{"access_key":"AKIA","secret_key":"s3cr3t","empty":""}"#)
            .await
            .unwrap();
        assert_eq!(data.require("access_key").unwrap(), "AKIA");
        assert!(data.optional("empty").is_none());
        let err = data.require("project_id").unwrap_err();
        assert_eq!(err.to_string(), "validation failed: project_id not found in credential");
    }

    #[tokio::test]
    async fn test_plaintext_decryptor_rejects_non_objects() {
        assert!(PlaintextDecryptor.decrypt(b"[1,2]").await.is_err());
        assert!(PlaintextDecryptor.decrypt(b"not json").await.is_err());
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let data: CredentialData = [("secret_key", "hunter2")].into_iter().collect();
        let printed = format!("{:?}", data);
        assert!(printed.contains("secret_key"));
        assert!(!printed.contains("hunter2"));
    }
}
