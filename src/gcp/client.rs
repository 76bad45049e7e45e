//! GCP Client
//!
//! Combines authentication, the HTTP client and the Compute Engine URL
//! layout for one project.

use super::auth::GcpCredentials;
use crate::credential::CredentialData;
use crate::error::{NetError, Result};
use crate::http::{HttpError, RestClient};
use crate::resource::Provider;
use serde_json::Value;

/// Public Compute Engine endpoint
pub const DEFAULT_COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: RestClient,
    pub project_id: String,
    base_url: String,
}

impl GcpClient {
    /// Client for the project named in the credential
    pub fn from_credential(secrets: &CredentialData, base_url: &str) -> Result<Self> {
        let project_id = secrets.require("project_id")?.to_string();
        let credentials = GcpCredentials::from_credential(secrets)
            .map_err(|e| NetError::provider(Provider::Gcp, "initialize credentials", e))?;
        Self::new(credentials, project_id, base_url)
    }

    pub fn new(
        credentials: GcpCredentials,
        project_id: impl Into<String>,
        base_url: &str,
    ) -> Result<Self> {
        let http = RestClient::new()
            .map_err(|e| NetError::provider(Provider::Gcp, "create HTTP client", e))?;
        Ok(Self {
            credentials,
            http,
            project_id: project_id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn get(&self, url: &str) -> std::result::Result<Value, HttpError> {
        let token = self.credentials.get_token().await?;
        self.http.get(url, &token).await
    }

    pub async fn post(&self, url: &str, body: Option<&Value>) -> std::result::Result<Value, HttpError> {
        let token = self.credentials.get_token().await?;
        self.http.post(url, &token, body).await
    }

    pub async fn put(&self, url: &str, body: &Value) -> std::result::Result<Value, HttpError> {
        let token = self.credentials.get_token().await?;
        self.http.put(url, &token, body).await
    }

    pub async fn patch(&self, url: &str, body: &Value) -> std::result::Result<Value, HttpError> {
        let token = self.credentials.get_token().await?;
        self.http.patch(url, &token, body).await
    }

    pub async fn delete(&self, url: &str) -> std::result::Result<Value, HttpError> {
        let token = self.credentials.get_token().await?;
        self.http.delete(url, &token).await
    }

    // =========================================================================
    // Compute Engine API helpers
    // =========================================================================

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> String {
        format!("{}/projects/{}/{}", self.base_url, self.project_id, path)
    }

    /// Build regional Compute Engine API URL
    pub fn compute_regional_url(&self, region: &str, resource: &str) -> String {
        self.compute_url(&format!("regions/{}/{}", region, resource))
    }

    /// Build zonal Compute Engine API URL
    pub fn compute_zonal_url(&self, zone: &str, resource: &str) -> String {
        self.compute_url(&format!("zones/{}/{}", zone, resource))
    }

    /// Build global Compute Engine API URL
    pub fn compute_global_url(&self, resource: &str) -> String {
        self.compute_url(&format!("global/{}", resource))
    }

    /// Build aggregated Compute Engine API URL (all regions / zones)
    pub fn compute_aggregated_url(&self, resource: &str) -> String {
        self.compute_url(&format!("aggregated/{}", resource))
    }

    /// Canonical resource path used as the provider-neutral id
    pub fn network_path(&self, name: &str) -> String {
        format!("projects/{}/global/networks/{}", self.project_id, name)
    }

    pub fn subnetwork_path(&self, region: &str, name: &str) -> String {
        format!(
            "projects/{}/regions/{}/subnetworks/{}",
            self.project_id, region, name
        )
    }

    pub fn firewall_path(&self, name: &str) -> String {
        format!("projects/{}/global/firewalls/{}", self.project_id, name)
    }
}

/// Append a query parameter, encoding the value
pub fn with_query(url: &str, key: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", url, separator, key, urlencoding::encode(value))
}

/// Region name out of a region URL or path
pub fn region_from(value: &str) -> &str {
    crate::model::short_name(value)
}

/// Region of a zone, `us-central1-a` -> `us-central1`
pub fn zone_region(zone: &str) -> &str {
    let zone = crate::model::short_name(zone);
    match zone.rsplit_once('-') {
        Some((region, _)) => region,
        None => zone,
    }
}
