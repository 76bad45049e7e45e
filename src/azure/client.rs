//! ARM client for one subscription and resource group

use super::models::ArmList;
use crate::error::{NetError, Result};
use crate::http::{HttpError, RestClient};
use crate::resource::{Provider, ResourceKind};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Public Azure Resource Manager endpoint
pub const DEFAULT_MANAGEMENT_BASE_URL: &str = "https://management.azure.com";

/// `Microsoft.Network` API version used for every call
pub const API_VERSION: &str = "2023-09-01";

pub struct AzureClient {
    http: RestClient,
    token: String,
    subscription_id: String,
    resource_group: String,
    base_url: String,
}

fn failure<'a>(
    kind: ResourceKind,
    context: &'a str,
    target: &'a str,
) -> impl FnOnce(HttpError) -> NetError + 'a {
    move |e| e.into_net(Provider::Azure, kind, context, target)
}

/// ARM id of a `Microsoft.Network` resource
pub fn network_resource_id(subscription_id: &str, resource_group: &str, path: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/{}",
        subscription_id, resource_group, path
    )
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

impl AzureClient {
    pub fn new(
        http: RestClient,
        token: String,
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        base_url: &str,
    ) -> Self {
        Self {
            http,
            token,
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    /// Build a `Microsoft.Network` URL inside the resource group
    pub fn network_url(&self, path: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/{}?api-version={}",
            self.base_url, self.subscription_id, self.resource_group, path, API_VERSION
        )
    }

    /// ARM id of a resource in the group, used when a response omits `id`
    pub fn resource_id(&self, path: &str) -> String {
        network_resource_id(&self.subscription_id, &self.resource_group, path)
    }

    pub fn vnets_url(&self) -> String {
        self.network_url("virtualNetworks")
    }

    pub fn vnet_url(&self, name: &str) -> String {
        self.network_url(&format!("virtualNetworks/{}", name))
    }

    pub fn subnets_url(&self, vnet: &str) -> String {
        self.network_url(&format!("virtualNetworks/{}/subnets", vnet))
    }

    pub fn subnet_url(&self, vnet: &str, name: &str) -> String {
        self.network_url(&format!("virtualNetworks/{}/subnets/{}", vnet, name))
    }

    pub fn nsgs_url(&self) -> String {
        self.network_url("networkSecurityGroups")
    }

    pub fn nsg_url(&self, name: &str) -> String {
        self.network_url(&format!("networkSecurityGroups/{}", name))
    }

    /// Collect every page of an ARM list
    pub async fn list<T: DeserializeOwned>(
        &self,
        url: &str,
        kind: ResourceKind,
        context: &str,
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());

        while let Some(url) = next.take() {
            let page: ArmList<T> = decode(
                self.http
                    .get(&url, &self.token)
                    .await
                    .map_err(failure(kind, context, ""))?,
            )?;
            items.extend(page.value);
            next = page.next_link.filter(|link| !link.is_empty());
        }
        Ok(items)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        kind: ResourceKind,
        context: &str,
        target: &str,
    ) -> Result<T> {
        let value = self
            .http
            .get(url, &self.token)
            .await
            .map_err(failure(kind, context, target))?;
        decode(value)
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
        kind: ResourceKind,
        context: &str,
        target: &str,
    ) -> Result<T> {
        let value = self
            .http
            .put(url, &self.token, body)
            .await
            .map_err(failure(kind, context, target))?;
        decode(value)
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
        kind: ResourceKind,
        context: &str,
        target: &str,
    ) -> Result<T> {
        let value = self
            .http
            .patch(url, &self.token, body)
            .await
            .map_err(failure(kind, context, target))?;
        decode(value)
    }

    /// ARM answers 200, 202 or 204; all count as accepted
    pub async fn delete(&self, url: &str, kind: ResourceKind, context: &str, target: &str) -> Result<()> {
        self.http
            .delete(url, &self.token)
            .await
            .map_err(failure(kind, context, target))?;
        Ok(())
    }
}
