//! Compute Engine resources used by the network handlers
//!
//! Thin typed wrappers over the REST endpoints: one method per call, list
//! calls follow `nextPageToken` to the end, aggregated calls are flattened.

use super::client::{with_query, GcpClient};
use crate::error::{NetError, Result};
use crate::http::HttpError;
use crate::operation::{
    OperationHandle, OperationKind, OperationScope, OperationSource, OperationState,
    OperationStatus,
};
use crate::resource::{Provider, ResourceKind};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_create_subnetworks: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnetworks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_config: Option<RoutingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    /// Legacy networks only
    #[serde(rename = "IPv4Range", default, skip_serializing_if = "Option::is_none")]
    pub ipv4_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub enable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnetwork {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Network URL
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub ip_cidr_range: String,
    /// Region URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip_google_access: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_config: Option<LogConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

/// One `allowed` / `denied` entry of a firewall
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallEntry {
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Firewall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Network URL
    #[serde(default)]
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ranges: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_ranges: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_tags: Vec<String>,
    #[serde(default)]
    pub allowed: Vec<FirewallEntry>,
    #[serde(default)]
    pub denied: Vec<FirewallEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub subnetwork: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OperationErrorItem {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub errors: Vec<OperationErrorItem>,
}

/// Long-running operation resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub target_link: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub error: Option<OperationError>,
}

impl Operation {
    pub fn state(&self) -> OperationState {
        let status = OperationStatus::from_provider(self.status.as_deref().unwrap_or("PENDING"));
        match &self.error {
            Some(error) if !error.errors.is_empty() => {
                let message = error
                    .errors
                    .iter()
                    .map(|e| {
                        format!(
                            "{}: {}",
                            e.code.as_deref().unwrap_or("UNKNOWN"),
                            e.message.as_deref().unwrap_or("")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                OperationState::failed(message)
            }
            _ => OperationState::new(status),
        }
    }

    pub fn handle(&self, kind: OperationKind, target: &str) -> OperationHandle {
        let scope = match (&self.zone, &self.region) {
            (Some(zone), _) => OperationScope::Zone(crate::model::short_name(zone).to_string()),
            (None, Some(region)) => OperationScope::Region(crate::model::short_name(region).to_string()),
            (None, None) => OperationScope::Global,
        };
        OperationHandle::new(self.name.clone(), scope, kind, target)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Flatten an aggregated API response into a list of items.
/// Aggregated responses have format: { "items": { "regions/us-central1": { "subnetworks": [...] }, ... } }
pub fn flatten_aggregated_response(response: &Value) -> Vec<Value> {
    let Some(items) = response.get("items").and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    let mut all_items = Vec::new();
    for scoped in items.values() {
        if let Some(obj) = scoped.as_object() {
            for (key, value) in obj {
                // Skip warning field and other metadata
                if key == "warning" {
                    continue;
                }
                if let Some(arr) = value.as_array() {
                    all_items.extend(arr.iter().cloned());
                }
            }
        }
    }
    all_items
}

/// Call context used to map failures
struct Call<'a> {
    kind: ResourceKind,
    context: &'a str,
    target: &'a str,
}

impl Call<'_> {
    fn fail(&self, err: HttpError) -> NetError {
        err.into_net(Provider::Gcp, self.kind, self.context, self.target)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

/// Compute Engine calls for one project
pub struct Compute<'a> {
    client: &'a GcpClient,
}

impl<'a> Compute<'a> {
    pub fn new(client: &'a GcpClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GcpClient {
        self.client
    }

    async fn list_all<T: DeserializeOwned>(&self, url: &str, call: Call<'_>) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_url = match &page_token {
                Some(token) => with_query(url, "pageToken", token),
                None => url.to_string(),
            };
            let response = self.client.get(&page_url).await.map_err(|e| call.fail(e))?;
            let page: ListPage<T> = decode(response)?;
            items.extend(page.items);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(items)
    }

    async fn aggregated<T: DeserializeOwned>(&self, url: &str, call: Call<'_>) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_url = match &page_token {
                Some(token) => with_query(url, "pageToken", token),
                None => url.to_string(),
            };
            let response = self.client.get(&page_url).await.map_err(|e| call.fail(e))?;
            for item in flatten_aggregated_response(&response) {
                items.push(decode(item)?);
            }

            match response.get("nextPageToken").and_then(Value::as_str) {
                Some(token) if !token.is_empty() => page_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(items)
    }

    async fn get_one<T: DeserializeOwned>(&self, url: &str, call: Call<'_>) -> Result<T> {
        let response = self.client.get(url).await.map_err(|e| call.fail(e))?;
        decode(response)
    }

    async fn mutate(&self, request: Mutate<'_>, call: Call<'_>) -> Result<Operation> {
        let response = match request {
            Mutate::Post(url, body) => self.client.post(url, Some(body)).await,
            Mutate::Put(url, body) => self.client.put(url, body).await,
            Mutate::Patch(url, body) => self.client.patch(url, body).await,
            Mutate::Delete(url) => self.client.delete(url).await,
        }
        .map_err(|e| call.fail(e))?;
        decode(response)
    }

    // -------------------------------------------------------------------------
    // Networks
    // -------------------------------------------------------------------------

    pub async fn list_networks(&self) -> Result<Vec<Network>> {
        let url = self.client.compute_global_url("networks");
        self.list_all(&url, Call { kind: ResourceKind::Vpc, context: "list networks", target: "" })
            .await
    }

    pub async fn get_network(&self, name: &str) -> Result<Network> {
        let url = self.client.compute_global_url(&format!("networks/{}", name));
        self.get_one(&url, Call { kind: ResourceKind::Vpc, context: "get network", target: name })
            .await
    }

    pub async fn insert_network(&self, network: &Network) -> Result<Operation> {
        let url = self.client.compute_global_url("networks");
        let body = serde_json::to_value(network)?;
        self.mutate(
            Mutate::Post(&url, &body),
            Call { kind: ResourceKind::Vpc, context: "create network", target: &network.name },
        )
        .await
    }

    pub async fn delete_network(&self, name: &str) -> Result<Operation> {
        let url = self.client.compute_global_url(&format!("networks/{}", name));
        self.mutate(
            Mutate::Delete(&url),
            Call { kind: ResourceKind::Vpc, context: "delete network", target: name },
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Subnetworks
    // -------------------------------------------------------------------------

    pub async fn list_subnetworks(&self, region: &str) -> Result<Vec<Subnetwork>> {
        let url = self.client.compute_regional_url(region, "subnetworks");
        self.list_all(&url, Call { kind: ResourceKind::Subnet, context: "list subnetworks", target: "" })
            .await
    }

    /// Subnetworks of every region
    pub async fn aggregated_subnetworks(&self) -> Result<Vec<Subnetwork>> {
        let url = self.client.compute_aggregated_url("subnetworks");
        self.aggregated(&url, Call { kind: ResourceKind::Subnet, context: "list subnetworks", target: "" })
            .await
    }

    pub async fn get_subnetwork(&self, region: &str, name: &str) -> Result<Subnetwork> {
        let url = self
            .client
            .compute_regional_url(region, &format!("subnetworks/{}", name));
        self.get_one(&url, Call { kind: ResourceKind::Subnet, context: "get subnetwork", target: name })
            .await
    }

    pub async fn insert_subnetwork(&self, region: &str, subnet: &Subnetwork) -> Result<Operation> {
        let url = self.client.compute_regional_url(region, "subnetworks");
        let body = serde_json::to_value(subnet)?;
        self.mutate(
            Mutate::Post(&url, &body),
            Call { kind: ResourceKind::Subnet, context: "create subnetwork", target: &subnet.name },
        )
        .await
    }

    /// PATCH requires the current fingerprint in `body`
    pub async fn patch_subnetwork(&self, region: &str, name: &str, body: &Value) -> Result<Operation> {
        let url = self
            .client
            .compute_regional_url(region, &format!("subnetworks/{}", name));
        self.mutate(
            Mutate::Patch(&url, body),
            Call { kind: ResourceKind::Subnet, context: "update subnetwork", target: name },
        )
        .await
    }

    pub async fn set_private_ip_google_access(
        &self,
        region: &str,
        name: &str,
        enabled: bool,
    ) -> Result<Operation> {
        let url = self.client.compute_regional_url(
            region,
            &format!("subnetworks/{}/setPrivateIpGoogleAccess", name),
        );
        let body = serde_json::json!({ "privateIpGoogleAccess": enabled });
        self.mutate(
            Mutate::Post(&url, &body),
            Call { kind: ResourceKind::Subnet, context: "update subnetwork", target: name },
        )
        .await
    }

    pub async fn delete_subnetwork(&self, region: &str, name: &str) -> Result<Operation> {
        let url = self
            .client
            .compute_regional_url(region, &format!("subnetworks/{}", name));
        self.mutate(
            Mutate::Delete(&url),
            Call { kind: ResourceKind::Subnet, context: "delete subnetwork", target: name },
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Firewalls
    // -------------------------------------------------------------------------

    pub async fn list_firewalls(&self) -> Result<Vec<Firewall>> {
        let url = self.client.compute_global_url("firewalls");
        self.list_all(&url, Call { kind: ResourceKind::SecurityGroup, context: "list firewalls", target: "" })
            .await
    }

    pub async fn get_firewall(&self, name: &str) -> Result<Firewall> {
        let url = self.client.compute_global_url(&format!("firewalls/{}", name));
        self.get_one(&url, Call { kind: ResourceKind::SecurityGroup, context: "get firewall", target: name })
            .await
    }

    pub async fn insert_firewall(&self, firewall: &Firewall) -> Result<Operation> {
        let url = self.client.compute_global_url("firewalls");
        let body = serde_json::to_value(firewall)?;
        self.mutate(
            Mutate::Post(&url, &body),
            Call { kind: ResourceKind::SecurityGroup, context: "create firewall", target: &firewall.name },
        )
        .await
    }

    /// Full replacement of a firewall (PUT)
    pub async fn update_firewall(&self, firewall: &Firewall) -> Result<Operation> {
        let url = self
            .client
            .compute_global_url(&format!("firewalls/{}", firewall.name));
        let body = serde_json::to_value(firewall)?;
        self.mutate(
            Mutate::Put(&url, &body),
            Call { kind: ResourceKind::SecurityGroup, context: "update firewall", target: &firewall.name },
        )
        .await
    }

    pub async fn patch_firewall(&self, name: &str, body: &Value) -> Result<Operation> {
        let url = self.client.compute_global_url(&format!("firewalls/{}", name));
        self.mutate(
            Mutate::Patch(&url, body),
            Call { kind: ResourceKind::SecurityGroup, context: "update firewall", target: name },
        )
        .await
    }

    pub async fn delete_firewall(&self, name: &str) -> Result<Operation> {
        let url = self.client.compute_global_url(&format!("firewalls/{}", name));
        self.mutate(
            Mutate::Delete(&url),
            Call { kind: ResourceKind::SecurityGroup, context: "delete firewall", target: name },
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Instances and operations
    // -------------------------------------------------------------------------

    /// Instances of every zone
    pub async fn aggregated_instances(&self) -> Result<Vec<Instance>> {
        let url = self.client.compute_aggregated_url("instances");
        self.aggregated(&url, Call { kind: ResourceKind::Vpc, context: "list instances", target: "" })
            .await
    }

    pub async fn get_operation(&self, handle: &OperationHandle) -> Result<Operation> {
        let path = format!("operations/{}", handle.name);
        let url = match &handle.scope {
            OperationScope::Global => self.client.compute_global_url(&path),
            OperationScope::Region(region) => self.client.compute_regional_url(region, &path),
            OperationScope::Zone(zone) => self.client.compute_zonal_url(zone, &path),
        };
        let response = self
            .client
            .get(&url)
            .await
            .map_err(|e| NetError::provider(Provider::Gcp, format!("poll operation {}", handle.name), e))?;
        decode(response)
    }
}

#[async_trait]
impl OperationSource for Compute<'_> {
    async fn poll(&self, handle: &OperationHandle) -> Result<OperationState> {
        Ok(self.get_operation(handle).await?.state())
    }
}

enum Mutate<'a> {
    Post(&'a str, &'a Value),
    Put(&'a str, &'a Value),
    Patch(&'a str, &'a Value),
    Delete(&'a str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_aggregated_skips_warnings() {
        let response = json!({
            "items": {
                "regions/us-central1": { "subnetworks": [{ "name": "a" }, { "name": "b" }] },
                "regions/europe-west1": { "warning": { "code": "NO_RESULTS_ON_PAGE" } },
                "regions/asia-east1": { "subnetworks": [{ "name": "c" }] }
            }
        });
        let names: Vec<_> = flatten_aggregated_response(&response)
            .into_iter()
            .map(|v| v["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"c".to_string()));
    }

    #[test]
    fn test_operation_error_payload_becomes_failed_state() {
        let op: Operation = serde_json::from_value(json!({
            "name": "operation-1",
            "status": "DONE",
            "error": { "errors": [{ "code": "RESOURCE_IN_USE", "message": "network is in use" }] }
        }))
        .unwrap();
        let state = op.state();
        assert!(state.is_terminal());
        assert_eq!(state.error.as_deref(), Some("RESOURCE_IN_USE: network is in use"));
    }

    #[test]
    fn test_operation_handle_scope() {
        let op: Operation = serde_json::from_value(json!({
            "name": "operation-2",
            "status": "RUNNING",
            "region": "https://www.googleapis.com/compute/v1/projects/p/regions/us-east1"
        }))
        .unwrap();
        let handle = op.handle(OperationKind::Create, "web");
        assert_eq!(handle.scope, OperationScope::Region("us-east1".into()));
        assert_eq!(op.state().status, OperationStatus::Running);
    }

    #[test]
    fn test_firewall_wire_format() {
        let firewall = Firewall {
            name: "allow-ssh".into(),
            network: "global/networks/prod".into(),
            allowed: vec![FirewallEntry {
                ip_protocol: "tcp".into(),
                ports: vec!["22".into()],
            }],
            ..Firewall::default()
        };
        let value = serde_json::to_value(&firewall).unwrap();
        assert_eq!(value["allowed"][0]["IPProtocol"], "tcp");
        assert!(value.get("sourceRanges").is_none());
    }
}
