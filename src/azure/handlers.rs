//! Azure network handlers
//!
//! Virtual networks, their subnets and network security groups through ARM.
//! Every call is scoped to one resource group; it comes from the request
//! scope and falls back to the credential.

use super::auth::{AzureAuthenticator, ClientSecret};
use super::client::{network_resource_id, AzureClient};
use super::convert;
use super::models::{
    AddressSpace, NetworkSecurityGroup, NetworkSecurityGroupProperties, Subnet, SubnetProperties,
    VirtualNetwork, VirtualNetworkProperties,
};
use crate::credential::CredentialData;
use crate::error::{NetError, Result};
use crate::http::RestClient;
use crate::model::{
    short_name, CreateSecurityGroupRequest, CreateSubnetRequest, CreateVpcRequest, NetworkInfo,
    SecurityGroupInfo, SecurityGroupScope, SubnetInfo, SubnetScope, Tags,
    UpdateSecurityGroupRequest, UpdateVpcRequest, VpcScope,
};
use crate::resource::{
    CallContext, Dependent, Provider, ProviderHandler, ResourceHandler, ResourceKind, RuleHandler,
};
use async_trait::async_trait;
use serde_json::json;

pub struct AzureHandlers {
    http: RestClient,
    auth: AzureAuthenticator,
    management_base_url: String,
}

/// `East US` and `eastus` name the same location
fn same_location(a: &str, b: &str) -> bool {
    let normalize = |s: &str| s.replace(' ', "").to_lowercase();
    normalize(a) == normalize(b)
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(NetError::validation(format!("{} is required", field)));
    }
    Ok(value)
}

/// Request scope first, then the credential
fn resource_group<'a>(secrets: &'a CredentialData, requested: Option<&'a str>) -> Result<&'a str> {
    requested
        .filter(|rg| !rg.trim().is_empty())
        .or_else(|| secrets.optional("resource_group"))
        .ok_or_else(|| {
            NetError::validation(
                "resource_group is required: pass it with the request or store it in the credential",
            )
        })
}

/// Full ARM id for a name, or the id itself when it already is one
fn arm_id(
    cx: &CallContext<'_>,
    requested_group: Option<&str>,
    id: &str,
    path: impl FnOnce(&str) -> String,
) -> Result<String> {
    if id.starts_with("/subscriptions/") {
        return Ok(id.to_string());
    }
    let subscription_id = cx.secrets.require("subscription_id")?;
    let group = resource_group(cx.secrets, requested_group)?;
    Ok(network_resource_id(subscription_id, group, &path(short_name(id))))
}

fn reject_rename(current: &str, requested: Option<&str>) -> Result<()> {
    match requested {
        Some(name) if name != current => Err(NetError::validation(format!(
            "Azure resources cannot be renamed ({} -> {})",
            current, name
        ))),
        _ => Ok(()),
    }
}

fn merged(current: &Tags, update: &Tags) -> Tags {
    let mut tags = current.clone();
    tags.extend(update.iter().map(|(k, v)| (k.clone(), v.clone())));
    tags
}

impl AzureHandlers {
    pub fn new(management_base_url: &str, login_base_url: &str) -> Result<Self> {
        let http = RestClient::new()
            .map_err(|e| NetError::provider(Provider::Azure, "create HTTP client", e))?;
        Ok(Self {
            auth: AzureAuthenticator::new(http.clone(), login_base_url, management_base_url),
            http,
            management_base_url: management_base_url.to_string(),
        })
    }

    async fn connect(&self, cx: &CallContext<'_>, requested_group: Option<&str>) -> Result<AzureClient> {
        let secrets = cx.secrets;
        let subscription_id = secrets.require("subscription_id")?;
        let secret = ClientSecret {
            tenant_id: secrets.require("tenant_id")?,
            client_id: secrets.require("client_id")?,
            client_secret: secrets.require("client_secret")?,
        };

        let resource_group = resource_group(secrets, requested_group)?;

        let token = self
            .auth
            .token(&secret)
            .await
            .map_err(|e| NetError::provider(Provider::Azure, "acquire access token", e))?;

        Ok(AzureClient::new(
            self.http.clone(),
            token,
            subscription_id,
            resource_group,
            &self.management_base_url,
        ))
    }
}

impl ProviderHandler for AzureHandlers {
    fn provider(&self) -> Provider {
        Provider::Azure
    }
}

#[async_trait]
impl ResourceHandler<NetworkInfo> for AzureHandlers {
    fn canonical_id(&self, cx: &CallContext<'_>, scope: &VpcScope, id: &str) -> Result<String> {
        arm_id(cx, scope.resource_group.as_deref(), id, |name| {
            format!("virtualNetworks/{}", name)
        })
    }

    async fn list(&self, cx: &CallContext<'_>, scope: &VpcScope) -> Result<Vec<NetworkInfo>> {
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        let vnets: Vec<VirtualNetwork> = client
            .list(&client.vnets_url(), ResourceKind::Vpc, "list virtual networks")
            .await?;
        Ok(vnets
            .iter()
            .filter(|v| scope.region.is_empty() || same_location(&v.location, &scope.region))
            .map(|v| convert::network_info(&client, v))
            .collect())
    }

    async fn get(&self, cx: &CallContext<'_>, scope: &VpcScope, id: &str) -> Result<NetworkInfo> {
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        let name = short_name(id);
        let vnet: VirtualNetwork = client
            .get(&client.vnet_url(name), ResourceKind::Vpc, "get virtual network", id)
            .await?;
        Ok(convert::network_info(&client, &vnet))
    }

    async fn create(
        &self,
        cx: &CallContext<'_>,
        scope: &VpcScope,
        request: &CreateVpcRequest,
    ) -> Result<NetworkInfo> {
        let region = required(&scope.region, "region")?;
        let cidr = request
            .cidr_block
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| NetError::validation("cidr_block is required for Azure virtual networks"))?;
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;

        let body = VirtualNetwork {
            name: request.name.clone(),
            location: region.to_string(),
            tags: request.tags.clone(),
            properties: VirtualNetworkProperties {
                address_space: Some(AddressSpace {
                    address_prefixes: vec![cidr.to_string()],
                }),
                ..VirtualNetworkProperties::default()
            },
            ..VirtualNetwork::default()
        };

        let vnet: VirtualNetwork = client
            .put(
                &client.vnet_url(&request.name),
                &serde_json::to_value(&body)?,
                ResourceKind::Vpc,
                "create virtual network",
                &request.name,
            )
            .await?;
        tracing::info!("Created virtual network {} in {}", vnet.name, client.resource_group());
        Ok(convert::network_info(&client, &vnet))
    }

    /// Tags merge into the existing set
    async fn update(
        &self,
        cx: &CallContext<'_>,
        scope: &VpcScope,
        id: &str,
        request: &UpdateVpcRequest,
    ) -> Result<NetworkInfo> {
        let name = short_name(id);
        reject_rename(name, request.name.as_deref())?;
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        let url = client.vnet_url(name);

        let current: VirtualNetwork = client
            .get(&url, ResourceKind::Vpc, "get virtual network", id)
            .await?;
        let vnet: VirtualNetwork = client
            .patch(
                &url,
                &json!({ "tags": merged(&current.tags, &request.tags) }),
                ResourceKind::Vpc,
                "update virtual network tags",
                id,
            )
            .await?;
        Ok(convert::network_info(&client, &vnet))
    }

    async fn delete(&self, cx: &CallContext<'_>, scope: &VpcScope, id: &str) -> Result<Vec<Dependent>> {
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        client
            .delete(
                &client.vnet_url(short_name(id)),
                ResourceKind::Vpc,
                "delete virtual network",
                id,
            )
            .await?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl ResourceHandler<SubnetInfo> for AzureHandlers {
    fn canonical_id(&self, cx: &CallContext<'_>, scope: &SubnetScope, id: &str) -> Result<String> {
        let vnet = short_name(required(&scope.vpc_id, "vpc_id")?);
        arm_id(cx, scope.resource_group.as_deref(), id, |name| {
            format!("virtualNetworks/{}/subnets/{}", vnet, name)
        })
    }

    async fn list(&self, cx: &CallContext<'_>, scope: &SubnetScope) -> Result<Vec<SubnetInfo>> {
        let vnet = short_name(required(&scope.vpc_id, "vpc_id")?);
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        let subnets: Vec<Subnet> = client
            .list(&client.subnets_url(vnet), ResourceKind::Subnet, "list subnets")
            .await?;
        Ok(subnets
            .iter()
            .map(|s| convert::subnet_info(&client, vnet, s, &scope.region))
            .collect())
    }

    async fn get(&self, cx: &CallContext<'_>, scope: &SubnetScope, id: &str) -> Result<SubnetInfo> {
        let vnet = short_name(required(&scope.vpc_id, "vpc_id")?);
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        let subnet: Subnet = client
            .get(
                &client.subnet_url(vnet, short_name(id)),
                ResourceKind::Subnet,
                "get subnet",
                id,
            )
            .await?;
        Ok(convert::subnet_info(&client, vnet, &subnet, &scope.region))
    }

    async fn create(
        &self,
        cx: &CallContext<'_>,
        scope: &SubnetScope,
        request: &CreateSubnetRequest,
    ) -> Result<SubnetInfo> {
        let vnet = short_name(required(&scope.vpc_id, "vpc_id")?);
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;

        let body = Subnet {
            name: request.name.clone(),
            properties: SubnetProperties {
                address_prefix: Some(request.cidr_block.clone()),
                ..SubnetProperties::default()
            },
            ..Subnet::default()
        };
        let subnet: Subnet = client
            .put(
                &client.subnet_url(vnet, &request.name),
                &serde_json::to_value(&body)?,
                ResourceKind::Subnet,
                "create subnet",
                &request.name,
            )
            .await?;
        tracing::info!("Created subnet {} in virtual network {}", subnet.name, vnet);
        Ok(convert::subnet_info(&client, vnet, &subnet, &scope.region))
    }

    async fn delete(&self, cx: &CallContext<'_>, scope: &SubnetScope, id: &str) -> Result<Vec<Dependent>> {
        let vnet = short_name(required(&scope.vpc_id, "vpc_id")?);
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        client
            .delete(
                &client.subnet_url(vnet, short_name(id)),
                ResourceKind::Subnet,
                "delete subnet",
                id,
            )
            .await?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl ResourceHandler<SecurityGroupInfo> for AzureHandlers {
    fn canonical_id(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        id: &str,
    ) -> Result<String> {
        arm_id(cx, scope.resource_group.as_deref(), id, |name| {
            format!("networkSecurityGroups/{}", name)
        })
    }

    async fn list(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
    ) -> Result<Vec<SecurityGroupInfo>> {
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        let groups: Vec<NetworkSecurityGroup> = client
            .list(
                &client.nsgs_url(),
                ResourceKind::SecurityGroup,
                "list network security groups",
            )
            .await?;
        Ok(groups
            .iter()
            .filter(|g| scope.region.is_empty() || same_location(&g.location, &scope.region))
            .map(|g| convert::security_group_info(&client, g))
            .collect())
    }

    async fn get(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        id: &str,
    ) -> Result<SecurityGroupInfo> {
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        let group: NetworkSecurityGroup = client
            .get(
                &client.nsg_url(short_name(id)),
                ResourceKind::SecurityGroup,
                "get network security group",
                id,
            )
            .await?;
        Ok(convert::security_group_info(&client, &group))
    }

    async fn create(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        request: &CreateSecurityGroupRequest,
    ) -> Result<SecurityGroupInfo> {
        let region = required(&scope.region, "region")?;
        let security_rules = convert::security_rules(&request.rules)?;
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;

        let body = NetworkSecurityGroup {
            name: request.name.clone(),
            location: region.to_string(),
            tags: request.tags.clone(),
            properties: NetworkSecurityGroupProperties {
                security_rules,
                ..NetworkSecurityGroupProperties::default()
            },
            ..NetworkSecurityGroup::default()
        };
        let group: NetworkSecurityGroup = client
            .put(
                &client.nsg_url(&request.name),
                &serde_json::to_value(&body)?,
                ResourceKind::SecurityGroup,
                "create network security group",
                &request.name,
            )
            .await?;
        tracing::info!("Created network security group {}", group.name);
        Ok(convert::security_group_info(&client, &group))
    }

    /// Network security groups carry no description; only tags change
    async fn update(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        id: &str,
        request: &UpdateSecurityGroupRequest,
    ) -> Result<SecurityGroupInfo> {
        let name = short_name(id);
        reject_rename(name, request.name.as_deref())?;
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        let url = client.nsg_url(name);

        let current: NetworkSecurityGroup = client
            .get(&url, ResourceKind::SecurityGroup, "get network security group", id)
            .await?;
        let group: NetworkSecurityGroup = client
            .patch(
                &url,
                &json!({ "tags": merged(&current.tags, &request.tags) }),
                ResourceKind::SecurityGroup,
                "update network security group tags",
                id,
            )
            .await?;
        Ok(convert::security_group_info(&client, &group))
    }

    async fn delete(&self, cx: &CallContext<'_>, scope: &SecurityGroupScope, id: &str) -> Result<Vec<Dependent>> {
        let client = self.connect(cx, scope.resource_group.as_deref()).await?;
        client
            .delete(
                &client.nsg_url(short_name(id)),
                ResourceKind::SecurityGroup,
                "delete network security group",
                id,
            )
            .await?;
        Ok(Vec::new())
    }
}

/// Rule mutation on existing groups is not built for Azure
impl RuleHandler for AzureHandlers {}
