//! GCP network handlers
//!
//! Every mutation returns a long-running operation which is driven to
//! completion by the [`OperationPoller`] before the fresh resource is read
//! back. Network deletes go through the cascading cleanup pipeline.

use super::auth::GcpCredentials;
use super::client::GcpClient;
use super::cleanup::{FirewallCleanup, InstanceGate, SubnetCleanup};
use super::compute::{Compute, LogConfig, Network, Operation, RoutingConfig, Subnetwork};
use super::convert::{self, DEFAULT_MTU, DEFAULT_ROUTING_MODE};
use crate::cleanup::CascadeDelete;
use crate::error::{NetError, Result};
use crate::model::{
    short_name, CreateSecurityGroupRequest, CreateSubnetRequest, CreateVpcRequest, NetworkInfo,
    RuleInfo, SecurityGroupInfo, SecurityGroupRules, SecurityGroupScope, SubnetInfo, SubnetScope,
    UpdateSecurityGroupRequest, UpdateSubnetRequest, VpcScope,
};
use crate::operation::{OperationKind, OperationPoller};
use crate::resource::{
    CallContext, Dependent, Provider, ProviderHandler, ResourceHandler, RuleHandler, RuleMutation,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

pub struct GcpHandlers {
    base_url: String,
    poller: OperationPoller,
    fixed_token: Option<String>,
}

impl GcpHandlers {
    pub fn new(base_url: impl Into<String>, poller: OperationPoller) -> Self {
        Self {
            base_url: base_url.into(),
            poller,
            fixed_token: None,
        }
    }

    /// Skip service-account auth and send this bearer token
    pub fn with_fixed_token(mut self, token: impl Into<String>) -> Self {
        self.fixed_token = Some(token.into());
        self
    }

    fn connect(&self, cx: &CallContext<'_>) -> Result<GcpClient> {
        match &self.fixed_token {
            Some(token) => GcpClient::new(
                GcpCredentials::fixed(token.clone()),
                cx.secrets.require("project_id")?,
                &self.base_url,
            ),
            None => GcpClient::from_credential(cx.secrets, &self.base_url),
        }
    }

    async fn wait(
        &self,
        compute: &Compute<'_>,
        op: Operation,
        kind: OperationKind,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let handle = op.handle(kind, target);
        self.poller
            .wait(compute, &handle, Some(op.state()), cancel)
            .await
    }

    async fn save_firewall(
        &self,
        client: &GcpClient,
        firewall: &super::compute::Firewall,
        cancel: &CancellationToken,
        region: Option<&str>,
    ) -> Result<SecurityGroupInfo> {
        let compute = Compute::new(client);
        let op = compute.update_firewall(firewall).await?;
        self.wait(&compute, op, OperationKind::Update, &firewall.name, cancel)
            .await?;
        let fresh = compute.get_firewall(&firewall.name).await?;
        Ok(convert::security_group_info(client, &fresh, region))
    }
}

impl ProviderHandler for GcpHandlers {
    fn provider(&self) -> Provider {
        Provider::Gcp
    }
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(NetError::validation(format!("{} is required", field)));
    }
    Ok(value)
}

/// Region and name of a subnetwork given as a path or a short name
fn locate_subnet<'a>(id: &'a str, region: &'a str) -> Result<(&'a str, &'a str)> {
    let mut segments = id.split('/');
    while let Some(segment) = segments.next() {
        if segment == "regions" {
            if let Some(region) = segments.next() {
                return Ok((region, short_name(id)));
            }
        }
    }
    if region.trim().is_empty() {
        return Err(NetError::validation(format!(
            "region is required to locate subnetwork {}",
            id
        )));
    }
    Ok((region, short_name(id)))
}

/// `projects/...` form of an id given as a link, a path or a short name
fn project_path(
    cx: &CallContext<'_>,
    id: &str,
    from_name: impl FnOnce(&str) -> Result<String>,
) -> Result<String> {
    if id.contains("projects/") {
        return Ok(convert::canonical_path(id).to_string());
    }
    let project = cx.secrets.require("project_id")?;
    Ok(format!("projects/{}/{}", project, from_name(id)?))
}

fn reject_rename(current: &str, requested: Option<&str>) -> Result<()> {
    match requested {
        Some(name) if name != current => Err(NetError::validation(format!(
            "GCP resources cannot be renamed ({} -> {})",
            current, name
        ))),
        _ => Ok(()),
    }
}

#[async_trait]
impl ResourceHandler<NetworkInfo> for GcpHandlers {
    fn canonical_id(&self, cx: &CallContext<'_>, _scope: &VpcScope, id: &str) -> Result<String> {
        project_path(cx, id, |name| Ok(format!("global/networks/{}", name)))
    }

    async fn list(&self, cx: &CallContext<'_>, _scope: &VpcScope) -> Result<Vec<NetworkInfo>> {
        let client = self.connect(cx)?;
        let networks = Compute::new(&client).list_networks().await?;
        Ok(networks
            .iter()
            .map(|n| convert::network_info(&client, n))
            .collect())
    }

    async fn get(&self, cx: &CallContext<'_>, _scope: &VpcScope, id: &str) -> Result<NetworkInfo> {
        let client = self.connect(cx)?;
        let network = Compute::new(&client).get_network(short_name(id)).await?;
        Ok(convert::network_info(&client, &network))
    }

    async fn create(
        &self,
        cx: &CallContext<'_>,
        _scope: &VpcScope,
        request: &CreateVpcRequest,
    ) -> Result<NetworkInfo> {
        let client = self.connect(cx)?;
        let compute = Compute::new(&client);

        if let Some(cidr) = &request.cidr_block {
            tracing::debug!("Ignoring cidr {} for subnet-mode network {}", cidr, request.name);
        }
        let network = Network {
            name: request.name.clone(),
            description: request.description.clone(),
            auto_create_subnetworks: Some(request.auto_create_subnets.unwrap_or(true)),
            routing_config: Some(RoutingConfig {
                routing_mode: Some(
                    request
                        .routing_mode
                        .clone()
                        .unwrap_or_else(|| DEFAULT_ROUTING_MODE.to_string()),
                ),
            }),
            mtu: Some(request.mtu.unwrap_or(DEFAULT_MTU)),
            ..Network::default()
        };

        let op = compute.insert_network(&network).await?;
        self.wait(&compute, op, OperationKind::Create, &network.name, cx.cancel)
            .await?;
        let created = compute.get_network(&network.name).await?;
        Ok(convert::network_info(&client, &created))
    }

    /// Firewalls and subnetworks go first (best effort); attached
    /// instances abort the delete with `Conflict`.
    async fn delete(
        &self,
        cx: &CallContext<'_>,
        _scope: &VpcScope,
        id: &str,
    ) -> Result<Vec<Dependent>> {
        let client = self.connect(cx)?;
        let compute = Compute::new(&client);
        let name = short_name(id);

        let cascade = CascadeDelete::new()
            .step(FirewallCleanup::new(client.clone(), self.poller))
            .step(SubnetCleanup::new(client.clone(), self.poller))
            .gate(InstanceGate::new(client.clone()));

        let summary = cascade
            .execute(name, cx.cancel, || async {
                let op = compute.delete_network(name).await?;
                self.wait(&compute, op, OperationKind::Delete, name, cx.cancel)
                    .await
            })
            .await?;

        if !summary.skipped.is_empty() {
            tracing::warn!(
                "Network {} deleted, cleanup skipped: {}",
                name,
                summary.skipped.join(", ")
            );
        }
        Ok(summary.dependents())
    }
}

#[async_trait]
impl ResourceHandler<SubnetInfo> for GcpHandlers {
    fn canonical_id(&self, cx: &CallContext<'_>, scope: &SubnetScope, id: &str) -> Result<String> {
        project_path(cx, id, |name| {
            let (region, name) = locate_subnet(name, &scope.region)?;
            Ok(format!("regions/{}/subnetworks/{}", region, name))
        })
    }

    async fn list(&self, cx: &CallContext<'_>, scope: &SubnetScope) -> Result<Vec<SubnetInfo>> {
        let client = self.connect(cx)?;
        let compute = Compute::new(&client);
        let vpc = short_name(required(&scope.vpc_id, "vpc_id")?);

        let subnets = if scope.region.trim().is_empty() {
            compute.aggregated_subnetworks().await?
        } else {
            compute.list_subnetworks(&scope.region).await?
        };

        Ok(subnets
            .iter()
            .filter(|s| short_name(&s.network) == vpc)
            .map(|s| convert::subnet_info(&client, s))
            .collect())
    }

    async fn get(&self, cx: &CallContext<'_>, scope: &SubnetScope, id: &str) -> Result<SubnetInfo> {
        let client = self.connect(cx)?;
        let (region, name) = locate_subnet(id, &scope.region)?;
        let subnet = Compute::new(&client).get_subnetwork(region, name).await?;
        Ok(convert::subnet_info(&client, &subnet))
    }

    async fn create(
        &self,
        cx: &CallContext<'_>,
        scope: &SubnetScope,
        request: &CreateSubnetRequest,
    ) -> Result<SubnetInfo> {
        let client = self.connect(cx)?;
        let compute = Compute::new(&client);
        let region = required(&scope.region, "region")?;
        let vpc = short_name(required(&scope.vpc_id, "vpc_id")?);

        let subnet = Subnetwork {
            name: request.name.clone(),
            description: request.description.clone(),
            network: client.network_path(vpc),
            ip_cidr_range: request.cidr_block.clone(),
            private_ip_google_access: Some(request.private_ip_google_access),
            log_config: request.flow_logs.then_some(LogConfig { enable: true }),
            ..Subnetwork::default()
        };

        let op = compute.insert_subnetwork(region, &subnet).await?;
        self.wait(&compute, op, OperationKind::Create, &subnet.name, cx.cancel)
            .await?;
        let created = compute.get_subnetwork(region, &subnet.name).await?;
        Ok(convert::subnet_info(&client, &created))
    }

    async fn update(
        &self,
        cx: &CallContext<'_>,
        scope: &SubnetScope,
        id: &str,
        request: &UpdateSubnetRequest,
    ) -> Result<SubnetInfo> {
        let client = self.connect(cx)?;
        let compute = Compute::new(&client);
        let (region, name) = locate_subnet(id, &scope.region)?;
        reject_rename(name, request.name.as_deref())?;

        let current = compute.get_subnetwork(region, name).await?;

        if let Some(enabled) = request.private_ip_google_access {
            if current.private_ip_google_access != Some(enabled) {
                let op = compute
                    .set_private_ip_google_access(region, name, enabled)
                    .await?;
                self.wait(&compute, op, OperationKind::Update, name, cx.cancel)
                    .await?;
            }
        }

        let mut patch = Map::new();
        if let Some(description) = &request.description {
            patch.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(flow_logs) = request.flow_logs {
            patch.insert("logConfig".into(), json!({ "enable": flow_logs }));
        }
        if !patch.is_empty() {
            // Re-read: the access toggle above bumps the fingerprint
            let latest = compute.get_subnetwork(region, name).await?;
            if let Some(fingerprint) = latest.fingerprint {
                patch.insert("fingerprint".into(), Value::String(fingerprint));
            }
            let op = compute
                .patch_subnetwork(region, name, &Value::Object(patch))
                .await?;
            self.wait(&compute, op, OperationKind::Update, name, cx.cancel)
                .await?;
        }

        let updated = compute.get_subnetwork(region, name).await?;
        Ok(convert::subnet_info(&client, &updated))
    }

    async fn delete(
        &self,
        cx: &CallContext<'_>,
        scope: &SubnetScope,
        id: &str,
    ) -> Result<Vec<Dependent>> {
        let client = self.connect(cx)?;
        let compute = Compute::new(&client);
        let (region, name) = locate_subnet(id, &scope.region)?;

        let op = compute.delete_subnetwork(region, name).await?;
        self.wait(&compute, op, OperationKind::Delete, name, cx.cancel)
            .await?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl ResourceHandler<SecurityGroupInfo> for GcpHandlers {
    fn canonical_id(
        &self,
        cx: &CallContext<'_>,
        _scope: &SecurityGroupScope,
        id: &str,
    ) -> Result<String> {
        project_path(cx, id, |name| Ok(format!("global/firewalls/{}", name)))
    }

    async fn list(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
    ) -> Result<Vec<SecurityGroupInfo>> {
        let client = self.connect(cx)?;
        let firewalls = Compute::new(&client).list_firewalls().await?;
        Ok(firewalls
            .iter()
            .map(|f| convert::security_group_info(&client, f, Some(&scope.region)))
            .collect())
    }

    async fn get(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        id: &str,
    ) -> Result<SecurityGroupInfo> {
        let client = self.connect(cx)?;
        let firewall = Compute::new(&client).get_firewall(short_name(id)).await?;
        Ok(convert::security_group_info(&client, &firewall, Some(&scope.region)))
    }

    async fn create(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        request: &CreateSecurityGroupRequest,
    ) -> Result<SecurityGroupInfo> {
        let client = self.connect(cx)?;
        let compute = Compute::new(&client);
        let vpc = required(scope.vpc_id.as_deref().unwrap_or_default(), "vpc_id")?;

        let firewall = convert::new_firewall(&client, vpc, request)?;
        let op = compute.insert_firewall(&firewall).await?;
        self.wait(&compute, op, OperationKind::Create, &firewall.name, cx.cancel)
            .await?;
        let created = compute.get_firewall(&firewall.name).await?;
        Ok(convert::security_group_info(&client, &created, Some(&scope.region)))
    }

    async fn update(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        id: &str,
        request: &UpdateSecurityGroupRequest,
    ) -> Result<SecurityGroupInfo> {
        let client = self.connect(cx)?;
        let compute = Compute::new(&client);
        let name = short_name(id);
        reject_rename(name, request.name.as_deref())?;

        if let Some(description) = &request.description {
            let op = compute
                .patch_firewall(name, &json!({ "description": description }))
                .await?;
            self.wait(&compute, op, OperationKind::Update, name, cx.cancel)
                .await?;
        }

        let firewall = compute.get_firewall(name).await?;
        Ok(convert::security_group_info(&client, &firewall, Some(&scope.region)))
    }

    async fn delete(
        &self,
        cx: &CallContext<'_>,
        _scope: &SecurityGroupScope,
        id: &str,
    ) -> Result<Vec<Dependent>> {
        let client = self.connect(cx)?;
        let compute = Compute::new(&client);
        let name = short_name(id);

        let op = compute.delete_firewall(name).await?;
        self.wait(&compute, op, OperationKind::Delete, name, cx.cancel)
            .await?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl RuleHandler for GcpHandlers {
    fn rule_mutation(&self) -> RuleMutation {
        RuleMutation::AtomicReplace
    }

    async fn add_rule(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        group_id: &str,
        rule: &RuleInfo,
    ) -> Result<SecurityGroupInfo> {
        let client = self.connect(cx)?;
        let mut firewall = Compute::new(&client).get_firewall(short_name(group_id)).await?;
        convert::add_rule(&mut firewall, rule)?;
        self.save_firewall(&client, &firewall, cx.cancel, Some(&scope.region))
            .await
    }

    async fn remove_rule(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        group_id: &str,
        rule: &RuleInfo,
    ) -> Result<SecurityGroupInfo> {
        let client = self.connect(cx)?;
        let mut firewall = Compute::new(&client).get_firewall(short_name(group_id)).await?;
        convert::remove_rule(&mut firewall, rule)?;
        self.save_firewall(&client, &firewall, cx.cancel, Some(&scope.region))
            .await
    }

    /// One firewall `update` swaps the whole rule set
    async fn replace_rules(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        group_id: &str,
        rules: &SecurityGroupRules,
    ) -> Result<SecurityGroupInfo> {
        let client = self.connect(cx)?;
        let mut firewall = Compute::new(&client).get_firewall(short_name(group_id)).await?;
        convert::replace_rules(&mut firewall, rules)?;
        self.save_firewall(&client, &firewall, cx.cancel, Some(&scope.region))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialData;
    use uuid::Uuid;

    fn with_project<T>(f: impl FnOnce(&CallContext<'_>) -> T) -> T {
        let secrets: CredentialData = [("project_id", "demo")].into_iter().collect();
        let cancel = CancellationToken::new();
        f(&CallContext {
            credential_id: Uuid::nil(),
            secrets: &secrets,
            cancel: &cancel,
        })
    }

    #[test]
    fn test_canonical_ids_agree_across_aliases() {
        let gcp = GcpHandlers::new(crate::gcp::DEFAULT_COMPUTE_BASE_URL, OperationPoller::default());
        with_project(|cx| {
            let vpc = |id: &str| {
                ResourceHandler::<NetworkInfo>::canonical_id(&gcp, cx, &VpcScope::default(), id)
                    .unwrap()
            };
            assert_eq!(vpc("prod"), "projects/demo/global/networks/prod");
            assert_eq!(vpc("projects/demo/global/networks/prod"), vpc("prod"));
            assert_eq!(
                vpc("https://www.googleapis.com/compute/v1/projects/demo/global/networks/prod"),
                vpc("prod")
            );

            let scope = SubnetScope::new("prod", "us-east1");
            let subnet = |id: &str| {
                ResourceHandler::<SubnetInfo>::canonical_id(&gcp, cx, &scope, id).unwrap()
            };
            assert_eq!(subnet("web"), "projects/demo/regions/us-east1/subnetworks/web");
            assert_eq!(subnet("regions/us-east1/subnetworks/web"), subnet("web"));

            let firewall = ResourceHandler::<SecurityGroupInfo>::canonical_id(
                &gcp,
                cx,
                &SecurityGroupScope::region("global"),
                "allow-ssh",
            )
            .unwrap();
            assert_eq!(firewall, "projects/demo/global/firewalls/allow-ssh");
        });
    }

    #[test]
    fn test_locate_subnet_from_path_or_scope() {
        assert_eq!(
            locate_subnet("projects/p/regions/us-east1/subnetworks/web", "").unwrap(),
            ("us-east1", "web")
        );
        assert_eq!(locate_subnet("web", "europe-west1").unwrap(), ("europe-west1", "web"));
        assert!(locate_subnet("web", "").is_err());
    }

    #[test]
    fn test_rename_is_rejected() {
        assert!(reject_rename("web", Some("api")).is_err());
        assert!(reject_rename("web", Some("web")).is_ok());
        assert!(reject_rename("web", None).is_ok());
    }
}
