//! AWS network handlers
//!
//! EC2 answers synchronously, so nothing here touches the operation poller.
//! Rules are authorized and revoked one permission at a time; replacing a
//! whole rule set is left to the service's incremental sequence.

use super::api::{Ec2Api, Ec2Connector};
use super::convert;
use crate::cleanup::{CascadeDelete, DeletionGate};
use crate::error::{NetError, Result};
use crate::model::{
    CreateSecurityGroupRequest, CreateSubnetRequest, CreateVpcRequest, NetworkInfo, RuleInfo,
    SecurityGroupInfo, SecurityGroupScope, SubnetInfo, SubnetScope, UpdateSecurityGroupRequest,
    UpdateSubnetRequest, UpdateVpcRequest, VpcScope,
};
use crate::resource::{
    CallContext, Dependent, Provider, ProviderHandler, ResourceHandler, ResourceKind,
    RuleHandler, RuleMutation,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

/// Reject empty regions and VPC ids passed where a region belongs
pub fn validate_region(region: &str) -> Result<&str> {
    let region = region.trim();
    if region.is_empty() {
        return Err(NetError::validation("region is required"));
    }
    if region.starts_with("vpc-") {
        return Err(NetError::validation(format!(
            "region '{}' appears to be a VPC ID, expected a region such as us-east-1",
            region
        )));
    }
    Ok(region)
}

fn first<T>(items: Vec<T>, kind: ResourceKind, id: &str) -> Result<T> {
    items
        .into_iter()
        .next()
        .ok_or_else(|| NetError::not_found(kind, id))
}

pub struct AwsHandlers {
    connector: Arc<dyn Ec2Connector>,
}

impl AwsHandlers {
    pub fn new(connector: Arc<dyn Ec2Connector>) -> Self {
        Self { connector }
    }

    async fn ec2(&self, cx: &CallContext<'_>, region: &str) -> Result<Arc<dyn Ec2Api>> {
        let region = validate_region(region)?;
        tracing::debug!("Connecting to EC2 in {}", region);
        self.connector.connect(cx.secrets, region).await
    }

    async fn load_subnets(
        &self,
        ec2: &dyn Ec2Api,
        region: &str,
        vpc_id: Option<&str>,
        ids: &[String],
    ) -> Result<Vec<SubnetInfo>> {
        let subnets = ec2.describe_subnets(vpc_id, ids).await?;

        let mut vpcs: Vec<&str> = subnets.iter().map(|s| s.vpc_id.as_str()).collect();
        vpcs.sort_unstable();
        vpcs.dedup();

        let lookups = vpcs.iter().map(|vpc| ec2.describe_route_tables(vpc));
        let mut tables = Vec::new();
        for (vpc, result) in vpcs.iter().zip(join_all(lookups).await) {
            match result {
                Ok(found) => tables.extend(found),
                // Public/private is informational only
                Err(e) => tracing::warn!("Failed to describe route tables of {}: {}", vpc, e),
            }
        }

        Ok(subnets
            .iter()
            .map(|s| convert::subnet_info(s, region, &tables))
            .collect())
    }

    async fn load_group(&self, ec2: &dyn Ec2Api, region: &str, id: &str) -> Result<SecurityGroupInfo> {
        let groups = ec2.describe_security_groups(&[id.to_string()]).await?;
        let group = first(groups, ResourceKind::SecurityGroup, id)?;
        Ok(convert::security_group_info(&group, region))
    }
}

impl ProviderHandler for AwsHandlers {
    fn provider(&self) -> Provider {
        Provider::Aws
    }
}

/// Instances with an interface in the VPC block its deletion
struct InstanceGate {
    ec2: Arc<dyn Ec2Api>,
}

#[async_trait]
impl DeletionGate for InstanceGate {
    fn name(&self) -> &str {
        "instance-gate"
    }

    async fn blockers(&self, vpc_id: &str) -> Result<Vec<String>> {
        let mut instances: Vec<String> = self
            .ec2
            .describe_network_interfaces(vpc_id)
            .await?
            .into_iter()
            .filter_map(|eni| eni.instance_id)
            .collect();
        instances.sort();
        instances.dedup();
        Ok(instances)
    }
}

#[async_trait]
impl ResourceHandler<NetworkInfo> for AwsHandlers {
    async fn list(&self, cx: &CallContext<'_>, scope: &VpcScope) -> Result<Vec<NetworkInfo>> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        let vpcs = ec2.describe_vpcs(&[]).await?;
        Ok(vpcs
            .iter()
            .map(|v| convert::network_info(v, &scope.region))
            .collect())
    }

    async fn get(&self, cx: &CallContext<'_>, scope: &VpcScope, id: &str) -> Result<NetworkInfo> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        let vpc = first(ec2.describe_vpcs(&[id.to_string()]).await?, ResourceKind::Vpc, id)?;
        Ok(convert::network_info(&vpc, &scope.region))
    }

    async fn create(
        &self,
        cx: &CallContext<'_>,
        scope: &VpcScope,
        request: &CreateVpcRequest,
    ) -> Result<NetworkInfo> {
        let cidr = request
            .cidr_block
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| NetError::validation("cidr_block is required for AWS VPCs"))?;
        let ec2 = self.ec2(cx, &scope.region).await?;

        let vpc = ec2
            .create_vpc(cidr, &convert::with_name(&request.name, &request.tags))
            .await?;
        tracing::info!("Created VPC {} ({}) in {}", vpc.vpc_id, request.name, scope.region);
        Ok(convert::network_info(&vpc, &scope.region))
    }

    /// Only tags can change; `name` rewrites the `Name` tag
    async fn update(
        &self,
        cx: &CallContext<'_>,
        scope: &VpcScope,
        id: &str,
        request: &UpdateVpcRequest,
    ) -> Result<NetworkInfo> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        let tags = convert::with_name(request.name.as_deref().unwrap_or_default(), &request.tags);
        if !tags.is_empty() {
            ec2.create_tags(id, &tags).await?;
        }
        let vpc = first(ec2.describe_vpcs(&[id.to_string()]).await?, ResourceKind::Vpc, id)?;
        Ok(convert::network_info(&vpc, &scope.region))
    }

    async fn delete(&self, cx: &CallContext<'_>, scope: &VpcScope, id: &str) -> Result<Vec<Dependent>> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        let cascade = CascadeDelete::new().gate(InstanceGate { ec2: ec2.clone() });
        let summary = cascade
            .execute(id, cx.cancel, || ec2.delete_vpc(id))
            .await?;
        Ok(summary.dependents())
    }
}

#[async_trait]
impl ResourceHandler<SubnetInfo> for AwsHandlers {
    async fn list(&self, cx: &CallContext<'_>, scope: &SubnetScope) -> Result<Vec<SubnetInfo>> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        self.load_subnets(ec2.as_ref(), &scope.region, Some(scope.vpc_id.as_str()), &[])
            .await
    }

    async fn get(&self, cx: &CallContext<'_>, scope: &SubnetScope, id: &str) -> Result<SubnetInfo> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        let subnets = self
            .load_subnets(ec2.as_ref(), &scope.region, None, &[id.to_string()])
            .await?;
        first(subnets, ResourceKind::Subnet, id)
    }

    async fn create(
        &self,
        cx: &CallContext<'_>,
        scope: &SubnetScope,
        request: &CreateSubnetRequest,
    ) -> Result<SubnetInfo> {
        if scope.vpc_id.trim().is_empty() {
            return Err(NetError::validation("vpc_id is required"));
        }
        let ec2 = self.ec2(cx, &scope.region).await?;

        let subnet = ec2
            .create_subnet(
                &scope.vpc_id,
                &request.cidr_block,
                request.availability_zone.as_deref(),
                &convert::with_name(&request.name, &request.tags),
            )
            .await?;
        tracing::info!("Created subnet {} in {}", subnet.subnet_id, scope.vpc_id);

        let subnets = self
            .load_subnets(ec2.as_ref(), &scope.region, None, &[subnet.subnet_id.clone()])
            .await?;
        first(subnets, ResourceKind::Subnet, &subnet.subnet_id)
    }

    async fn update(
        &self,
        cx: &CallContext<'_>,
        scope: &SubnetScope,
        id: &str,
        request: &UpdateSubnetRequest,
    ) -> Result<SubnetInfo> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        let tags = convert::with_name(request.name.as_deref().unwrap_or_default(), &request.tags);
        if !tags.is_empty() {
            ec2.create_tags(id, &tags).await?;
        }
        let subnets = self
            .load_subnets(ec2.as_ref(), &scope.region, None, &[id.to_string()])
            .await?;
        first(subnets, ResourceKind::Subnet, id)
    }

    async fn delete(&self, cx: &CallContext<'_>, scope: &SubnetScope, id: &str) -> Result<Vec<Dependent>> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        ec2.delete_subnet(id).await?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl ResourceHandler<SecurityGroupInfo> for AwsHandlers {
    async fn list(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
    ) -> Result<Vec<SecurityGroupInfo>> {
        // The whole region is cached; the VPC narrowing happens afterwards
        let ec2 = self.ec2(cx, &scope.region).await?;
        let groups = ec2.describe_security_groups(&[]).await?;
        Ok(groups
            .iter()
            .map(|g| convert::security_group_info(g, &scope.region))
            .collect())
    }

    async fn get(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        id: &str,
    ) -> Result<SecurityGroupInfo> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        self.load_group(ec2.as_ref(), &scope.region, id).await
    }

    async fn create(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        request: &CreateSecurityGroupRequest,
    ) -> Result<SecurityGroupInfo> {
        let vpc_id = scope
            .vpc_id
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| NetError::validation("vpc_id is required"))?;
        let permissions = request
            .rules
            .iter()
            .map(|r| Ok((r.direction, convert::permission_from_rule(r)?)))
            .collect::<Result<Vec<_>>>()?;
        let ec2 = self.ec2(cx, &scope.region).await?;

        let group_id = ec2
            .create_security_group(
                &request.name,
                &request.description,
                vpc_id,
                &convert::with_name(&request.name, &request.tags),
            )
            .await?;
        tracing::info!("Created security group {} in {}", group_id, vpc_id);

        for (direction, permission) in &permissions {
            ec2.authorize(&group_id, *direction, permission).await?;
        }
        self.load_group(ec2.as_ref(), &scope.region, &group_id).await
    }

    /// Group names and descriptions are immutable on EC2; only tags change
    async fn update(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        id: &str,
        request: &UpdateSecurityGroupRequest,
    ) -> Result<SecurityGroupInfo> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        let tags = convert::with_name(request.name.as_deref().unwrap_or_default(), &request.tags);
        if !tags.is_empty() {
            ec2.create_tags(id, &tags).await?;
        }
        if request.description.is_some() {
            tracing::debug!("Ignoring description change for security group {}", id);
        }
        self.load_group(ec2.as_ref(), &scope.region, id).await
    }

    async fn delete(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        id: &str,
    ) -> Result<Vec<Dependent>> {
        let ec2 = self.ec2(cx, &scope.region).await?;
        ec2.delete_security_group(id).await?;
        Ok(Vec::new())
    }
}

#[async_trait]
impl RuleHandler for AwsHandlers {
    fn rule_mutation(&self) -> RuleMutation {
        RuleMutation::Incremental
    }

    async fn add_rule(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        group_id: &str,
        rule: &RuleInfo,
    ) -> Result<SecurityGroupInfo> {
        let permission = convert::permission_from_rule(rule)?;
        let ec2 = self.ec2(cx, &scope.region).await?;
        ec2.authorize(group_id, rule.direction, &permission).await?;
        self.load_group(ec2.as_ref(), &scope.region, group_id).await
    }

    async fn remove_rule(
        &self,
        cx: &CallContext<'_>,
        scope: &SecurityGroupScope,
        group_id: &str,
        rule: &RuleInfo,
    ) -> Result<SecurityGroupInfo> {
        let permission = convert::permission_from_rule(rule)?;
        let ec2 = self.ec2(cx, &scope.region).await?;
        ec2.revoke(group_id, rule.direction, &permission).await?;
        self.load_group(ec2.as_ref(), &scope.region, group_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_region_validation() {
        assert_eq!(validate_region(" us-east-1 ").unwrap(), "us-east-1");
        assert_eq!(validate_region("").unwrap_err().kind(), ErrorKind::ValidationFailed);

        let err = validate_region("vpc-0abc").unwrap_err();
        assert!(err.to_string().contains("appears to be a VPC ID"));
    }
}
