//! `aws-sdk-ec2` backend

use super::api::{
    error_from_code, Ec2Api, Ec2Connector, IpPermission, NetworkInterface, RouteTable,
    SecurityGroup, Subnet, Vpc,
};
use crate::credential::CredentialData;
use crate::error::{NetError, Result};
use crate::model::{Direction, Tags};
use crate::resource::ResourceKind;
use async_trait::async_trait;
use aws_sdk_ec2::config::{Credentials, Region};
use aws_sdk_ec2::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{self as ec2, Filter, IpRange, ResourceType, Tag, TagSpecification, UserIdGroupPair};
use aws_sdk_ec2::Client;
use std::sync::Arc;

/// Connects with the static keys stored in the credential
pub struct SdkConnector;

#[async_trait]
impl Ec2Connector for SdkConnector {
    async fn connect(&self, secrets: &CredentialData, region: &str) -> Result<Arc<dyn Ec2Api>> {
        let credentials = Credentials::new(
            secrets.require("access_key")?,
            secrets.require("secret_key")?,
            secrets.optional("session_token").map(str::to_string),
            None,
            "cloudnet",
        );
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials)
            .load()
            .await;
        Ok(Arc::new(SdkEc2 {
            client: Client::new(&config),
        }))
    }
}

struct SdkEc2 {
    client: Client,
}

fn sdk_error<E, R>(err: SdkError<E, R>, kind: ResourceKind, context: &str, target: &str) -> NetError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
    tracing::error!("EC2 {} failed for '{}': {}", context, target, message);
    error_from_code(err.code(), kind, context, target, message)
}

fn tags_from(tags: &[Tag]) -> Tags {
    tags.iter()
        .filter_map(|t| Some((t.key()?.to_string(), t.value().unwrap_or_default().to_string())))
        .collect()
}

fn tag_list(tags: &Tags) -> Vec<Tag> {
    tags.iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect()
}

fn tag_spec(resource: ResourceType, tags: &Tags) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource)
        .set_tags(Some(tag_list(tags)))
        .build()
}

fn vpc_filter(vpc_id: &str) -> Filter {
    Filter::builder().name("vpc-id").values(vpc_id).build()
}

fn non_empty(ids: &[String]) -> Option<Vec<String>> {
    (!ids.is_empty()).then(|| ids.to_vec())
}

fn vpc_from(vpc: &ec2::Vpc) -> Vpc {
    Vpc {
        vpc_id: vpc.vpc_id().unwrap_or_default().to_string(),
        cidr_block: vpc.cidr_block().map(str::to_string),
        state: vpc.state().map(|s| s.as_str().to_string()),
        is_default: vpc.is_default().unwrap_or(false),
        tags: tags_from(vpc.tags()),
    }
}

fn subnet_from(subnet: &ec2::Subnet) -> Subnet {
    Subnet {
        subnet_id: subnet.subnet_id().unwrap_or_default().to_string(),
        vpc_id: subnet.vpc_id().unwrap_or_default().to_string(),
        cidr_block: subnet.cidr_block().unwrap_or_default().to_string(),
        availability_zone: subnet.availability_zone().map(str::to_string),
        state: subnet.state().map(|s| s.as_str().to_string()),
        tags: tags_from(subnet.tags()),
    }
}

fn route_table_from(table: &ec2::RouteTable) -> RouteTable {
    RouteTable {
        route_table_id: table.route_table_id().unwrap_or_default().to_string(),
        main: table.associations().iter().any(|a| a.main() == Some(true)),
        subnet_ids: table
            .associations()
            .iter()
            .filter_map(|a| a.subnet_id().map(str::to_string))
            .collect(),
        gateway_ids: table
            .routes()
            .iter()
            .filter_map(|r| r.gateway_id().map(str::to_string))
            .collect(),
    }
}

fn permission_from(permission: &ec2::IpPermission) -> IpPermission {
    IpPermission {
        protocol: permission.ip_protocol().unwrap_or("-1").to_string(),
        from_port: permission.from_port(),
        to_port: permission.to_port(),
        cidr_blocks: permission
            .ip_ranges()
            .iter()
            .filter_map(|r| r.cidr_ip().map(str::to_string))
            .collect(),
        group_ids: permission
            .user_id_group_pairs()
            .iter()
            .filter_map(|p| p.group_id().map(str::to_string))
            .collect(),
        description: permission
            .ip_ranges()
            .iter()
            .find_map(|r| r.description())
            .map(str::to_string),
    }
}

fn permission_to(permission: &IpPermission) -> ec2::IpPermission {
    let ranges = permission
        .cidr_blocks
        .iter()
        .map(|cidr| {
            IpRange::builder()
                .cidr_ip(cidr)
                .set_description(permission.description.clone())
                .build()
        })
        .collect();
    let groups = permission
        .group_ids
        .iter()
        .map(|group| {
            UserIdGroupPair::builder()
                .group_id(group)
                .set_description(permission.description.clone())
                .build()
        })
        .collect();

    ec2::IpPermission::builder()
        .ip_protocol(&permission.protocol)
        .set_from_port(permission.from_port)
        .set_to_port(permission.to_port)
        .set_ip_ranges(Some(ranges))
        .set_user_id_group_pairs(Some(groups))
        .build()
}

fn group_from(group: &ec2::SecurityGroup) -> SecurityGroup {
    SecurityGroup {
        group_id: group.group_id().unwrap_or_default().to_string(),
        group_name: group.group_name().unwrap_or_default().to_string(),
        description: group.description().unwrap_or_default().to_string(),
        vpc_id: group.vpc_id().map(str::to_string),
        ingress: group.ip_permissions().iter().map(permission_from).collect(),
        egress: group
            .ip_permissions_egress()
            .iter()
            .map(permission_from)
            .collect(),
        tags: tags_from(group.tags()),
    }
}

#[async_trait]
impl Ec2Api for SdkEc2 {
    async fn describe_vpcs(&self, ids: &[String]) -> Result<Vec<Vpc>> {
        let out = self
            .client
            .describe_vpcs()
            .set_vpc_ids(non_empty(ids))
            .send()
            .await
            .map_err(|e| sdk_error(e, ResourceKind::Vpc, "describe VPCs", &ids.join(",")))?;
        Ok(out.vpcs().iter().map(vpc_from).collect())
    }

    async fn create_vpc(&self, cidr_block: &str, tags: &Tags) -> Result<Vpc> {
        let out = self
            .client
            .create_vpc()
            .cidr_block(cidr_block)
            .tag_specifications(tag_spec(ResourceType::Vpc, tags))
            .send()
            .await
            .map_err(|e| sdk_error(e, ResourceKind::Vpc, "create VPC", cidr_block))?;
        out.vpc()
            .map(vpc_from)
            .ok_or_else(|| NetError::Internal("CreateVpc returned no VPC".into()))
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        self.client
            .delete_vpc()
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| sdk_error(e, ResourceKind::Vpc, "delete VPC", vpc_id))?;
        Ok(())
    }

    async fn describe_subnets(&self, vpc_id: Option<&str>, ids: &[String]) -> Result<Vec<Subnet>> {
        let out = self
            .client
            .describe_subnets()
            .set_subnet_ids(non_empty(ids))
            .set_filters(vpc_id.map(|v| vec![vpc_filter(v)]))
            .send()
            .await
            .map_err(|e| {
                sdk_error(e, ResourceKind::Subnet, "describe subnets", vpc_id.unwrap_or_default())
            })?;
        Ok(out.subnets().iter().map(subnet_from).collect())
    }

    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: Option<&str>,
        tags: &Tags,
    ) -> Result<Subnet> {
        let out = self
            .client
            .create_subnet()
            .vpc_id(vpc_id)
            .cidr_block(cidr_block)
            .set_availability_zone(availability_zone.map(str::to_string))
            .tag_specifications(tag_spec(ResourceType::Subnet, tags))
            .send()
            .await
            .map_err(|e| sdk_error(e, ResourceKind::Subnet, "create subnet", cidr_block))?;
        out.subnet()
            .map(subnet_from)
            .ok_or_else(|| NetError::Internal("CreateSubnet returned no subnet".into()))
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        self.client
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(|e| sdk_error(e, ResourceKind::Subnet, "delete subnet", subnet_id))?;
        Ok(())
    }

    async fn describe_route_tables(&self, vpc_id: &str) -> Result<Vec<RouteTable>> {
        let out = self
            .client
            .describe_route_tables()
            .filters(vpc_filter(vpc_id))
            .send()
            .await
            .map_err(|e| sdk_error(e, ResourceKind::Vpc, "describe route tables", vpc_id))?;
        Ok(out.route_tables().iter().map(route_table_from).collect())
    }

    async fn describe_security_groups(&self, ids: &[String]) -> Result<Vec<SecurityGroup>> {
        let out = self
            .client
            .describe_security_groups()
            .set_group_ids(non_empty(ids))
            .send()
            .await
            .map_err(|e| {
                sdk_error(
                    e,
                    ResourceKind::SecurityGroup,
                    "describe security groups",
                    &ids.join(","),
                )
            })?;
        Ok(out.security_groups().iter().map(group_from).collect())
    }

    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
        tags: &Tags,
    ) -> Result<String> {
        let out = self
            .client
            .create_security_group()
            .group_name(name)
            .description(description)
            .vpc_id(vpc_id)
            .tag_specifications(tag_spec(ResourceType::SecurityGroup, tags))
            .send()
            .await
            .map_err(|e| sdk_error(e, ResourceKind::SecurityGroup, "create security group", name))?;
        out.group_id()
            .map(str::to_string)
            .ok_or_else(|| NetError::Internal("CreateSecurityGroup returned no group id".into()))
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.client
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .map_err(|e| {
                sdk_error(e, ResourceKind::SecurityGroup, "delete security group", group_id)
            })?;
        Ok(())
    }

    async fn authorize(&self, group_id: &str, direction: Direction, permission: &IpPermission) -> Result<()> {
        let permission = permission_to(permission);
        let kind = ResourceKind::SecurityGroup;
        match direction {
            Direction::Ingress => self
                .client
                .authorize_security_group_ingress()
                .group_id(group_id)
                .ip_permissions(permission)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| sdk_error(e, kind, "authorize ingress rule", group_id)),
            Direction::Egress => self
                .client
                .authorize_security_group_egress()
                .group_id(group_id)
                .ip_permissions(permission)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| sdk_error(e, kind, "authorize egress rule", group_id)),
        }
    }

    async fn revoke(&self, group_id: &str, direction: Direction, permission: &IpPermission) -> Result<()> {
        let permission = permission_to(permission);
        let kind = ResourceKind::SecurityGroup;
        match direction {
            Direction::Ingress => self
                .client
                .revoke_security_group_ingress()
                .group_id(group_id)
                .ip_permissions(permission)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| sdk_error(e, kind, "revoke ingress rule", group_id)),
            Direction::Egress => self
                .client
                .revoke_security_group_egress()
                .group_id(group_id)
                .ip_permissions(permission)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| sdk_error(e, kind, "revoke egress rule", group_id)),
        }
    }

    async fn create_tags(&self, resource_id: &str, tags: &Tags) -> Result<()> {
        self.client
            .create_tags()
            .resources(resource_id)
            .set_tags(Some(tag_list(tags)))
            .send()
            .await
            .map_err(|e| sdk_error(e, ResourceKind::Vpc, "create tags", resource_id))?;
        Ok(())
    }

    async fn describe_network_interfaces(&self, vpc_id: &str) -> Result<Vec<NetworkInterface>> {
        let out = self
            .client
            .describe_network_interfaces()
            .filters(vpc_filter(vpc_id))
            .send()
            .await
            .map_err(|e| sdk_error(e, ResourceKind::Vpc, "describe network interfaces", vpc_id))?;
        Ok(out
            .network_interfaces()
            .iter()
            .map(|eni| NetworkInterface {
                interface_id: eni.network_interface_id().unwrap_or_default().to_string(),
                subnet_id: eni.subnet_id().map(str::to_string),
                instance_id: eni
                    .attachment()
                    .and_then(|a| a.instance_id())
                    .map(str::to_string),
            })
            .collect())
    }
}
