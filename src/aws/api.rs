//! EC2 seam
//!
//! The handlers only see [`Ec2Api`] and these plain records, so a backend can
//! be the AWS SDK or an in-memory fake.

use crate::credential::CredentialData;
use crate::error::{NetError, Result};
use crate::model::{Direction, Tags};
use crate::resource::{Provider, ResourceKind};
use async_trait::async_trait;
use std::sync::Arc;

/// Tag key holding the display name of EC2 resources
pub const NAME_TAG: &str = "Name";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vpc {
    pub vpc_id: String,
    pub cidr_block: Option<String>,
    pub state: Option<String>,
    pub is_default: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subnet {
    pub subnet_id: String,
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: Option<String>,
    pub state: Option<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteTable {
    pub route_table_id: String,
    pub main: bool,
    /// Explicitly associated subnets
    pub subnet_ids: Vec<String>,
    /// Gateway targets of the routes (`igw-…`, `local`, …)
    pub gateway_ids: Vec<String>,
}

/// One EC2 permission entry; `protocol` uses EC2 spelling (`-1` for all)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpPermission {
    pub protocol: String,
    pub from_port: Option<i32>,
    pub to_port: Option<i32>,
    pub cidr_blocks: Vec<String>,
    pub group_ids: Vec<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityGroup {
    pub group_id: String,
    pub group_name: String,
    pub description: String,
    pub vpc_id: Option<String>,
    pub ingress: Vec<IpPermission>,
    pub egress: Vec<IpPermission>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkInterface {
    pub interface_id: String,
    pub subnet_id: Option<String>,
    /// Set while the interface is attached to an instance
    pub instance_id: Option<String>,
}

/// Regional EC2 client
#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// All VPCs, or only `ids` when non-empty
    async fn describe_vpcs(&self, ids: &[String]) -> Result<Vec<Vpc>>;
    async fn create_vpc(&self, cidr_block: &str, tags: &Tags) -> Result<Vpc>;
    async fn delete_vpc(&self, vpc_id: &str) -> Result<()>;

    /// Subnets of `vpc_id` and/or the given ids
    async fn describe_subnets(&self, vpc_id: Option<&str>, ids: &[String]) -> Result<Vec<Subnet>>;
    async fn create_subnet(
        &self,
        vpc_id: &str,
        cidr_block: &str,
        availability_zone: Option<&str>,
        tags: &Tags,
    ) -> Result<Subnet>;
    async fn delete_subnet(&self, subnet_id: &str) -> Result<()>;
    async fn describe_route_tables(&self, vpc_id: &str) -> Result<Vec<RouteTable>>;

    /// Every group of the region when `ids` is empty
    async fn describe_security_groups(&self, ids: &[String]) -> Result<Vec<SecurityGroup>>;
    /// Returns the new group id
    async fn create_security_group(
        &self,
        name: &str,
        description: &str,
        vpc_id: &str,
        tags: &Tags,
    ) -> Result<String>;
    async fn delete_security_group(&self, group_id: &str) -> Result<()>;
    async fn authorize(&self, group_id: &str, direction: Direction, permission: &IpPermission) -> Result<()>;
    async fn revoke(&self, group_id: &str, direction: Direction, permission: &IpPermission) -> Result<()>;

    async fn create_tags(&self, resource_id: &str, tags: &Tags) -> Result<()>;
    async fn describe_network_interfaces(&self, vpc_id: &str) -> Result<Vec<NetworkInterface>>;
}

/// Builds an [`Ec2Api`] for one credential and region
#[async_trait]
pub trait Ec2Connector: Send + Sync {
    async fn connect(&self, secrets: &CredentialData, region: &str) -> Result<Arc<dyn Ec2Api>>;
}

/// Map an EC2 error code onto the error taxonomy
pub fn error_from_code(
    code: Option<&str>,
    kind: ResourceKind,
    context: &str,
    target: &str,
    message: impl Into<String>,
) -> NetError {
    let message = message.into();
    match code.unwrap_or_default() {
        "DependencyViolation" | "InvalidPermission.Duplicate" | "InvalidGroup.Duplicate"
        | "InvalidGroup.InUse" => NetError::Conflict(message),
        "InvalidVpcID.NotFound" => NetError::not_found(ResourceKind::Vpc, target),
        "InvalidSubnetID.NotFound" => NetError::not_found(ResourceKind::Subnet, target),
        "InvalidGroup.NotFound" | "InvalidGroupId.Malformed" => {
            NetError::not_found(ResourceKind::SecurityGroup, target)
        }
        "InvalidPermission.NotFound" => NetError::not_found(kind, target),
        "InvalidParameterValue" | "InvalidParameter" | "MissingParameter"
        | "InvalidParameterCombination" | "InvalidVpc.Range" | "InvalidSubnet.Range"
        | "InvalidSubnet.Conflict" => NetError::Validation(message),
        _ => NetError::provider(Provider::Aws, context, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_dependency_violation_is_conflict() {
        let err = error_from_code(
            Some("DependencyViolation"),
            ResourceKind::Vpc,
            "delete VPC",
            "vpc-1",
            "The vpc has dependencies",
        );
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_not_found_codes_name_the_resource() {
        let err = error_from_code(
            Some("InvalidSubnetID.NotFound"),
            ResourceKind::Vpc,
            "get subnet",
            "subnet-9",
            "missing",
        );
        assert!(matches!(
            err,
            NetError::NotFound { kind: ResourceKind::Subnet, ref id } if id == "subnet-9"
        ));
    }

    #[test]
    fn test_unknown_codes_are_provider_errors() {
        let err = error_from_code(None, ResourceKind::Vpc, "list VPCs", "", "throttled");
        assert_eq!(err.kind(), ErrorKind::ProviderError);
        assert_eq!(err.status_code(), 502);
    }
}
