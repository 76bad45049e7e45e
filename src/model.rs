//! Provider-neutral network DTOs
//!
//! Each provider translates its native shapes into these types on the way
//! out and reads the request types on the way in.

use crate::error::{NetError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type Tags = BTreeMap<String, String>;

/// Maximum length accepted for resource names and descriptions
const MAX_NAME_LENGTH: usize = 255;

/// Normalized lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Creating,
    #[default]
    Active,
    Deleting,
    Error,
    Unknown,
}

impl ResourceState {
    /// Normalize a provider-specific state string
    pub fn from_provider(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "pending" | "creating" | "provisioning" | "updating" | "staging" => Self::Creating,
            "available" | "active" | "ready" | "succeeded" | "running" | "done" => Self::Active,
            "deleting" | "deprovisioning" | "stopping" => Self::Deleting,
            "failed" | "error" | "canceled" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Virtual network (VPC / VNet)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub state: ResourceState,
    pub is_default: bool,
    /// Absent for global networks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_create_subnetworks: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl NetworkInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            state: ResourceState::Active,
            is_default: false,
            region: None,
            cidr: None,
            description: None,
            tags: Tags::new(),
            routing_mode: None,
            mtu: None,
            auto_create_subnetworks: None,
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetInfo {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
    pub cidr_block: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub state: ResourceState,
    /// Route-table derived; only AWS has the concept
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip_google_access: Option<bool>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl SubnetInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        vpc_id: impl Into<String>,
        cidr_block: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            vpc_id: vpc_id.into(),
            cidr_block: cidr_block.into(),
            availability_zone: None,
            region: None,
            state: ResourceState::Active,
            is_public: false,
            description: None,
            gateway_address: None,
            private_ip_google_access: None,
            tags: Tags::new(),
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default)]
    pub rules: Vec<RuleInfo>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl SecurityGroupInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            vpc_id: String::new(),
            region: None,
            rules: Vec::new(),
            tags: Tags::new(),
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Egress => "egress",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    Allow,
    Deny,
}

/// One traffic rule inside a security group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub direction: Direction,
    #[serde(default)]
    pub action: RuleAction,
    /// `tcp`, `udp`, `icmp` or `all`
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cidr_blocks: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RuleInfo {
    pub fn new(direction: Direction, protocol: impl Into<String>) -> Self {
        Self {
            direction,
            action: RuleAction::Allow,
            protocol: protocol.into(),
            from_port: None,
            to_port: None,
            cidr_blocks: Vec::new(),
            source_groups: Vec::new(),
            description: None,
        }
    }

    pub fn ports(mut self, from: u16, to: u16) -> Self {
        self.from_port = Some(from);
        self.to_port = Some(to);
        self
    }

    pub fn cidr(mut self, block: impl Into<String>) -> Self {
        self.cidr_blocks.push(block.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.protocol.trim().is_empty() {
            return Err(NetError::validation("rule protocol is required"));
        }
        if let (Some(from), Some(to)) = (self.from_port, self.to_port) {
            if from > to {
                return Err(NetError::validation(format!(
                    "rule port range {}-{} is inverted",
                    from, to
                )));
            }
        }
        Ok(())
    }

    /// Port range rendered as `80` or `8000-8080`, `None` for all ports
    pub fn port_range(&self) -> Option<String> {
        match (self.from_port, self.to_port) {
            (Some(from), Some(to)) if from == to => Some(from.to_string()),
            (Some(from), Some(to)) => Some(format!("{}-{}", from, to)),
            (Some(port), None) | (None, Some(port)) => Some(port.to_string()),
            (None, None) => None,
        }
    }
}

/// Parse `80` or `8000-8080` into a port pair
pub fn parse_port_range(range: &str) -> Option<(u16, u16)> {
    match range.split_once('-') {
        Some((from, to)) => {
            let from = from.trim().parse().ok()?;
            let to = to.trim().parse().ok()?;
            Some((from, to))
        }
        None => {
            let port = range.trim().parse().ok()?;
            Some((port, port))
        }
    }
}

// =============================================================================
// Scopes
// =============================================================================

/// Where a VPC lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcScope {
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

impl VpcScope {
    pub fn region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            resource_group: None,
        }
    }

    pub fn with_resource_group(mut self, group: impl Into<String>) -> Self {
        self.resource_group = Some(group.into());
        self
    }
}

/// Subnets are always listed per parent VPC
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetScope {
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

impl SubnetScope {
    pub fn new(vpc_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            vpc_id: vpc_id.into(),
            region: region.into(),
            resource_group: None,
        }
    }

    /// Location of the parent VPC
    pub fn vpc_scope(&self) -> VpcScope {
        VpcScope {
            region: self.region.clone(),
            resource_group: self.resource_group.clone(),
        }
    }

    pub fn with_resource_group(mut self, group: impl Into<String>) -> Self {
        self.resource_group = Some(group.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupScope {
    #[serde(default)]
    pub region: String,
    /// Narrows list results to one VPC after cache resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,
}

impl SecurityGroupScope {
    pub fn region(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            vpc_id: None,
            resource_group: None,
        }
    }

    pub fn in_vpc(mut self, vpc_id: impl Into<String>) -> Self {
        self.vpc_id = Some(vpc_id.into());
        self
    }

    pub fn with_resource_group(mut self, group: impl Into<String>) -> Self {
        self.resource_group = Some(group.into());
        self
    }
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVpcRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cidr_block: Option<String>,
    #[serde(default)]
    pub auto_create_subnets: Option<bool>,
    #[serde(default)]
    pub routing_mode: Option<String>,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub tags: Tags,
}

impl CreateVpcRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn cidr(mut self, block: impl Into<String>) -> Self {
        self.cidr_block = Some(block.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("name", &self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateVpcRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSubnetRequest {
    pub name: String,
    pub cidr_block: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private_ip_google_access: bool,
    #[serde(default)]
    pub flow_logs: bool,
    #[serde(default)]
    pub tags: Tags,
}

impl CreateSubnetRequest {
    pub fn new(name: impl Into<String>, cidr_block: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cidr_block: cidr_block.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("name", &self.name)?;
        if self.cidr_block.trim().is_empty() {
            return Err(NetError::validation("cidr_block is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSubnetRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub private_ip_google_access: Option<bool>,
    #[serde(default)]
    pub flow_logs: Option<bool>,
    #[serde(default)]
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSecurityGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// GCP firewall priority
    #[serde(default)]
    pub priority: Option<u32>,
    /// GCP firewall target tags
    #[serde(default)]
    pub target_tags: Vec<String>,
    #[serde(default)]
    pub rules: Vec<RuleInfo>,
    #[serde(default)]
    pub tags: Tags,
}

impl CreateSecurityGroupRequest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name("name", &self.name)?;
        if self.description.len() > MAX_NAME_LENGTH {
            return Err(NetError::validation(format!(
                "description must be at most {} characters",
                MAX_NAME_LENGTH
            )));
        }
        self.rules.iter().try_for_each(RuleInfo::validate)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSecurityGroupRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Tags,
}

/// Full replacement rule set for a security group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityGroupRules {
    #[serde(default)]
    pub ingress: Vec<RuleInfo>,
    #[serde(default)]
    pub egress: Vec<RuleInfo>,
}

impl SecurityGroupRules {
    /// Ingress rules first, then egress, each with its direction forced
    pub fn ordered(&self) -> Vec<RuleInfo> {
        let ingress = self.ingress.iter().cloned().map(|mut rule| {
            rule.direction = Direction::Ingress;
            rule
        });
        let egress = self.egress.iter().cloned().map(|mut rule| {
            rule.direction = Direction::Egress;
            rule
        });
        ingress.chain(egress).collect()
    }
}

fn validate_name(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(NetError::validation(format!("{} is required", field)));
    }
    if value.len() > MAX_NAME_LENGTH {
        return Err(NetError::validation(format!(
            "{} must be at most {} characters",
            field, MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

/// Last path segment of a resource path or self-link
pub fn short_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_normalization() {
        assert_eq!(ResourceState::from_provider("available"), ResourceState::Active);
        assert_eq!(ResourceState::from_provider("Succeeded"), ResourceState::Active);
        assert_eq!(ResourceState::from_provider("pending"), ResourceState::Creating);
        assert_eq!(ResourceState::from_provider("Updating"), ResourceState::Creating);
        assert_eq!(ResourceState::from_provider("Deleting"), ResourceState::Deleting);
        assert_eq!(ResourceState::from_provider("Failed"), ResourceState::Error);
        assert_eq!(ResourceState::from_provider("weird"), ResourceState::Unknown);
    }

    #[test]
    fn test_port_range_rendering() {
        assert_eq!(RuleInfo::new(Direction::Ingress, "tcp").port_range(), None);
        assert_eq!(
            RuleInfo::new(Direction::Ingress, "tcp").ports(22, 22).port_range(),
            Some("22".to_string())
        );
        assert_eq!(
            RuleInfo::new(Direction::Ingress, "tcp").ports(8000, 8080).port_range(),
            Some("8000-8080".to_string())
        );
        assert_eq!(parse_port_range("8000-8080"), Some((8000, 8080)));
        assert_eq!(parse_port_range("443"), Some((443, 443)));
        assert_eq!(parse_port_range("http"), None);
    }

    #[test]
    fn test_rule_validation() {
        assert!(RuleInfo::new(Direction::Ingress, "").validate().is_err());
        assert!(RuleInfo::new(Direction::Ingress, "tcp")
            .ports(90, 80)
            .validate()
            .is_err());
        assert!(RuleInfo::new(Direction::Egress, "udp")
            .ports(53, 53)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_create_requests_require_names() {
        assert!(CreateVpcRequest::new("").validate().is_err());
        assert!(CreateVpcRequest::new("test-vpc").validate().is_ok());
        assert!(CreateSubnetRequest::new("subnet-a", "").validate().is_err());
        assert!(CreateSecurityGroupRequest::new(&"x".repeat(256), "d")
            .validate()
            .is_err());
    }

    #[test]
    fn test_replacement_rules_force_direction() {
        let rules = SecurityGroupRules {
            ingress: vec![RuleInfo::new(Direction::Egress, "tcp")],
            egress: vec![RuleInfo::new(Direction::Ingress, "udp")],
        };
        let ordered = rules.ordered();
        assert_eq!(ordered[0].direction, Direction::Ingress);
        assert_eq!(ordered[1].direction, Direction::Egress);
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("projects/p/global/networks/net-a"), "net-a");
        assert_eq!(short_name("net-a"), "net-a");
    }
}
