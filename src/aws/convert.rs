//! EC2 records to provider-neutral DTOs and back

use super::api::{IpPermission, RouteTable, SecurityGroup, Subnet, Vpc, NAME_TAG};
use crate::error::{NetError, Result};
use crate::model::{
    Direction, NetworkInfo, ResourceState, RuleAction, RuleInfo, SecurityGroupInfo, SubnetInfo,
    Tags,
};

/// EC2 protocol spelling for "every protocol"
const ALL_PROTOCOLS: &str = "-1";

fn name_of(tags: &Tags) -> String {
    tags.get(NAME_TAG).cloned().unwrap_or_default()
}

fn state_of(raw: Option<&str>) -> ResourceState {
    raw.map(ResourceState::from_provider).unwrap_or_default()
}

/// `tags` plus the `Name` tag
pub fn with_name(name: &str, tags: &Tags) -> Tags {
    let mut all = tags.clone();
    if !name.is_empty() {
        all.insert(NAME_TAG.to_string(), name.to_string());
    }
    all
}

pub fn network_info(vpc: &Vpc, region: &str) -> NetworkInfo {
    let mut info = NetworkInfo::new(&vpc.vpc_id, name_of(&vpc.tags));
    info.state = state_of(vpc.state.as_deref());
    info.is_default = vpc.is_default;
    info.region = Some(region.to_string());
    info.cidr = vpc.cidr_block.clone();
    info.tags = vpc.tags.clone();
    info
}

/// A subnet is public when its effective route table (explicit association,
/// else the main table of the VPC) routes through an internet gateway.
pub fn is_public(subnet_id: &str, tables: &[RouteTable]) -> bool {
    let effective = tables
        .iter()
        .find(|t| t.subnet_ids.iter().any(|s| s == subnet_id))
        .or_else(|| tables.iter().find(|t| t.main));

    effective
        .map(|t| t.gateway_ids.iter().any(|g| g.starts_with("igw-")))
        .unwrap_or(false)
}

pub fn subnet_info(subnet: &Subnet, region: &str, tables: &[RouteTable]) -> SubnetInfo {
    let mut info = SubnetInfo::new(
        &subnet.subnet_id,
        name_of(&subnet.tags),
        &subnet.vpc_id,
        &subnet.cidr_block,
    );
    info.availability_zone = subnet.availability_zone.clone();
    info.region = Some(region.to_string());
    info.state = state_of(subnet.state.as_deref());
    info.is_public = is_public(&subnet.subnet_id, tables);
    info.tags = subnet.tags.clone();
    info
}

pub fn security_group_info(group: &SecurityGroup, region: &str) -> SecurityGroupInfo {
    let mut info = SecurityGroupInfo::new(&group.group_id, &group.group_name);
    info.description = group.description.clone();
    info.vpc_id = group.vpc_id.clone().unwrap_or_default();
    info.region = Some(region.to_string());
    info.rules = group
        .ingress
        .iter()
        .map(|p| rule_from_permission(p, Direction::Ingress))
        .chain(
            group
                .egress
                .iter()
                .map(|p| rule_from_permission(p, Direction::Egress)),
        )
        .collect();
    info.tags = group.tags.clone();
    info
}

pub fn rule_from_permission(permission: &IpPermission, direction: Direction) -> RuleInfo {
    let protocol = if permission.protocol == ALL_PROTOCOLS {
        "all".to_string()
    } else {
        permission.protocol.to_lowercase()
    };
    let port = |p: Option<i32>| p.and_then(|p| u16::try_from(p).ok());

    RuleInfo {
        direction,
        action: RuleAction::Allow,
        protocol,
        from_port: port(permission.from_port),
        to_port: port(permission.to_port),
        cidr_blocks: permission.cidr_blocks.clone(),
        source_groups: permission.group_ids.clone(),
        description: permission.description.clone(),
    }
}

/// Security groups only hold allow rules
pub fn permission_from_rule(rule: &RuleInfo) -> Result<IpPermission> {
    rule.validate()?;
    if rule.action == RuleAction::Deny {
        return Err(NetError::validation(
            "AWS security groups only support allow rules",
        ));
    }

    let protocol = match rule.protocol.to_lowercase().as_str() {
        "all" | "-1" | "" => ALL_PROTOCOLS.to_string(),
        other => other.to_string(),
    };
    let (from_port, to_port) = if protocol == ALL_PROTOCOLS {
        (None, None)
    } else {
        (
            rule.from_port.or(rule.to_port).map(i32::from),
            rule.to_port.or(rule.from_port).map(i32::from),
        )
    };

    Ok(IpPermission {
        protocol,
        from_port,
        to_port,
        cidr_blocks: rule.cidr_blocks.clone(),
        group_ids: rule.source_groups.clone(),
        description: rule.description.clone(),
    })
}
