//! ARM models to provider-neutral DTOs

use super::client::AzureClient;
use super::models::{
    NetworkSecurityGroup, SecurityRule, SecurityRuleProperties, Subnet, VirtualNetwork,
};
use crate::error::{NetError, Result};
use crate::model::{
    parse_port_range, Direction, NetworkInfo, ResourceState, RuleAction, RuleInfo,
    SecurityGroupInfo, SubnetInfo,
};

/// First priority handed to rules created with a security group
const FIRST_RULE_PRIORITY: u32 = 100;
const RULE_PRIORITY_STEP: u32 = 10;

const ANY: &str = "*";

fn state_of(raw: Option<&str>) -> ResourceState {
    raw.map(ResourceState::from_provider).unwrap_or_default()
}

/// ARM id of the virtual network owning a subnet id
pub fn vnet_of_subnet(subnet_id: &str) -> Option<&str> {
    subnet_id
        .find("/subnets/")
        .map(|index| &subnet_id[..index])
}

pub fn network_info(client: &AzureClient, vnet: &VirtualNetwork) -> NetworkInfo {
    let id = vnet
        .id
        .clone()
        .unwrap_or_else(|| client.resource_id(&format!("virtualNetworks/{}", vnet.name)));
    let mut info = NetworkInfo::new(id, &vnet.name);
    info.state = state_of(vnet.properties.provisioning_state.as_deref());
    info.region = Some(vnet.location.clone()).filter(|l| !l.is_empty());
    info.cidr = vnet
        .properties
        .address_space
        .as_ref()
        .and_then(|space| space.address_prefixes.first().cloned());
    info.tags = vnet.tags.clone();
    info
}

pub fn subnet_info(client: &AzureClient, vnet: &str, subnet: &Subnet, region: &str) -> SubnetInfo {
    let id = subnet.id.clone().unwrap_or_else(|| {
        client.resource_id(&format!("virtualNetworks/{}/subnets/{}", vnet, subnet.name))
    });
    let vpc_id = vnet_of_subnet(&id)
        .map(str::to_string)
        .unwrap_or_else(|| client.resource_id(&format!("virtualNetworks/{}", vnet)));
    let cidr = subnet
        .properties
        .address_prefix
        .clone()
        .or_else(|| subnet.properties.address_prefixes.first().cloned())
        .unwrap_or_default();

    let mut info = SubnetInfo::new(id, &subnet.name, vpc_id, cidr);
    info.state = state_of(subnet.properties.provisioning_state.as_deref());
    info.region = Some(region.to_string()).filter(|r| !r.is_empty());
    info
}

pub fn security_group_info(client: &AzureClient, nsg: &NetworkSecurityGroup) -> SecurityGroupInfo {
    let id = nsg
        .id
        .clone()
        .unwrap_or_else(|| client.resource_id(&format!("networkSecurityGroups/{}", nsg.name)));
    let mut info = SecurityGroupInfo::new(id, &nsg.name);
    info.vpc_id = nsg
        .properties
        .subnets
        .iter()
        .find_map(|s| vnet_of_subnet(&s.id))
        .unwrap_or_default()
        .to_string();
    info.region = Some(nsg.location.clone()).filter(|l| !l.is_empty());
    info.rules = nsg.properties.security_rules.iter().map(rule_from).collect();
    info.tags = nsg.tags.clone();
    info
}

fn prefixes(single: Option<&String>, many: &[String]) -> Vec<String> {
    single
        .into_iter()
        .chain(many.iter())
        .map(|p| if p == ANY { "0.0.0.0/0".to_string() } else { p.clone() })
        .collect()
}

pub fn rule_from(rule: &SecurityRule) -> RuleInfo {
    let p = &rule.properties;
    let direction = if p.direction.eq_ignore_ascii_case("outbound") {
        Direction::Egress
    } else {
        Direction::Ingress
    };
    let protocol = if p.protocol == ANY {
        "all".to_string()
    } else {
        p.protocol.to_lowercase()
    };
    let ports = p
        .destination_port_range
        .as_deref()
        .filter(|r| *r != ANY)
        .and_then(parse_port_range);
    let cidr_blocks = match direction {
        Direction::Ingress => prefixes(p.source_address_prefix.as_ref(), &p.source_address_prefixes),
        Direction::Egress => prefixes(
            p.destination_address_prefix.as_ref(),
            &p.destination_address_prefixes,
        ),
    };

    RuleInfo {
        direction,
        action: if p.access.eq_ignore_ascii_case("deny") {
            RuleAction::Deny
        } else {
            RuleAction::Allow
        },
        protocol,
        from_port: ports.map(|(from, _)| from),
        to_port: ports.map(|(_, to)| to),
        cidr_blocks,
        source_groups: Vec::new(),
        description: p.description.clone(),
    }
}

/// NSG rules for a create request; priorities count up per direction
pub fn security_rules(rules: &[RuleInfo]) -> Result<Vec<SecurityRule>> {
    let mut next_priority = [FIRST_RULE_PRIORITY, FIRST_RULE_PRIORITY];
    let mut out = Vec::with_capacity(rules.len());

    for rule in rules {
        rule.validate()?;
        if !rule.source_groups.is_empty() {
            return Err(NetError::validation(
                "Azure security rules do not support source groups",
            ));
        }

        let slot = match rule.direction {
            Direction::Ingress => 0,
            Direction::Egress => 1,
        };
        let priority = next_priority[slot];
        next_priority[slot] += RULE_PRIORITY_STEP;

        let protocol = match rule.protocol.to_lowercase().as_str() {
            "all" | "-1" | "" => ANY.to_string(),
            "tcp" => "Tcp".to_string(),
            "udp" => "Udp".to_string(),
            "icmp" => "Icmp".to_string(),
            other => other.to_string(),
        };
        let remote = if rule.cidr_blocks.is_empty() {
            vec![ANY.to_string()]
        } else {
            rule.cidr_blocks.clone()
        };
        let local = ANY.to_string();

        let mut properties = SecurityRuleProperties {
            protocol,
            access: match rule.action {
                RuleAction::Allow => "Allow".to_string(),
                RuleAction::Deny => "Deny".to_string(),
            },
            direction: match rule.direction {
                Direction::Ingress => "Inbound".to_string(),
                Direction::Egress => "Outbound".to_string(),
            },
            priority,
            description: rule.description.clone(),
            source_port_range: Some(ANY.to_string()),
            destination_port_range: Some(rule.port_range().unwrap_or_else(|| ANY.to_string())),
            ..SecurityRuleProperties::default()
        };
        match rule.direction {
            Direction::Ingress => {
                properties.source_address_prefixes = remote;
                properties.destination_address_prefix = Some(local);
            }
            Direction::Egress => {
                properties.destination_address_prefixes = remote;
                properties.source_address_prefix = Some(local);
            }
        }

        out.push(SecurityRule {
            name: format!("{}-{}", rule.direction.as_str(), priority),
            properties,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vnet_of_subnet() {
        assert_eq!(
            vnet_of_subnet("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/core/subnets/web"),
            Some("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/core")
        );
        assert_eq!(vnet_of_subnet("core"), None);
    }

    #[test]
    fn test_rules_get_increasing_priorities_per_direction() {
        let rules = vec![
            RuleInfo::new(Direction::Ingress, "tcp").ports(22, 22).cidr("10.0.0.0/8"),
            RuleInfo::new(Direction::Egress, "all"),
            RuleInfo::new(Direction::Ingress, "tcp").ports(8000, 8080),
        ];
        let converted = security_rules(&rules).unwrap();
        let priorities: Vec<u32> = converted.iter().map(|r| r.properties.priority).collect();
        assert_eq!(priorities, vec![100, 100, 110]);
        assert_eq!(converted[1].properties.protocol, "*");
        assert_eq!(
            converted[2].properties.destination_port_range.as_deref(),
            Some("8000-8080")
        );
    }

    #[test]
    fn test_inbound_rule_normalization() {
        let rule = SecurityRule {
            name: "ssh".into(),
            properties: SecurityRuleProperties {
                protocol: "Tcp".into(),
                access: "Allow".into(),
                direction: "Inbound".into(),
                priority: 100,
                destination_port_range: Some("22".into()),
                source_address_prefix: Some("*".into()),
                ..SecurityRuleProperties::default()
            },
        };
        let info = rule_from(&rule);
        assert_eq!(info.direction, Direction::Ingress);
        assert_eq!(info.protocol, "tcp");
        assert_eq!((info.from_port, info.to_port), (Some(22), Some(22)));
        assert_eq!(info.cidr_blocks, vec!["0.0.0.0/0".to_string()]);
    }
}
