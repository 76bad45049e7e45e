//! Compute Engine shapes <-> neutral DTOs

use super::client::{region_from, GcpClient};
use super::compute::{Firewall, FirewallEntry, Network, Subnetwork};
use crate::error::{NetError, Result};
use crate::model::{
    parse_port_range, short_name, CreateSecurityGroupRequest, Direction, NetworkInfo,
    ResourceState, RuleAction, RuleInfo, SecurityGroupInfo, SecurityGroupRules, SubnetInfo,
};
use chrono::{DateTime, Utc};

pub const DEFAULT_ROUTING_MODE: &str = "REGIONAL";
pub const DEFAULT_MTU: u32 = 1460;
pub const DEFAULT_FIREWALL_PRIORITY: u32 = 1000;
const ANY_IPV4: &str = "0.0.0.0/0";

/// `projects/...` part of a self link, or the input when it has none
pub fn canonical_path(link: &str) -> &str {
    match link.find("projects/") {
        Some(idx) => &link[idx..],
        None => link,
    }
}

pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

fn network_ref(client: &GcpClient, network: &str) -> String {
    if network.contains("projects/") {
        canonical_path(network).to_string()
    } else {
        client.network_path(short_name(network))
    }
}

pub fn network_info(client: &GcpClient, network: &Network) -> NetworkInfo {
    let mut info = NetworkInfo::new(client.network_path(&network.name), network.name.clone());
    info.state = ResourceState::Active;
    info.is_default = network.name == "default";
    info.cidr = network.ipv4_range.clone();
    info.description = network.description.clone().filter(|d| !d.is_empty());
    info.routing_mode = network
        .routing_config
        .as_ref()
        .and_then(|c| c.routing_mode.clone());
    info.mtu = network.mtu;
    info.auto_create_subnetworks = network.auto_create_subnetworks;
    info.created_at = parse_timestamp(network.creation_timestamp.as_deref());
    info
}

pub fn subnet_info(client: &GcpClient, subnet: &Subnetwork) -> SubnetInfo {
    let region = subnet.region.as_deref().map(region_from).unwrap_or_default();
    let mut info = SubnetInfo::new(
        client.subnetwork_path(region, &subnet.name),
        subnet.name.clone(),
        network_ref(client, &subnet.network),
        subnet.ip_cidr_range.clone(),
    );
    info.region = (!region.is_empty()).then(|| region.to_string());
    info.state = ResourceState::from_provider(subnet.state.as_deref().unwrap_or("READY"));
    info.is_public = false;
    info.description = subnet.description.clone().filter(|d| !d.is_empty());
    info.gateway_address = subnet.gateway_address.clone();
    info.private_ip_google_access = subnet.private_ip_google_access;
    info.created_at = parse_timestamp(subnet.creation_timestamp.as_deref());
    info
}

pub fn security_group_info(
    client: &GcpClient,
    firewall: &Firewall,
    region: Option<&str>,
) -> SecurityGroupInfo {
    let mut info = SecurityGroupInfo::new(client.firewall_path(&firewall.name), firewall.name.clone());
    info.description = firewall.description.clone().unwrap_or_default();
    info.vpc_id = network_ref(client, &firewall.network);
    info.region = Some(region.filter(|r| !r.is_empty()).unwrap_or("global").to_string());
    info.rules = firewall_rules(firewall);
    info.created_at = parse_timestamp(firewall.creation_timestamp.as_deref());
    if let Some(priority) = firewall.priority {
        info.tags.insert("priority".into(), priority.to_string());
    }
    if let Some(direction) = &firewall.direction {
        info.tags.insert("direction".into(), direction.clone());
    }
    info
}

pub fn firewall_direction(firewall: &Firewall) -> Direction {
    match firewall.direction.as_deref() {
        Some(d) if d.eq_ignore_ascii_case("EGRESS") => Direction::Egress,
        _ => Direction::Ingress,
    }
}

fn direction_label(direction: Direction) -> &'static str {
    match direction {
        Direction::Ingress => "INGRESS",
        Direction::Egress => "EGRESS",
    }
}

/// One rule per port entry of every `allowed` / `denied` block
pub fn firewall_rules(firewall: &Firewall) -> Vec<RuleInfo> {
    let direction = firewall_direction(firewall);
    let ranges = match direction {
        Direction::Ingress => &firewall.source_ranges,
        Direction::Egress => &firewall.destination_ranges,
    };

    let blocks = firewall
        .allowed
        .iter()
        .map(|e| (RuleAction::Allow, e))
        .chain(firewall.denied.iter().map(|e| (RuleAction::Deny, e)));

    let mut rules = Vec::new();
    for (action, entry) in blocks {
        let template = RuleInfo {
            direction,
            action,
            protocol: entry.ip_protocol.to_lowercase(),
            from_port: None,
            to_port: None,
            cidr_blocks: ranges.clone(),
            source_groups: firewall.source_tags.clone(),
            description: firewall.description.clone().filter(|d| !d.is_empty()),
        };

        if entry.ports.is_empty() {
            rules.push(template);
            continue;
        }
        for port in &entry.ports {
            let mut rule = template.clone();
            if let Some((from, to)) = parse_port_range(port) {
                rule.from_port = Some(from);
                rule.to_port = Some(to);
            }
            rules.push(rule);
        }
    }
    rules
}

fn entries_mut(firewall: &mut Firewall, action: RuleAction) -> &mut Vec<FirewallEntry> {
    match action {
        RuleAction::Allow => &mut firewall.allowed,
        RuleAction::Deny => &mut firewall.denied,
    }
}

fn ranges_mut(firewall: &mut Firewall, direction: Direction) -> &mut Vec<String> {
    match direction {
        Direction::Ingress => &mut firewall.source_ranges,
        Direction::Egress => &mut firewall.destination_ranges,
    }
}

fn merge_entry(entries: &mut Vec<FirewallEntry>, protocol: &str, port: Option<String>) {
    match entries
        .iter_mut()
        .find(|e| e.ip_protocol.eq_ignore_ascii_case(protocol))
    {
        // An entry without ports already covers every port
        Some(entry) if entry.ports.is_empty() => {}
        Some(entry) => match port {
            Some(port) if !entry.ports.contains(&port) => entry.ports.push(port),
            Some(_) => {}
            None => entry.ports.clear(),
        },
        None => entries.push(FirewallEntry {
            ip_protocol: protocol.to_string(),
            ports: port.into_iter().collect(),
        }),
    }
}

fn merge_ranges(ranges: &mut Vec<String>, blocks: &[String]) {
    for block in blocks {
        if !ranges.contains(block) {
            ranges.push(block.clone());
        }
    }
}

fn check_direction(firewall: &Firewall, rule: &RuleInfo) -> Result<()> {
    let direction = firewall_direction(firewall);
    if rule.direction != direction {
        return Err(NetError::validation(format!(
            "firewall {} is {}, cannot hold a {} rule",
            firewall.name,
            direction.as_str(),
            rule.direction.as_str()
        )));
    }
    Ok(())
}

pub fn add_rule(firewall: &mut Firewall, rule: &RuleInfo) -> Result<()> {
    check_direction(firewall, rule)?;
    let protocol = rule.protocol.to_lowercase();
    merge_entry(entries_mut(firewall, rule.action), &protocol, rule.port_range());
    merge_ranges(ranges_mut(firewall, rule.direction), &rule.cidr_blocks);
    Ok(())
}

pub fn remove_rule(firewall: &mut Firewall, rule: &RuleInfo) -> Result<()> {
    check_direction(firewall, rule)?;
    let name = firewall.name.clone();
    let protocol = rule.protocol.to_lowercase();
    let port = rule.port_range();
    let entries = entries_mut(firewall, rule.action);

    let Some(idx) = entries
        .iter()
        .position(|e| e.ip_protocol.eq_ignore_ascii_case(&protocol))
    else {
        return Err(NetError::validation(format!(
            "firewall {} has no {} rule",
            name, protocol
        )));
    };

    match port {
        Some(port) if !entries[idx].ports.is_empty() => {
            let before = entries[idx].ports.len();
            entries[idx].ports.retain(|p| p != &port);
            if entries[idx].ports.len() == before {
                return Err(NetError::validation(format!(
                    "firewall {} has no {} rule on port {}",
                    name, protocol, port
                )));
            }
            if entries[idx].ports.is_empty() {
                entries.remove(idx);
            }
        }
        _ => {
            entries.remove(idx);
        }
    }

    if firewall.allowed.is_empty() && firewall.denied.is_empty() {
        return Err(NetError::validation(format!(
            "cannot remove the last rule of firewall {}; delete the firewall instead",
            name
        )));
    }
    Ok(())
}

/// Swap the full rule set. A firewall has a single direction, so mixed
/// sets are rejected.
pub fn replace_rules(firewall: &mut Firewall, rules: &SecurityGroupRules) -> Result<()> {
    let direction = match (rules.ingress.is_empty(), rules.egress.is_empty()) {
        (false, false) => {
            return Err(NetError::validation(
                "a GCP firewall holds either ingress or egress rules, not both",
            ))
        }
        (true, true) => {
            return Err(NetError::validation(format!(
                "firewall {} needs at least one rule",
                firewall.name
            )))
        }
        (false, true) => Direction::Ingress,
        (true, false) => Direction::Egress,
    };

    firewall.direction = Some(direction_label(direction).to_string());
    firewall.allowed.clear();
    firewall.denied.clear();
    ranges_mut(firewall, direction).clear();

    for rule in rules.ordered() {
        let protocol = rule.protocol.to_lowercase();
        merge_entry(entries_mut(firewall, rule.action), &protocol, rule.port_range());
        merge_ranges(ranges_mut(firewall, direction), &rule.cidr_blocks);
    }
    Ok(())
}

/// Firewall body for a create request; the direction follows the rules
pub fn new_firewall(
    client: &GcpClient,
    vpc: &str,
    request: &CreateSecurityGroupRequest,
) -> Result<Firewall> {
    let ingress: Vec<RuleInfo> = request
        .rules
        .iter()
        .filter(|r| r.direction == Direction::Ingress)
        .cloned()
        .collect();
    let egress: Vec<RuleInfo> = request
        .rules
        .iter()
        .filter(|r| r.direction == Direction::Egress)
        .cloned()
        .collect();

    let mut firewall = Firewall {
        name: request.name.clone(),
        description: Some(request.description.clone()).filter(|d| !d.is_empty()),
        network: network_ref(client, vpc),
        priority: Some(request.priority.unwrap_or(DEFAULT_FIREWALL_PRIORITY)),
        target_tags: request.target_tags.clone(),
        ..Firewall::default()
    };
    replace_rules(&mut firewall, &SecurityGroupRules { ingress, egress })?;

    if firewall_direction(&firewall) == Direction::Ingress && firewall.source_ranges.is_empty() {
        firewall.source_ranges.push(ANY_IPV4.to_string());
    }
    Ok(firewall)
}
