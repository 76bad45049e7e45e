//! Side-effect emitters
//!
//! After every successful mutation the dispatcher publishes one
//! [`ResourceEvent`] and writes one [`AuditEntry`]. Both collaborators are
//! fire-and-forget: their failures are logged and never reach the caller.

use crate::model::ResourceState;
use crate::resource::{Provider, ResourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const EVENT_DOMAIN: &str = "network";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventVerb {
    Created,
    Updated,
    Deleted,
}

impl EventVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcEvent {
    pub vpc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ResourceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetEvent {
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_block: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupEvent {
    pub security_group_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_count: Option<usize>,
}

/// Typed payload, one variant per resource category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum EventPayload {
    Vpc(VpcEvent),
    Subnet(SubnetEvent),
    SecurityGroup(SecurityGroupEvent),
}

impl EventPayload {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Vpc(_) => ResourceKind::Vpc,
            Self::Subnet(_) => ResourceKind::Subnet,
            Self::SecurityGroup(_) => ResourceKind::SecurityGroup,
        }
    }

    pub fn resource_id(&self) -> &str {
        match self {
            Self::Vpc(e) => &e.vpc_id,
            Self::Subnet(e) => &e.subnet_id,
            Self::SecurityGroup(e) => &e.security_group_id,
        }
    }
}

/// Event envelope handed to the publisher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub id: Uuid,
    pub provider: Provider,
    pub credential_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub verb: EventVerb,
    pub occurred_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl ResourceEvent {
    pub fn new(
        provider: Provider,
        credential_id: Uuid,
        region: Option<String>,
        verb: EventVerb,
        payload: EventPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            credential_id,
            region,
            verb,
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// `network.{resource}.{provider}.{verb}`
    pub fn event_type(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            EVENT_DOMAIN,
            self.payload.kind().as_str(),
            self.provider.as_str(),
            self.verb.as_str()
        )
    }
}

/// One audit log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Caller identity, `anonymous` when unknown
    pub actor: String,
    /// e.g. `vpc.create`, `security_group.rule.add`
    pub action: String,
    /// e.g. `POST /api/v1/aws/networks/vpcs`
    pub resource_path: String,
    pub details: serde_json::Value,
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} by {}", self.action, self.resource_path, self.actor)
    }
}

/// Event-bus collaborator
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &ResourceEvent) -> anyhow::Result<()>;
}

/// Audit log collaborator
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log_action(&self, entry: &AuditEntry) -> anyhow::Result<()>;
}

/// Emits events as structured tracing records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, event: &ResourceEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&event.payload)?;
        tracing::info!(
            target: "cloudnet::events",
            event_id = %event.id,
            event_type = %event.event_type(),
            credential_id = %event.credential_id,
            region = event.region.as_deref().unwrap_or(""),
            payload = %payload,
            "event published"
        );
        Ok(())
    }
}

/// Writes audit entries as structured tracing records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log_action(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        tracing::info!(
            target: "cloudnet::audit",
            actor = %entry.actor,
            action = %entry.action,
            path = %entry.resource_path,
            details = %entry.details,
            "audit"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_format() {
        let event = ResourceEvent::new(
            Provider::Aws,
            Uuid::nil(),
            Some("us-east-1".into()),
            EventVerb::Created,
            EventPayload::Vpc(VpcEvent {
                vpc_id: "vpc-1".into(),
                name: Some("test-vpc".into()),
                state: Some(ResourceState::Active),
                cidr: Some("10.0.0.0/16".into()),
            }),
        );
        assert_eq!(event.event_type(), "network.vpc.aws.created");
        assert_eq!(event.payload.resource_id(), "vpc-1");
    }

    #[test]
    fn test_security_group_event_type() {
        let event = ResourceEvent::new(
            Provider::Gcp,
            Uuid::nil(),
            None,
            EventVerb::Deleted,
            EventPayload::SecurityGroup(SecurityGroupEvent {
                security_group_id: "fw-1".into(),
                name: None,
                vpc_id: None,
                rule_count: None,
            }),
        );
        assert_eq!(event.event_type(), "network.security-group.gcp.deleted");
    }

    #[test]
    fn test_payload_serializes_with_resource_tag() {
        let payload = EventPayload::Subnet(SubnetEvent {
            subnet_id: "subnet-1".into(),
            vpc_id: Some("vpc-1".into()),
            name: None,
            cidr_block: Some("10.0.1.0/24".into()),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["resource"], "subnet");
        assert_eq!(json["cidr_block"], "10.0.1.0/24");
        assert!(json.get("name").is_none());
    }
}
