//! Resource abstraction layer
//!
//! Provider handlers implement a small set of traits per resource kind and
//! are registered per provider in a [`ProviderRegistry`]. The dispatcher in
//! [`crate::service`] only talks to these traits, never to a concrete cloud.
//!
//! # Architecture
//!
//! - [`kinds`] - binds each DTO to its kind, scopes, requests and events
//! - [`registry`] - `(provider, kind) -> handler` lookup
//!
//! # Example
//!
//! ```ignore
//! use cloudnet::resource::{HandlerSet, ProviderRegistry, Provider};
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register(Provider::Gcp, HandlerSet::from_shared(gcp_handlers));
//! ```

pub mod kinds;
pub mod registry;

pub use kinds::Resource;
pub use registry::{HandlerSet, ProviderRegistry};

use crate::credential::CredentialData;
use crate::error::{NetError, Result};
use crate::model::{RuleInfo, SecurityGroupInfo, SecurityGroupRules, SecurityGroupScope};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Closed set of cloud backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Gcp,
    Azure,
    Ncp,
}

impl Provider {
    pub const ALL: [Provider; 4] = [Self::Aws, Self::Gcp, Self::Azure, Self::Ncp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Azure => "azure",
            Self::Ncp => "ncp",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "gcp" => Ok(Self::Gcp),
            "azure" => Ok(Self::Azure),
            "ncp" => Ok(Self::Ncp),
            other => Err(NetError::NotSupported(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Vpc,
    Subnet,
    SecurityGroup,
}

impl ResourceKind {
    /// Identifier used in cache keys and event types
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::SecurityGroup => "security-group",
        }
    }

    /// Collection segment of the audit resource path
    pub fn path_segment(&self) -> &'static str {
        match self {
            Self::Vpc => "vpcs",
            Self::Subnet => "subnets",
            Self::SecurityGroup => "security-groups",
        }
    }

    /// Prefix of audit action names
    pub fn action_prefix(&self) -> &'static str {
        match self {
            Self::Vpc => "vpc",
            Self::Subnet => "subnet",
            Self::SecurityGroup => "security_group",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verb {
    List,
    Get,
    Create,
    Update,
    Delete,
    AddRule,
    RemoveRule,
    ReplaceRules,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::AddRule => "add-rule",
            Self::RemoveRule => "remove-rule",
            Self::ReplaceRules => "replace-rules",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call inputs handed to a provider handler
pub struct CallContext<'a> {
    pub credential_id: Uuid,
    pub secrets: &'a CredentialData,
    pub cancel: &'a CancellationToken,
}

/// Identifies which provider a handler serves
pub trait ProviderHandler: Send + Sync {
    fn provider(&self) -> Provider;
}

/// A resource removed together with the one being deleted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependent {
    pub kind: ResourceKind,
    /// Canonical id, as reported in the DTOs
    pub id: String,
}

impl Dependent {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// CRUD for one resource kind on one provider.
///
/// Every verb defaults to `NotImplemented`, so a provider only overrides
/// what it actually supports.
#[async_trait]
pub trait ResourceHandler<R: Resource>: ProviderHandler {
    /// The id form this provider reports in its DTOs. Providers that
    /// accept short names or links expand them here so every alias lands
    /// on the same cache entry.
    fn canonical_id(&self, _cx: &CallContext<'_>, _scope: &R::Scope, id: &str) -> Result<String> {
        Ok(id.to_string())
    }

    async fn list(&self, _cx: &CallContext<'_>, _scope: &R::Scope) -> Result<Vec<R>> {
        Err(NetError::not_implemented(self.provider(), R::KIND, Verb::List))
    }

    async fn get(&self, _cx: &CallContext<'_>, _scope: &R::Scope, _id: &str) -> Result<R> {
        Err(NetError::not_implemented(self.provider(), R::KIND, Verb::Get))
    }

    async fn create(
        &self,
        _cx: &CallContext<'_>,
        _scope: &R::Scope,
        _request: &R::Create,
    ) -> Result<R> {
        Err(NetError::not_implemented(self.provider(), R::KIND, Verb::Create))
    }

    async fn update(
        &self,
        _cx: &CallContext<'_>,
        _scope: &R::Scope,
        _id: &str,
        _request: &R::Update,
    ) -> Result<R> {
        Err(NetError::not_implemented(self.provider(), R::KIND, Verb::Update))
    }

    /// Returns the dependents removed on the way (cascading deletes)
    async fn delete(
        &self,
        _cx: &CallContext<'_>,
        _scope: &R::Scope,
        _id: &str,
    ) -> Result<Vec<Dependent>> {
        Err(NetError::not_implemented(self.provider(), R::KIND, Verb::Delete))
    }
}

/// How a provider can change the rules of an existing security group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMutation {
    Unsupported,
    /// Rules are added and removed one at a time; replacing all is not atomic
    Incremental,
    /// A single call can replace the full rule set
    AtomicReplace,
}

/// Security-group rule mutation
#[async_trait]
pub trait RuleHandler: ProviderHandler {
    fn rule_mutation(&self) -> RuleMutation {
        RuleMutation::Unsupported
    }

    async fn add_rule(
        &self,
        _cx: &CallContext<'_>,
        _scope: &SecurityGroupScope,
        _group_id: &str,
        _rule: &RuleInfo,
    ) -> Result<SecurityGroupInfo> {
        Err(NetError::not_implemented(
            self.provider(),
            ResourceKind::SecurityGroup,
            Verb::AddRule,
        ))
    }

    async fn remove_rule(
        &self,
        _cx: &CallContext<'_>,
        _scope: &SecurityGroupScope,
        _group_id: &str,
        _rule: &RuleInfo,
    ) -> Result<SecurityGroupInfo> {
        Err(NetError::not_implemented(
            self.provider(),
            ResourceKind::SecurityGroup,
            Verb::RemoveRule,
        ))
    }

    /// Only called when `rule_mutation()` is `AtomicReplace`
    async fn replace_rules(
        &self,
        _cx: &CallContext<'_>,
        _scope: &SecurityGroupScope,
        _group_id: &str,
        _rules: &SecurityGroupRules,
    ) -> Result<SecurityGroupInfo> {
        Err(NetError::not_implemented(
            self.provider(),
            ResourceKind::SecurityGroup,
            Verb::ReplaceRules,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("AWS".parse::<Provider>().unwrap(), Provider::Aws);
        assert_eq!(" gcp ".parse::<Provider>().unwrap(), Provider::Gcp);
        let err = "oracle".parse::<Provider>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn test_kind_identifiers() {
        assert_eq!(ResourceKind::SecurityGroup.as_str(), "security-group");
        assert_eq!(ResourceKind::SecurityGroup.path_segment(), "security-groups");
        assert_eq!(ResourceKind::SecurityGroup.action_prefix(), "security_group");
    }
}
