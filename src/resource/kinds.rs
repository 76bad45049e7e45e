//! Per-kind bindings
//!
//! [`Resource`] ties a DTO to its scope and request types, its cache scopes
//! and its event payload. The dispatcher is generic over it.

use super::{CallContext, HandlerSet, Provider, ResourceHandler, ResourceKind};
use crate::error::{NetError, Result};
use crate::events::{EventPayload, SecurityGroupEvent, SubnetEvent, VpcEvent};
use crate::model::{
    short_name, CreateSecurityGroupRequest, CreateSubnetRequest, CreateVpcRequest, NetworkInfo,
    SecurityGroupInfo, SecurityGroupScope, SubnetInfo, SubnetScope, UpdateSecurityGroupRequest,
    UpdateSubnetRequest, UpdateVpcRequest, VpcScope,
};
use crate::query::Listable;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;

/// Scope used for GCP resources that are not regional
pub const GLOBAL_SCOPE: &str = "global";

pub trait Resource:
    Clone + Debug + Serialize + DeserializeOwned + Listable + Send + Sync + 'static
{
    const KIND: ResourceKind;

    type Scope: Debug + Send + Sync;
    type Create: Send + Sync;
    type Update: Send + Sync;

    fn id(&self) -> &str;

    /// Cache scope of the collection this resource is listed in
    fn list_scope(scope: &Self::Scope, provider: Provider) -> Result<String>;

    /// `list_scope` with any id in it expanded to its canonical form
    fn cache_scope(
        _set: &HandlerSet,
        _cx: &CallContext<'_>,
        scope: &Self::Scope,
        provider: Provider,
    ) -> Result<String> {
        Self::list_scope(scope, provider)
    }

    /// Collections of other kinds that can hold dependents of resource `id`
    fn dependent_lists(
        _scope: &Self::Scope,
        _id: &str,
        _provider: Provider,
    ) -> Vec<(ResourceKind, String)> {
        Vec::new()
    }

    /// Collection scope derived from the resource itself, when it has a parent
    fn parent_scope(&self) -> Option<String> {
        None
    }

    /// Narrowing applied after cache resolution
    fn in_scope(&self, _scope: &Self::Scope) -> bool {
        true
    }

    fn region(scope: &Self::Scope) -> Option<&str>;

    fn handler(set: &HandlerSet) -> &Arc<dyn ResourceHandler<Self>>;

    fn validate_create(request: &Self::Create) -> Result<()>;

    fn event_payload(&self) -> EventPayload;

    fn deleted_payload(scope: &Self::Scope, id: &str) -> EventPayload;
}

fn regional_scope(region: &str, resource_group: Option<&str>, provider: Provider) -> String {
    if provider == Provider::Gcp {
        return GLOBAL_SCOPE.to_string();
    }
    match resource_group {
        Some(group) if !group.is_empty() => format!("{}/{}", region, group),
        _ => region.to_string(),
    }
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

impl Resource for NetworkInfo {
    const KIND: ResourceKind = ResourceKind::Vpc;

    type Scope = VpcScope;
    type Create = CreateVpcRequest;
    type Update = UpdateVpcRequest;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_scope(scope: &VpcScope, provider: Provider) -> Result<String> {
        Ok(regional_scope(
            &scope.region,
            scope.resource_group.as_deref(),
            provider,
        ))
    }

    /// Subnets are listed per VPC; security groups share the VPC's region
    fn dependent_lists(scope: &VpcScope, id: &str, provider: Provider) -> Vec<(ResourceKind, String)> {
        vec![
            (ResourceKind::Subnet, id.to_string()),
            (
                ResourceKind::SecurityGroup,
                regional_scope(&scope.region, scope.resource_group.as_deref(), provider),
            ),
        ]
    }

    fn region(scope: &VpcScope) -> Option<&str> {
        non_empty(&scope.region)
    }

    fn handler(set: &HandlerSet) -> &Arc<dyn ResourceHandler<Self>> {
        &set.vpcs
    }

    fn validate_create(request: &CreateVpcRequest) -> Result<()> {
        request.validate()
    }

    fn event_payload(&self) -> EventPayload {
        EventPayload::Vpc(VpcEvent {
            vpc_id: self.id.clone(),
            name: Some(self.name.clone()),
            state: Some(self.state),
            cidr: self.cidr.clone(),
        })
    }

    fn deleted_payload(_scope: &VpcScope, id: &str) -> EventPayload {
        EventPayload::Vpc(VpcEvent {
            vpc_id: id.to_string(),
            name: None,
            state: None,
            cidr: None,
        })
    }
}

impl Resource for SubnetInfo {
    const KIND: ResourceKind = ResourceKind::Subnet;

    type Scope = SubnetScope;
    type Create = CreateSubnetRequest;
    type Update = UpdateSubnetRequest;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_scope(scope: &SubnetScope, _provider: Provider) -> Result<String> {
        if scope.vpc_id.trim().is_empty() {
            return Err(NetError::validation("vpc_id is required"));
        }
        Ok(scope.vpc_id.clone())
    }

    /// Keyed by the VPC id the subnets themselves report
    fn cache_scope(
        set: &HandlerSet,
        cx: &CallContext<'_>,
        scope: &SubnetScope,
        provider: Provider,
    ) -> Result<String> {
        let vpc_id = Self::list_scope(scope, provider)?;
        set.vpcs.canonical_id(cx, &scope.vpc_scope(), &vpc_id)
    }

    fn parent_scope(&self) -> Option<String> {
        non_empty(&self.vpc_id).map(str::to_string)
    }

    fn region(scope: &SubnetScope) -> Option<&str> {
        non_empty(&scope.region)
    }

    fn handler(set: &HandlerSet) -> &Arc<dyn ResourceHandler<Self>> {
        &set.subnets
    }

    fn validate_create(request: &CreateSubnetRequest) -> Result<()> {
        request.validate()
    }

    fn event_payload(&self) -> EventPayload {
        EventPayload::Subnet(SubnetEvent {
            subnet_id: self.id.clone(),
            vpc_id: Some(self.vpc_id.clone()),
            name: Some(self.name.clone()),
            cidr_block: Some(self.cidr_block.clone()),
        })
    }

    fn deleted_payload(scope: &SubnetScope, id: &str) -> EventPayload {
        EventPayload::Subnet(SubnetEvent {
            subnet_id: id.to_string(),
            vpc_id: non_empty(&scope.vpc_id).map(str::to_string),
            name: None,
            cidr_block: None,
        })
    }
}

impl Resource for SecurityGroupInfo {
    const KIND: ResourceKind = ResourceKind::SecurityGroup;

    type Scope = SecurityGroupScope;
    type Create = CreateSecurityGroupRequest;
    type Update = UpdateSecurityGroupRequest;

    fn id(&self) -> &str {
        &self.id
    }

    fn list_scope(scope: &SecurityGroupScope, provider: Provider) -> Result<String> {
        Ok(regional_scope(
            &scope.region,
            scope.resource_group.as_deref(),
            provider,
        ))
    }

    /// Accepts either a full network path or its short name
    fn in_scope(&self, scope: &SecurityGroupScope) -> bool {
        match scope.vpc_id.as_deref() {
            None | Some("") => true,
            Some(vpc) => self.vpc_id == vpc || short_name(&self.vpc_id) == short_name(vpc),
        }
    }

    fn region(scope: &SecurityGroupScope) -> Option<&str> {
        non_empty(&scope.region)
    }

    fn handler(set: &HandlerSet) -> &Arc<dyn ResourceHandler<Self>> {
        &set.security_groups
    }

    fn validate_create(request: &CreateSecurityGroupRequest) -> Result<()> {
        request.validate()
    }

    fn event_payload(&self) -> EventPayload {
        EventPayload::SecurityGroup(SecurityGroupEvent {
            security_group_id: self.id.clone(),
            name: Some(self.name.clone()),
            vpc_id: non_empty(&self.vpc_id).map(str::to_string),
            rule_count: Some(self.rules.len()),
        })
    }

    fn deleted_payload(scope: &SecurityGroupScope, id: &str) -> EventPayload {
        EventPayload::SecurityGroup(SecurityGroupEvent {
            security_group_id: id.to_string(),
            name: None,
            vpc_id: scope.vpc_id.clone(),
            rule_count: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gcp_vpc_scope_is_global() {
        let scope = VpcScope::region("us-central1");
        assert_eq!(
            NetworkInfo::list_scope(&scope, Provider::Gcp).unwrap(),
            "global"
        );
        assert_eq!(
            NetworkInfo::list_scope(&scope, Provider::Aws).unwrap(),
            "us-central1"
        );
    }

    #[test]
    fn test_azure_scope_includes_resource_group() {
        let scope = SecurityGroupScope::region("westeurope").with_resource_group("rg-net");
        assert_eq!(
            SecurityGroupInfo::list_scope(&scope, Provider::Azure).unwrap(),
            "westeurope/rg-net"
        );
    }

    #[test]
    fn test_subnet_scope_requires_vpc() {
        assert!(SubnetInfo::list_scope(&SubnetScope::default(), Provider::Aws).is_err());
        assert_eq!(
            SubnetInfo::list_scope(&SubnetScope::new("vpc-1", "us-east-1"), Provider::Aws)
                .unwrap(),
            "vpc-1"
        );
    }

    #[test]
    fn test_security_group_vpc_narrowing_accepts_short_names() {
        let mut group = SecurityGroupInfo::new("fw-ssh", "fw-ssh");
        group.vpc_id = "projects/p/global/networks/prod".into();

        assert!(group.in_scope(&SecurityGroupScope::region("global")));
        assert!(group.in_scope(&SecurityGroupScope::region("global").in_vpc("prod")));
        assert!(!group.in_scope(&SecurityGroupScope::region("global").in_vpc("staging")));
    }
}
