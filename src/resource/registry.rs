//! Provider registry
//!
//! Maps each [`Provider`] onto the set of handlers serving it. Resolution of
//! an unregistered provider fails with `NotImplemented` for the requested
//! kind and verb, so callers get the same error whether a provider is
//! missing entirely or only lacks one operation.

use super::{Provider, ResourceHandler, ResourceKind, RuleHandler, Verb};
use crate::error::{NetError, Result};
use crate::model::{NetworkInfo, SecurityGroupInfo, SubnetInfo};
use std::collections::HashMap;
use std::sync::Arc;

/// All handlers of one provider
#[derive(Clone)]
pub struct HandlerSet {
    pub vpcs: Arc<dyn ResourceHandler<NetworkInfo>>,
    pub subnets: Arc<dyn ResourceHandler<SubnetInfo>>,
    pub security_groups: Arc<dyn ResourceHandler<SecurityGroupInfo>>,
    pub rules: Arc<dyn RuleHandler>,
}

impl HandlerSet {
    /// Build a set from one value implementing every handler trait
    pub fn from_shared<H>(handler: Arc<H>) -> Self
    where
        H: ResourceHandler<NetworkInfo>
            + ResourceHandler<SubnetInfo>
            + ResourceHandler<SecurityGroupInfo>
            + RuleHandler
            + 'static,
    {
        Self {
            vpcs: handler.clone(),
            subnets: handler.clone(),
            security_groups: handler.clone(),
            rules: handler,
        }
    }
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    handlers: HashMap<Provider, HandlerSet>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handlers of a provider
    pub fn register(&mut self, provider: Provider, handlers: HandlerSet) {
        if self.handlers.insert(provider, handlers).is_some() {
            tracing::debug!("Replaced handlers for provider {}", provider);
        } else {
            tracing::debug!("Registered handlers for provider {}", provider);
        }
    }

    pub fn with(mut self, provider: Provider, handlers: HandlerSet) -> Self {
        self.register(provider, handlers);
        self
    }

    pub fn resolve(&self, provider: Provider, kind: ResourceKind, verb: Verb) -> Result<&HandlerSet> {
        self.handlers
            .get(&provider)
            .ok_or_else(|| NetError::not_implemented(provider, kind, verb))
    }

    pub fn is_registered(&self, provider: Provider) -> bool {
        self.handlers.contains_key(&provider)
    }

    /// Registered providers in a stable order
    pub fn providers(&self) -> Vec<Provider> {
        let mut providers: Vec<_> = self.handlers.keys().copied().collect();
        providers.sort();
        providers
    }
}
