//! Cache key construction
//!
//! Keys are deterministic and namespaced:
//! `{list|item}:network:{kind}:{provider}:{credential-id}:{scope}`.

use crate::resource::{Provider, ResourceKind};
use std::fmt;
use uuid::Uuid;

const NAMESPACE: &str = "network";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyGranularity {
    List,
    Item,
}

impl KeyGranularity {
    fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Item => "item",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    granularity: KeyGranularity,
    kind: ResourceKind,
    provider: Provider,
    credential_id: Uuid,
    scope: String,
}

impl CacheKey {
    /// Key for the full collection of one scope (region or VPC id)
    pub fn list(
        kind: ResourceKind,
        provider: Provider,
        credential_id: Uuid,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            granularity: KeyGranularity::List,
            kind,
            provider,
            credential_id,
            scope: scope.into(),
        }
    }

    /// Key for a single resource, scoped by its own id
    pub fn item(
        kind: ResourceKind,
        provider: Provider,
        credential_id: Uuid,
        id: impl Into<String>,
    ) -> Self {
        Self {
            granularity: KeyGranularity::Item,
            kind,
            provider,
            credential_id,
            scope: id.into(),
        }
    }

    pub fn granularity(&self) -> KeyGranularity {
        self.granularity
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}",
            self.granularity.as_str(),
            NAMESPACE,
            self.kind.as_str(),
            self.provider.as_str(),
            self.credential_id,
            self.scope
        )
    }
}
