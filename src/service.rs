//! Resource dispatcher
//!
//! [`NetworkService`] is the single entry point for callers. Every call:
//!
//! 1. resolves the provider from the credential (`NotSupported` if unknown)
//! 2. resolves the provider's handlers (`NotImplemented` if unregistered)
//! 3. reads through the cache (lists and items) or calls the handler
//! 4. on mutation, invalidates the affected keys and only then emits the
//!    event and the audit entry
//!
//! Filtering, sorting and pagination run after cache resolution and are
//! never cached.

use crate::cache::{CacheKey, ResourceCache};
use crate::credential::{Credential, CredentialData, CredentialDecryptor, PlaintextDecryptor};
use crate::error::{NetError, Result};
use crate::events::{
    AuditEntry, AuditLogger, EventPayload, EventPublisher, EventVerb, ResourceEvent,
    TracingAuditLogger, TracingPublisher,
};
use crate::model::{
    NetworkInfo, RuleInfo, SecurityGroupInfo, SecurityGroupRules, SecurityGroupScope, SubnetInfo,
    SubnetScope, VpcScope,
};
use crate::query::{self, ListQuery, ListResponse};
use crate::resource::{
    CallContext, HandlerSet, Provider, ProviderRegistry, Resource, ResourceKind, RuleMutation,
    Verb,
};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const API_PREFIX: &str = "/api/v1";
const ANONYMOUS: &str = "anonymous";

/// Per-request caller context
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub actor: Option<String>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn actor_name(&self) -> &str {
        self.actor.as_deref().unwrap_or(ANONYMOUS)
    }
}

/// What to record for one successful mutation
struct Mutation {
    verb: EventVerb,
    action: String,
    path: String,
}

impl Mutation {
    fn crud(kind: ResourceKind, provider: Provider, verb: Verb, id: Option<&str>) -> Self {
        let collection = collection_path(provider, kind);
        let (event_verb, method, path) = match (verb, id) {
            (Verb::Create, _) | (_, None) => (EventVerb::Created, "POST", collection),
            (Verb::Delete, Some(id)) => (EventVerb::Deleted, "DELETE", format!("{}/{}", collection, id)),
            (_, Some(id)) => (EventVerb::Updated, "PUT", format!("{}/{}", collection, id)),
        };
        Self {
            verb: event_verb,
            action: format!("{}.{}", kind.action_prefix(), verb.as_str()),
            path: format!("{} {}", method, path),
        }
    }

    fn rules(provider: Provider, verb: Verb, group_id: &str) -> Self {
        let (method, op) = match verb {
            Verb::AddRule => ("POST", "add"),
            Verb::RemoveRule => ("DELETE", "remove"),
            _ => ("PUT", "replace"),
        };
        Self {
            verb: EventVerb::Updated,
            action: format!("{}.rule.{}", ResourceKind::SecurityGroup.action_prefix(), op),
            path: format!(
                "{} {}/{}/rules",
                method,
                collection_path(provider, ResourceKind::SecurityGroup),
                group_id
            ),
        }
    }
}

fn collection_path(provider: Provider, kind: ResourceKind) -> String {
    format!("{}/{}/networks/{}", API_PREFIX, provider, kind.path_segment())
}

/// Race a provider call against the caller's cancellation token
async fn cancellable<T, F>(cancel: &CancellationToken, kind: ResourceKind, verb: Verb, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(NetError::Cancelled(format!("{} {}", verb, kind))),
        result = call => result,
    }
}

fn require_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(NetError::validation("id is required"));
    }
    Ok(())
}

/// Dispatcher over registered providers with caching and side effects
pub struct NetworkService {
    registry: ProviderRegistry,
    decryptor: Arc<dyn CredentialDecryptor>,
    cache: ResourceCache,
    events: Arc<dyn EventPublisher>,
    audit: Arc<dyn AuditLogger>,
}

pub struct NetworkServiceBuilder {
    registry: ProviderRegistry,
    decryptor: Arc<dyn CredentialDecryptor>,
    cache: ResourceCache,
    events: Arc<dyn EventPublisher>,
    audit: Arc<dyn AuditLogger>,
}

impl NetworkServiceBuilder {
    pub fn decryptor(mut self, decryptor: Arc<dyn CredentialDecryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    pub fn cache(mut self, cache: ResourceCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = events;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub fn build(self) -> NetworkService {
        NetworkService {
            registry: self.registry,
            decryptor: self.decryptor,
            cache: self.cache,
            events: self.events,
            audit: self.audit,
        }
    }
}

impl NetworkService {
    /// Start from a registry; cache disabled, plaintext credentials and
    /// tracing-backed side effects until overridden
    pub fn builder(registry: ProviderRegistry) -> NetworkServiceBuilder {
        NetworkServiceBuilder {
            registry,
            decryptor: Arc::new(PlaintextDecryptor),
            cache: ResourceCache::disabled(),
            events: Arc::new(TracingPublisher),
            audit: Arc::new(TracingAuditLogger),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    // =========================================================================
    // Generic dispatch
    // =========================================================================

    pub async fn list<R: Resource>(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &R::Scope,
        query: &ListQuery,
    ) -> Result<ListResponse<R>> {
        let (provider, handlers) = self.resolve(credential, R::KIND, Verb::List)?;
        let secrets = self.decrypt(credential).await?;
        let cx = call_context(credential.id, &secrets, &ctx.cancel);
        let key = CacheKey::list(
            R::KIND,
            provider,
            credential.id,
            R::cache_scope(handlers, &cx, scope, provider)?,
        );

        let items = match self.cache.get_list::<R>(&key).await {
            Some(items) => items,
            None => {
                tracing::debug!("Listing {} from {} ({:?})", R::KIND, provider, scope);
                let items = cancellable(
                    &ctx.cancel,
                    R::KIND,
                    Verb::List,
                    R::handler(handlers).list(&cx, scope),
                )
                .await?;
                self.cache.set_list(&key, &items).await;
                items
            }
        };

        let items: Vec<R> = items.into_iter().filter(|item| item.in_scope(scope)).collect();
        Ok(query::apply(items, query))
    }

    pub async fn get<R: Resource>(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &R::Scope,
        id: &str,
    ) -> Result<R> {
        require_id(id)?;
        let (provider, handlers) = self.resolve(credential, R::KIND, Verb::Get)?;
        let handler = R::handler(handlers);
        let secrets = self.decrypt(credential).await?;
        let cx = call_context(credential.id, &secrets, &ctx.cancel);
        let key = CacheKey::item(
            R::KIND,
            provider,
            credential.id,
            handler.canonical_id(&cx, scope, id)?,
        );

        if let Some(item) = self.cache.get_item::<R>(&key).await {
            return Ok(item);
        }

        let item = cancellable(&ctx.cancel, R::KIND, Verb::Get, handler.get(&cx, scope, id)).await?;
        self.cache.set_item(&key, &item).await;
        Ok(item)
    }

    pub async fn create<R: Resource>(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &R::Scope,
        request: &R::Create,
    ) -> Result<R> {
        R::validate_create(request)?;
        let (provider, handlers) = self.resolve(credential, R::KIND, Verb::Create)?;

        let secrets = self.decrypt(credential).await?;
        let cx = call_context(credential.id, &secrets, &ctx.cancel);
        let list_scope = R::cache_scope(handlers, &cx, scope, provider)?;
        let created = cancellable(
            &ctx.cancel,
            R::KIND,
            Verb::Create,
            R::handler(handlers).create(&cx, scope, request),
        )
        .await?;
        tracing::info!("Created {} {} on {}", R::KIND, created.id(), provider);

        self.invalidate_lists::<R>(provider, credential.id, Some(list_scope), created.parent_scope())
            .await;

        self.emit(
            ctx,
            provider,
            credential.id,
            R::region(scope),
            Mutation::crud(R::KIND, provider, Verb::Create, None),
            created.event_payload(),
        )
        .await;
        Ok(created)
    }

    pub async fn update<R: Resource>(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &R::Scope,
        id: &str,
        request: &R::Update,
    ) -> Result<R> {
        require_id(id)?;
        let (provider, handlers) = self.resolve(credential, R::KIND, Verb::Update)?;
        let handler = R::handler(handlers);

        let secrets = self.decrypt(credential).await?;
        let cx = call_context(credential.id, &secrets, &ctx.cancel);
        let key_id = handler.canonical_id(&cx, scope, id)?;
        let updated = cancellable(
            &ctx.cancel,
            R::KIND,
            Verb::Update,
            handler.update(&cx, scope, id, request),
        )
        .await?;
        tracing::info!("Updated {} {} on {}", R::KIND, id, provider);

        self.invalidate_lists::<R>(
            provider,
            credential.id,
            R::cache_scope(handlers, &cx, scope, provider).ok(),
            updated.parent_scope(),
        )
        .await;
        self.invalidate_items(R::KIND, provider, credential.id, &[key_id.as_str(), updated.id()])
            .await;

        self.emit(
            ctx,
            provider,
            credential.id,
            R::region(scope),
            Mutation::crud(R::KIND, provider, Verb::Update, Some(id)),
            updated.event_payload(),
        )
        .await;
        Ok(updated)
    }

    /// Besides the resource's own keys, a delete drops the collections that
    /// held its dependents and the item of every dependent the provider
    /// removed along the way.
    pub async fn delete<R: Resource>(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &R::Scope,
        id: &str,
    ) -> Result<()> {
        require_id(id)?;
        let (provider, handlers) = self.resolve(credential, R::KIND, Verb::Delete)?;
        let handler = R::handler(handlers);

        let secrets = self.decrypt(credential).await?;
        let cx = call_context(credential.id, &secrets, &ctx.cancel);
        let key_id = handler.canonical_id(&cx, scope, id)?;

        // The collection scope must be known before the resource is gone
        let list_scope = match R::cache_scope(handlers, &cx, scope, provider) {
            Ok(list_scope) => list_scope,
            Err(e) => {
                let existing =
                    cancellable(&ctx.cancel, R::KIND, Verb::Get, handler.get(&cx, scope, id))
                        .await?;
                existing.parent_scope().ok_or(e)?
            }
        };

        let removed = cancellable(
            &ctx.cancel,
            R::KIND,
            Verb::Delete,
            handler.delete(&cx, scope, id),
        )
        .await?;
        tracing::info!("Deleted {} {} on {}", R::KIND, id, provider);

        self.invalidate_lists::<R>(provider, credential.id, Some(list_scope), None)
            .await;
        self.invalidate_items(R::KIND, provider, credential.id, &[key_id.as_str()])
            .await;
        for (kind, dependent_scope) in R::dependent_lists(scope, &key_id, provider) {
            self.cache
                .invalidate(&CacheKey::list(kind, provider, credential.id, dependent_scope))
                .await;
        }
        for dependent in &removed {
            tracing::debug!("{} {} went with {} {}", dependent.kind, dependent.id, R::KIND, id);
            let key = CacheKey::item(dependent.kind, provider, credential.id, dependent.id.as_str());
            self.cache.invalidate(&key).await;
        }

        self.emit(
            ctx,
            provider,
            credential.id,
            R::region(scope),
            Mutation::crud(R::KIND, provider, Verb::Delete, Some(id)),
            R::deleted_payload(scope, id),
        )
        .await;
        Ok(())
    }

    // =========================================================================
    // VPCs
    // =========================================================================

    pub async fn list_vpcs(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &VpcScope,
        query: &ListQuery,
    ) -> Result<ListResponse<NetworkInfo>> {
        self.list::<NetworkInfo>(ctx, credential, scope, query).await
    }

    pub async fn get_vpc(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &VpcScope,
        id: &str,
    ) -> Result<NetworkInfo> {
        self.get::<NetworkInfo>(ctx, credential, scope, id).await
    }

    pub async fn create_vpc(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &VpcScope,
        request: &<NetworkInfo as Resource>::Create,
    ) -> Result<NetworkInfo> {
        self.create::<NetworkInfo>(ctx, credential, scope, request)
            .await
    }

    pub async fn update_vpc(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &VpcScope,
        id: &str,
        request: &<NetworkInfo as Resource>::Update,
    ) -> Result<NetworkInfo> {
        self.update::<NetworkInfo>(ctx, credential, scope, id, request)
            .await
    }

    /// Providers with strict referential integrity run the cascading
    /// cleanup inside their handler; all of them refuse with `Conflict`
    /// while instances are still attached. Cached subnet and
    /// security-group collections of the VPC are dropped with it.
    pub async fn delete_vpc(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &VpcScope,
        id: &str,
    ) -> Result<()> {
        self.delete::<NetworkInfo>(ctx, credential, scope, id).await
    }

    // =========================================================================
    // Subnets
    // =========================================================================

    pub async fn list_subnets(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SubnetScope,
        query: &ListQuery,
    ) -> Result<ListResponse<SubnetInfo>> {
        self.list::<SubnetInfo>(ctx, credential, scope, query).await
    }

    pub async fn get_subnet(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SubnetScope,
        id: &str,
    ) -> Result<SubnetInfo> {
        self.get::<SubnetInfo>(ctx, credential, scope, id).await
    }

    pub async fn create_subnet(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SubnetScope,
        request: &<SubnetInfo as Resource>::Create,
    ) -> Result<SubnetInfo> {
        self.create::<SubnetInfo>(ctx, credential, scope, request)
            .await
    }

    pub async fn update_subnet(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SubnetScope,
        id: &str,
        request: &<SubnetInfo as Resource>::Update,
    ) -> Result<SubnetInfo> {
        self.update::<SubnetInfo>(ctx, credential, scope, id, request)
            .await
    }

    pub async fn delete_subnet(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SubnetScope,
        id: &str,
    ) -> Result<()> {
        self.delete::<SubnetInfo>(ctx, credential, scope, id).await
    }

    // =========================================================================
    // Security groups
    // =========================================================================

    pub async fn list_security_groups(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SecurityGroupScope,
        query: &ListQuery,
    ) -> Result<ListResponse<SecurityGroupInfo>> {
        self.list::<SecurityGroupInfo>(ctx, credential, scope, query)
            .await
    }

    pub async fn get_security_group(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SecurityGroupScope,
        id: &str,
    ) -> Result<SecurityGroupInfo> {
        self.get::<SecurityGroupInfo>(ctx, credential, scope, id)
            .await
    }

    pub async fn create_security_group(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SecurityGroupScope,
        request: &<SecurityGroupInfo as Resource>::Create,
    ) -> Result<SecurityGroupInfo> {
        self.create::<SecurityGroupInfo>(ctx, credential, scope, request)
            .await
    }

    pub async fn update_security_group(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SecurityGroupScope,
        id: &str,
        request: &<SecurityGroupInfo as Resource>::Update,
    ) -> Result<SecurityGroupInfo> {
        self.update::<SecurityGroupInfo>(ctx, credential, scope, id, request)
            .await
    }

    pub async fn delete_security_group(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SecurityGroupScope,
        id: &str,
    ) -> Result<()> {
        self.delete::<SecurityGroupInfo>(ctx, credential, scope, id)
            .await
    }

    pub async fn add_security_group_rule(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SecurityGroupScope,
        group_id: &str,
        rule: &RuleInfo,
    ) -> Result<SecurityGroupInfo> {
        require_id(group_id)?;
        rule.validate()?;
        let (provider, handlers) =
            self.resolve(credential, ResourceKind::SecurityGroup, Verb::AddRule)?;

        let secrets = self.decrypt(credential).await?;
        let cx = call_context(credential.id, &secrets, &ctx.cancel);
        let key_id = handlers.security_groups.canonical_id(&cx, scope, group_id)?;
        let group = cancellable(
            &ctx.cancel,
            ResourceKind::SecurityGroup,
            Verb::AddRule,
            handlers.rules.add_rule(&cx, scope, group_id, rule),
        )
        .await?;

        self.finish_rule_mutation(
            ctx,
            provider,
            credential.id,
            scope,
            (group_id, key_id.as_str()),
            Verb::AddRule,
            &group,
        )
        .await;
        Ok(group)
    }

    pub async fn remove_security_group_rule(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SecurityGroupScope,
        group_id: &str,
        rule: &RuleInfo,
    ) -> Result<SecurityGroupInfo> {
        require_id(group_id)?;
        let (provider, handlers) =
            self.resolve(credential, ResourceKind::SecurityGroup, Verb::RemoveRule)?;

        let secrets = self.decrypt(credential).await?;
        let cx = call_context(credential.id, &secrets, &ctx.cancel);
        let key_id = handlers.security_groups.canonical_id(&cx, scope, group_id)?;
        let group = cancellable(
            &ctx.cancel,
            ResourceKind::SecurityGroup,
            Verb::RemoveRule,
            handlers.rules.remove_rule(&cx, scope, group_id, rule),
        )
        .await?;

        self.finish_rule_mutation(
            ctx,
            provider,
            credential.id,
            scope,
            (group_id, key_id.as_str()),
            Verb::RemoveRule,
            &group,
        )
        .await;
        Ok(group)
    }

    /// Replace every rule of a security group.
    ///
    /// Providers that can swap the whole rule set in one call do so
    /// atomically. Otherwise the existing rules are removed one by one
    /// (failures logged) and the requested rules added in order (first
    /// failure returned); a failure half way leaves a partial rule set.
    pub async fn update_security_group_rules(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        scope: &SecurityGroupScope,
        group_id: &str,
        rules: &SecurityGroupRules,
    ) -> Result<SecurityGroupInfo> {
        require_id(group_id)?;
        rules.ordered().iter().try_for_each(RuleInfo::validate)?;
        let (provider, handlers) =
            self.resolve(credential, ResourceKind::SecurityGroup, Verb::ReplaceRules)?;

        let mutation = handlers.rules.rule_mutation();
        if mutation == RuleMutation::Unsupported {
            return Err(NetError::not_implemented(
                provider,
                ResourceKind::SecurityGroup,
                Verb::ReplaceRules,
            ));
        }

        let secrets = self.decrypt(credential).await?;
        let cx = call_context(credential.id, &secrets, &ctx.cancel);
        let key_id = handlers.security_groups.canonical_id(&cx, scope, group_id)?;
        let outcome = match mutation {
            RuleMutation::AtomicReplace => {
                cancellable(
                    &ctx.cancel,
                    ResourceKind::SecurityGroup,
                    Verb::ReplaceRules,
                    handlers.rules.replace_rules(&cx, scope, group_id, rules),
                )
                .await
            }
            _ => {
                cancellable(
                    &ctx.cancel,
                    ResourceKind::SecurityGroup,
                    Verb::ReplaceRules,
                    replace_incrementally(handlers, &cx, scope, group_id, rules),
                )
                .await
            }
        };

        match outcome {
            Ok(group) => {
                self.finish_rule_mutation(
                    ctx,
                    provider,
                    credential.id,
                    scope,
                    (group_id, key_id.as_str()),
                    Verb::ReplaceRules,
                    &group,
                )
                .await;
                Ok(group)
            }
            Err(e) => {
                // The rule set may already be partially changed
                self.invalidate_security_group(provider, credential.id, scope, &key_id, None)
                    .await;
                Err(e)
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn resolve(
        &self,
        credential: &Credential,
        kind: ResourceKind,
        verb: Verb,
    ) -> Result<(Provider, &HandlerSet)> {
        let provider: Provider = credential.provider.parse()?;
        let handlers = self.registry.resolve(provider, kind, verb)?;
        Ok((provider, handlers))
    }

    async fn decrypt(&self, credential: &Credential) -> Result<CredentialData> {
        self.decryptor
            .decrypt(&credential.encrypted_data)
            .await
            .map_err(|e| NetError::Internal(format!("failed to decrypt credential: {}", e)))
    }

    async fn invalidate_lists<R: Resource>(
        &self,
        provider: Provider,
        credential_id: Uuid,
        list_scope: Option<String>,
        parent_scope: Option<String>,
    ) {
        if let Some(scope) = &list_scope {
            self.cache
                .invalidate(&CacheKey::list(R::KIND, provider, credential_id, scope.as_str()))
                .await;
        }
        if let Some(parent) = parent_scope.filter(|p| list_scope.as_ref() != Some(p)) {
            self.cache
                .invalidate(&CacheKey::list(R::KIND, provider, credential_id, parent))
                .await;
        }
    }

    async fn invalidate_items(
        &self,
        kind: ResourceKind,
        provider: Provider,
        credential_id: Uuid,
        ids: &[&str],
    ) {
        let mut seen: Vec<&str> = Vec::with_capacity(ids.len());
        for id in ids.iter().copied().filter(|id| !id.is_empty()) {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            self.cache
                .invalidate(&CacheKey::item(kind, provider, credential_id, id))
                .await;
        }
    }

    async fn invalidate_security_group(
        &self,
        provider: Provider,
        credential_id: Uuid,
        scope: &SecurityGroupScope,
        key_id: &str,
        group: Option<&SecurityGroupInfo>,
    ) {
        self.invalidate_lists::<SecurityGroupInfo>(
            provider,
            credential_id,
            SecurityGroupInfo::list_scope(scope, provider).ok(),
            None,
        )
        .await;
        let refreshed = group.map(|g| g.id.as_str()).unwrap_or_default();
        self.invalidate_items(
            ResourceKind::SecurityGroup,
            provider,
            credential_id,
            &[key_id, refreshed],
        )
        .await;
    }

    /// `group` pairs the id as requested with its canonical cache form
    #[allow(clippy::too_many_arguments)]
    async fn finish_rule_mutation(
        &self,
        ctx: &RequestContext,
        provider: Provider,
        credential_id: Uuid,
        scope: &SecurityGroupScope,
        (group_id, key_id): (&str, &str),
        verb: Verb,
        group: &SecurityGroupInfo,
    ) {
        tracing::info!("{} on security group {} ({})", verb, group_id, provider);
        self.invalidate_security_group(provider, credential_id, scope, key_id, Some(group))
            .await;
        self.emit(
            ctx,
            provider,
            credential_id,
            SecurityGroupInfo::region(scope),
            Mutation::rules(provider, verb, group_id),
            group.event_payload(),
        )
        .await;
    }

    /// Publish the event and write the audit entry; failures are logged only
    async fn emit(
        &self,
        ctx: &RequestContext,
        provider: Provider,
        credential_id: Uuid,
        region: Option<&str>,
        mutation: Mutation,
        payload: EventPayload,
    ) {
        let event = ResourceEvent::new(
            provider,
            credential_id,
            region.map(str::to_string),
            mutation.verb,
            payload,
        );

        if let Err(e) = self.events.publish(&event).await {
            tracing::warn!("Failed to publish {}: {}", event.event_type(), e);
        }

        let details = serde_json::json!({
            "provider": provider,
            "credential_id": credential_id,
            "region": region,
            "resource": &event.payload,
        });
        let entry = AuditEntry {
            actor: ctx.actor_name().to_string(),
            action: mutation.action,
            resource_path: mutation.path,
            details,
        };
        if let Err(e) = self.audit.log_action(&entry).await {
            tracing::warn!("Failed to write audit entry {}: {}", entry, e);
        }
    }
}

fn call_context<'a>(
    credential_id: Uuid,
    secrets: &'a CredentialData,
    cancel: &'a CancellationToken,
) -> CallContext<'a> {
    CallContext {
        credential_id,
        secrets,
        cancel,
    }
}

async fn replace_incrementally(
    handlers: &HandlerSet,
    cx: &CallContext<'_>,
    scope: &SecurityGroupScope,
    group_id: &str,
    rules: &SecurityGroupRules,
) -> Result<SecurityGroupInfo> {
    let current = handlers.security_groups.get(cx, scope, group_id).await?;

    for rule in &current.rules {
        if let Err(e) = handlers.rules.remove_rule(cx, scope, group_id, rule).await {
            tracing::warn!(
                "Failed to remove {} {} rule from {}, continuing: {}",
                rule.direction.as_str(),
                rule.protocol,
                group_id,
                e
            );
        }
    }

    for rule in rules.ordered() {
        handlers.rules.add_rule(cx, scope, group_id, &rule).await?;
    }

    handlers.security_groups.get(cx, scope, group_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crud_audit_paths() {
        let create = Mutation::crud(ResourceKind::Vpc, Provider::Aws, Verb::Create, None);
        assert_eq!(create.action, "vpc.create");
        assert_eq!(create.path, "POST /api/v1/aws/networks/vpcs");
        assert_eq!(create.verb, EventVerb::Created);

        let update = Mutation::crud(ResourceKind::Subnet, Provider::Gcp, Verb::Update, Some("s-1"));
        assert_eq!(update.action, "subnet.update");
        assert_eq!(update.path, "PUT /api/v1/gcp/networks/subnets/s-1");
        assert_eq!(update.verb, EventVerb::Updated);

        let delete = Mutation::crud(ResourceKind::SecurityGroup, Provider::Azure, Verb::Delete, Some("nsg"));
        assert_eq!(delete.action, "security_group.delete");
        assert_eq!(delete.path, "DELETE /api/v1/azure/networks/security-groups/nsg");
        assert_eq!(delete.verb, EventVerb::Deleted);
    }

    #[test]
    fn test_rule_audit_paths() {
        let add = Mutation::rules(Provider::Aws, Verb::AddRule, "sg-1");
        assert_eq!(add.action, "security_group.rule.add");
        assert_eq!(add.path, "POST /api/v1/aws/networks/security-groups/sg-1/rules");

        let replace = Mutation::rules(Provider::Gcp, Verb::ReplaceRules, "fw");
        assert_eq!(replace.action, "security_group.rule.replace");
        assert_eq!(replace.path, "PUT /api/v1/gcp/networks/security-groups/fw/rules");
        assert_eq!(replace.verb, EventVerb::Updated);
    }

    #[test]
    fn test_anonymous_actor() {
        assert_eq!(RequestContext::new().actor_name(), "anonymous");
        assert_eq!(RequestContext::new().with_actor("ops").actor_name(), "ops");
    }
}
