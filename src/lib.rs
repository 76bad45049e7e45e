//! cloudnet
//!
//! One surface over the network resources of several clouds: VPCs, subnets
//! and security groups. [`NetworkService`] resolves the provider from the
//! credential, reads through the cache, dispatches to the registered
//! handlers and records events and audit entries for every mutation.
//!
//! # Module Structure
//!
//! - [`service`] - dispatcher, cache wiring, events and audit
//! - [`resource`] - handler traits and the provider registry
//! - [`model`] - provider-neutral DTOs, scopes and requests
//! - [`query`] - search, sort and pagination over listed items
//! - [`cache`] - fail-open read-through cache
//! - [`operation`] - long-running operation poller
//! - [`cleanup`] - cascading delete steps and gates
//! - [`gcp`], [`aws`], [`azure`], [`ncp`] - provider backends

pub mod aws;
pub mod azure;
pub mod cache;
pub mod cleanup;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod gcp;
pub mod http;
pub mod model;
pub mod ncp;
pub mod operation;
pub mod query;
pub mod resource;
pub mod service;

pub use cache::{MemoryCache, ResourceCache};
pub use config::Config;
pub use credential::{Credential, CredentialData, CredentialDecryptor, PlaintextDecryptor};
pub use error::{ErrorKind, NetError, Result};
pub use query::{ListQuery, ListResponse, SortOrder};
pub use resource::{HandlerSet, Provider, ProviderRegistry, ResourceKind, Verb};
pub use service::{NetworkService, RequestContext};
