//! GCP Compute Engine backend
//!
//! Networks, subnetworks and firewalls through the Compute Engine REST API.
//! Firewalls stand in for security groups: one firewall carries one
//! direction, and its allowed/denied entries become rules.
//!
//! # Module Structure
//!
//! - [`auth`] - service-account tokens with a small cache
//! - [`client`] - project scoped client and URL layout
//! - [`compute`] - wire models and API calls
//! - [`convert`] - wire models to provider-neutral DTOs, rule merging
//! - [`cleanup`] - cascading network delete steps
//! - [`handlers`] - resource handlers registered for [`Provider::Gcp`](crate::resource::Provider)
//!
//! # Example
//!
//! ```ignore
//! use cloudnet::gcp::{GcpHandlers, DEFAULT_COMPUTE_BASE_URL};
//! use cloudnet::resource::{HandlerSet, Provider, ProviderRegistry};
//!
//! let gcp = Arc::new(GcpHandlers::new(DEFAULT_COMPUTE_BASE_URL, OperationPoller::default()));
//! let registry = ProviderRegistry::new().with(Provider::Gcp, HandlerSet::from_shared(gcp));
//! ```

pub mod auth;
pub mod cleanup;
pub mod client;
pub mod compute;
pub mod convert;
pub mod handlers;

pub use client::{GcpClient, DEFAULT_COMPUTE_BASE_URL};
pub use handlers::GcpHandlers;
