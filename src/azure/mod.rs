//! Azure Resource Manager backend
//!
//! # Module Structure
//!
//! - [`auth`] - client-credentials tokens, cached per service principal
//! - [`client`] - resource group scoped ARM client
//! - [`models`] - `Microsoft.Network` wire models
//! - [`convert`] - wire models to DTOs
//! - [`handlers`] - resource handlers registered for `Provider::Azure`

pub mod auth;
pub mod client;
pub mod convert;
pub mod handlers;
pub mod models;

pub use auth::DEFAULT_LOGIN_BASE_URL;
pub use client::DEFAULT_MANAGEMENT_BASE_URL;
pub use handlers::AzureHandlers;
