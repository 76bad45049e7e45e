//! AWS EC2 backend
//!
//! # Module Structure
//!
//! - [`api`] - the [`Ec2Api`] seam and its plain records
//! - [`convert`] - EC2 records to DTOs, rules to permissions
//! - [`handlers`] - resource handlers registered for `Provider::Aws`
//! - `sdk` - `aws-sdk-ec2` backend (feature `aws`)

pub mod api;
pub mod convert;
pub mod handlers;
#[cfg(feature = "aws")]
pub mod sdk;

pub use api::{Ec2Api, Ec2Connector};
pub use handlers::AwsHandlers;
#[cfg(feature = "aws")]
pub use sdk::SdkConnector;
