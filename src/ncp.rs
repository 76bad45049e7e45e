//! NCP placeholder
//!
//! The provider is known to the registry but no operation is built yet, so
//! every verb answers `NotImplemented` instead of `NotSupported`.

use crate::model::{NetworkInfo, SecurityGroupInfo, SubnetInfo};
use crate::resource::{Provider, ProviderHandler, ResourceHandler, RuleHandler};

#[derive(Debug, Default)]
pub struct NcpHandlers;

impl ProviderHandler for NcpHandlers {
    fn provider(&self) -> Provider {
        Provider::Ncp
    }
}

impl ResourceHandler<NetworkInfo> for NcpHandlers {}
impl ResourceHandler<SubnetInfo> for NcpHandlers {}
impl ResourceHandler<SecurityGroupInfo> for NcpHandlers {}
impl RuleHandler for NcpHandlers {}
