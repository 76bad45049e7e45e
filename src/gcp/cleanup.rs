//! Dependents of a GCP network: firewalls and subnetworks are removed on a
//! best-effort basis, attached instances block the delete.

use super::client::{region_from, GcpClient};
use super::compute::Compute;
use crate::cleanup::{CleanupReport, CleanupStep, DeletionGate};
use crate::error::Result;
use crate::model::short_name;
use crate::operation::{OperationKind, OperationPoller};
use crate::resource::ResourceKind;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// `network` is the short network name everywhere below
fn references(link: &str, network: &str) -> bool {
    !link.is_empty() && short_name(link) == network
}

pub struct FirewallCleanup {
    client: GcpClient,
    poller: OperationPoller,
}

impl FirewallCleanup {
    pub fn new(client: GcpClient, poller: OperationPoller) -> Self {
        Self { client, poller }
    }
}

#[async_trait]
impl CleanupStep for FirewallCleanup {
    fn name(&self) -> &str {
        "firewall-cleanup"
    }

    async fn run(&self, network: &str, cancel: &CancellationToken) -> Result<CleanupReport> {
        let compute = Compute::new(&self.client);
        let mut report = CleanupReport::new(self.name(), ResourceKind::SecurityGroup);

        let firewalls = compute.list_firewalls().await?;
        for firewall in firewalls.iter().filter(|f| references(&f.network, network)) {
            let outcome = async {
                let op = compute.delete_firewall(&firewall.name).await?;
                let handle = op.handle(OperationKind::Delete, &firewall.name);
                self.poller
                    .wait(&compute, &handle, Some(op.state()), cancel)
                    .await
            }
            .await;

            match outcome {
                Ok(()) => {
                    tracing::info!("Deleted firewall {} of network {}", firewall.name, network);
                    report.removed.push(self.client.firewall_path(&firewall.name));
                }
                Err(e) => report.failed.push(format!("{}: {}", firewall.name, e)),
            }
        }
        Ok(report)
    }
}

pub struct SubnetCleanup {
    client: GcpClient,
    poller: OperationPoller,
}

impl SubnetCleanup {
    pub fn new(client: GcpClient, poller: OperationPoller) -> Self {
        Self { client, poller }
    }
}

#[async_trait]
impl CleanupStep for SubnetCleanup {
    fn name(&self) -> &str {
        "subnet-cleanup"
    }

    async fn run(&self, network: &str, cancel: &CancellationToken) -> Result<CleanupReport> {
        let compute = Compute::new(&self.client);
        let mut report = CleanupReport::new(self.name(), ResourceKind::Subnet);

        let subnets = compute.aggregated_subnetworks().await?;
        for subnet in subnets.iter().filter(|s| references(&s.network, network)) {
            let region = subnet.region.as_deref().map(region_from).unwrap_or_default();
            let outcome = async {
                let op = compute.delete_subnetwork(region, &subnet.name).await?;
                let handle = op.handle(OperationKind::Delete, &subnet.name);
                self.poller
                    .wait(&compute, &handle, Some(op.state()), cancel)
                    .await
            }
            .await;

            match outcome {
                Ok(()) => {
                    tracing::info!("Deleted subnetwork {}/{} of network {}", region, subnet.name, network);
                    report.removed.push(self.client.subnetwork_path(region, &subnet.name));
                }
                Err(e) => report.failed.push(format!("{}/{}: {}", region, subnet.name, e)),
            }
        }
        Ok(report)
    }
}

/// Any instance with an interface on the network blocks the delete
pub struct InstanceGate {
    client: GcpClient,
}

impl InstanceGate {
    pub fn new(client: GcpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DeletionGate for InstanceGate {
    fn name(&self) -> &str {
        "instance-gate"
    }

    async fn blockers(&self, network: &str) -> Result<Vec<String>> {
        let instances = Compute::new(&self.client).aggregated_instances().await?;
        Ok(instances
            .into_iter()
            .filter(|i| {
                i.network_interfaces
                    .iter()
                    .any(|nic| references(&nic.network, network))
            })
            .map(|i| i.name)
            .collect())
    }
}
