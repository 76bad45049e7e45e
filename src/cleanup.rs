//! Cascading delete
//!
//! A network delete on a provider with strict referential integrity runs as
//! a pipeline:
//!
//! 1. soft cleanup steps (firewall rules, subnets), each best-effort; a
//!    failing step is logged and the pipeline moves on
//! 2. a hard deletion gate (instances still attached); any blocker aborts
//!    with `Conflict` and the network delete is never issued
//! 3. the network delete itself
//!
//! Cancellation is checked between stages.

use crate::error::{NetError, Result};
use crate::resource::{Dependent, ResourceKind};
use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Outcome of one soft cleanup step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub step: String,
    pub kind: ResourceKind,
    /// Canonical ids of the dependents removed
    pub removed: Vec<String>,
    /// Dependents that could not be removed, with the reason
    pub failed: Vec<String>,
}

impl CleanupReport {
    pub fn new(step: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            step: step.into(),
            kind,
            removed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn deleted(&self) -> usize {
        self.removed.len()
    }
}

/// Best-effort removal of one class of dependents
#[async_trait]
pub trait CleanupStep: Send + Sync {
    fn name(&self) -> &str;

    /// Delete dependents of `network`. An `Err` means enumeration itself
    /// failed; per-dependent failures go into the report.
    async fn run(&self, network: &str, cancel: &CancellationToken) -> Result<CleanupReport>;
}

/// Hard precondition for deleting a network
#[async_trait]
pub trait DeletionGate: Send + Sync {
    fn name(&self) -> &str;

    /// Names of resources that still hold on to `network`
    async fn blockers(&self, network: &str) -> Result<Vec<String>>;
}

/// What happened before the network delete went through
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeSummary {
    pub reports: Vec<CleanupReport>,
    /// Steps whose enumeration failed
    pub skipped: Vec<String>,
}

impl CascadeSummary {
    pub fn deleted(&self) -> usize {
        self.reports.iter().map(CleanupReport::deleted).sum()
    }

    /// Everything the cleanup steps removed
    pub fn dependents(&self) -> Vec<Dependent> {
        self.reports
            .iter()
            .flat_map(|r| r.removed.iter().map(|id| Dependent::new(r.kind, id.as_str())))
            .collect()
    }
}

#[derive(Default)]
pub struct CascadeDelete {
    steps: Vec<Box<dyn CleanupStep>>,
    gate: Option<Box<dyn DeletionGate>>,
}

impl CascadeDelete {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, step: impl CleanupStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn gate(mut self, gate: impl DeletionGate + 'static) -> Self {
        self.gate = Some(Box::new(gate));
        self
    }

    /// Run the cleanup pipeline, then `delete` if the gate allows it.
    pub async fn execute<F, Fut>(
        &self,
        network: &str,
        cancel: &CancellationToken,
        delete: F,
    ) -> Result<CascadeSummary>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let mut summary = CascadeSummary::default();

        for step in &self.steps {
            ensure_active(cancel, network)?;
            match step.run(network, cancel).await {
                Ok(report) => {
                    for failure in &report.failed {
                        tracing::warn!("{}: could not remove {}", step.name(), failure);
                    }
                    tracing::info!(
                        "{}: removed {} dependents of {}",
                        step.name(),
                        report.deleted(),
                        network
                    );
                    summary.reports.push(report);
                }
                Err(NetError::Cancelled(what)) => return Err(NetError::Cancelled(what)),
                Err(e) => {
                    tracing::warn!("{} failed for {}, continuing: {}", step.name(), network, e);
                    summary.skipped.push(step.name().to_string());
                }
            }
        }

        ensure_active(cancel, network)?;
        if let Some(gate) = &self.gate {
            let blockers = gate.blockers(network).await?;
            if !blockers.is_empty() {
                tracing::warn!(
                    "{} blocked deletion of {}: {}",
                    gate.name(),
                    network,
                    blockers.join(", ")
                );
                return Err(NetError::Conflict(format!(
                    "network {} is still in use by instance(s): {}",
                    network,
                    blockers.join(", ")
                )));
            }
        }

        ensure_active(cancel, network)?;
        delete().await?;
        tracing::info!(
            "Deleted network {} after removing {} dependents",
            network,
            summary.deleted()
        );
        Ok(summary)
    }
}

fn ensure_active(cancel: &CancellationToken, network: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(NetError::Cancelled(format!("delete of network {}", network)));
    }
    Ok(())
}
