//! Long-running operation poller
//!
//! Some control planes (GCP) answer a mutation with an operation handle
//! instead of the final resource. [`OperationPoller::wait`] drives such a
//! handle to completion with three wake sources: the poll ticker, the overall
//! deadline and the caller's cancellation token. Whichever fires first wins.

use crate::error::{NetError, Result};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Provider-reported progress of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
}

impl OperationStatus {
    pub fn from_provider(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "DONE" | "SUCCEEDED" => Self::Done,
            "RUNNING" | "IN_PROGRESS" => Self::Running,
            _ => Self::Pending,
        }
    }
}

/// Snapshot returned by each poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationState {
    pub status: OperationStatus,
    /// Error payload reported by the provider, if any
    pub error: Option<String>,
}

impl OperationState {
    pub fn new(status: OperationStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: OperationStatus::Done,
            error: Some(message.into()),
        }
    }

    /// Done, with or without error
    pub fn is_terminal(&self) -> bool {
        self.status == OperationStatus::Done || self.error.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Where the provider keeps the operation record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationScope {
    Global,
    Region(String),
    Zone(String),
}

/// Provider-assigned handle for an in-flight mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationHandle {
    pub name: String,
    pub scope: OperationScope,
    pub kind: OperationKind,
    /// Name of the resource being mutated
    pub target: String,
}

impl OperationHandle {
    pub fn new(
        name: impl Into<String>,
        scope: OperationScope,
        kind: OperationKind,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            scope,
            kind,
            target: target.into(),
        }
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.kind.as_str(), self.target, self.name)
    }
}

/// Anything that can report the current state of an operation
#[async_trait]
pub trait OperationSource: Send + Sync {
    async fn poll(&self, handle: &OperationHandle) -> Result<OperationState>;
}

/// Interval/timeout driven waiter
#[derive(Debug, Clone, Copy)]
pub struct OperationPoller {
    interval: Duration,
    timeout: Duration,
}

impl Default for OperationPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_OPERATION_TIMEOUT)
    }
}

impl OperationPoller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait until the operation is done.
    ///
    /// `initial` is the state returned alongside the handle; when it is
    /// already terminal no poll is issued. Returns `Timeout` once the
    /// deadline passes, `Cancelled` when the token fires and
    /// `OperationFailed` as soon as a poll carries an error payload.
    pub async fn wait(
        &self,
        source: &dyn OperationSource,
        handle: &OperationHandle,
        initial: Option<OperationState>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if let Some(state) = initial {
            if let Some(outcome) = Self::evaluate(handle, &state) {
                return outcome;
            }
        }

        let started = Instant::now();
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval_at(started + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut poll_count: u32 = 0;
        tracing::debug!("Waiting for operation {}", handle);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("Operation {} wait cancelled after {} polls", handle, poll_count);
                    return Err(NetError::Cancelled(format!("waiting for operation {}", handle.name)));
                }
                _ = &mut deadline => {
                    tracing::warn!("Operation {} timed out after {} polls", handle, poll_count);
                    return Err(NetError::Timeout {
                        operation: handle.name.clone(),
                        elapsed: started.elapsed(),
                    });
                }
                state = Self::next_state(&mut ticker, source, handle) => {
                    poll_count += 1;
                    let state = state?;
                    tracing::debug!("Operation {} poll #{}: {:?}", handle, poll_count, state.status);
                    if let Some(outcome) = Self::evaluate(handle, &state) {
                        return outcome;
                    }
                }
            }
        }
    }

    async fn next_state(
        ticker: &mut Interval,
        source: &dyn OperationSource,
        handle: &OperationHandle,
    ) -> Result<OperationState> {
        ticker.tick().await;
        source.poll(handle).await
    }

    fn evaluate(handle: &OperationHandle, state: &OperationState) -> Option<Result<()>> {
        if let Some(message) = &state.error {
            tracing::error!("Operation {} failed: {}", handle, message);
            return Some(Err(NetError::OperationFailed {
                operation: handle.name.clone(),
                message: message.clone(),
            }));
        }
        if state.status == OperationStatus::Done {
            tracing::info!("Operation {} completed", handle);
            return Some(Ok(()));
        }
        None
    }
}
