//! Resource status polling
//!
//! Every long-running RDS operation is driven to completion by re-issuing a
//! status probe on a fixed interval until the resource reaches the wanted
//! state. Status is logged only when it changes so multi-hour snapshot copies
//! don't flood the log.
//!
//! There is no deadline by default: a stuck transition blocks until the
//! process is killed. [`Poller::with_deadline`] opts into a bounded wait.

use crate::error::{OrchestratorError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default interval between status probes
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// What a wait loop is waiting for
#[derive(Debug, Clone, Copy)]
pub enum StatusTarget<'a> {
    /// Status equals exactly this value
    Equals(&'a str),
    /// Status is any of these values
    AnyOf(&'a [&'a str]),
}

impl StatusTarget<'_> {
    /// Check whether a probed status satisfies the target
    pub fn is_met(&self, status: &str) -> bool {
        match self {
            Self::Equals(want) => status == *want,
            Self::AnyOf(set) => set.contains(&status),
        }
    }
}

/// Fixed-interval status poller
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    interval: Duration,
    deadline: Option<Duration>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    /// Poller with the default 5s interval and no deadline
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS))
    }

    /// Poller with a custom interval and no deadline
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
        }
    }

    /// Fail wait loops with [`OrchestratorError::Timeout`] after `deadline`
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Interval between probes
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Configured deadline, if any
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Sleep one poll interval
    pub async fn tick(&self) {
        tokio::time::sleep(self.interval).await;
    }

    /// Wait until `probe` returns exactly `target`
    pub async fn await_status<F, Fut>(&self, resource: &str, probe: F, target: &str) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        self.poll_until(resource, probe, StatusTarget::Equals(target))
            .await
    }

    /// Wait until `probe` returns any status in `terminal`
    pub async fn await_terminal<F, Fut>(
        &self,
        resource: &str,
        probe: F,
        terminal: &[&str],
    ) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        self.poll_until(resource, probe, StatusTarget::AnyOf(terminal))
            .await
    }

    /// Probe until the target is met, returning the final status
    pub async fn poll_until<F, Fut>(
        &self,
        resource: &str,
        mut probe: F,
        target: StatusTarget<'_>,
    ) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let start = Instant::now();
        let mut last_status: Option<String> = None;

        loop {
            let status = probe().await?;

            if last_status.as_deref() != Some(status.as_str()) {
                info!(resource = %resource, status = %status, "Status changed");
                last_status = Some(status.clone());
            }

            if target.is_met(&status) {
                return Ok(status);
            }

            self.check_deadline(start)?;
            self.tick().await;
        }
    }

    /// Wait until `exists` reports the resource gone
    ///
    /// Deleted RDS resources disappear rather than reaching a terminal
    /// status, so this loops on an existence check instead of a status value.
    pub async fn await_absent<F, Fut>(&self, resource: &str, mut exists: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let start = Instant::now();

        while exists().await? {
            debug!(resource = %resource, "Still present, waiting for removal");
            self.check_deadline(start)?;
            self.tick().await;
        }

        info!(resource = %resource, "Removed");
        Ok(())
    }

    fn check_deadline(&self, start: Instant) -> Result<()> {
        match self.deadline {
            Some(deadline) if start.elapsed() >= deadline => {
                Err(OrchestratorError::Timeout(deadline))
            }
            _ => Ok(()),
        }
    }
}
