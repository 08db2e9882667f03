//! RDS snapshot management
//!
//! Creates, shares, copies and deletes manual DB snapshots across accounts
//! and regions. Snapshot identity is (account, region, name) and creation is
//! destructive: an existing snapshot with the same name is deleted first.

use crate::cloud::{AccountDirectory, RdsApi, Scope, STATUS_AVAILABLE, STATUS_FAILED};
use crate::error::Result;
use crate::poller::Poller;
use std::sync::Arc;
use tracing::{info, warn};

/// States a snapshot must be in before it can be deleted
const DELETABLE_STATES: [&str; 2] = [STATUS_AVAILABLE, STATUS_FAILED];

/// Cross-account/region snapshot copy request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotCopy {
    /// Where the snapshot currently lives
    pub source: Scope,
    /// Where the copy should land
    pub dest: Scope,
    /// Source snapshot name
    pub snapshot: String,
    /// Name of the copy in the destination
    pub dest_snapshot: String,
    /// Re-encrypt the copy under this key
    pub kms_key: Option<String>,
}

impl SnapshotCopy {
    /// True when source and destination are the same account and region
    pub fn is_noop(&self) -> bool {
        self.source == self.dest
    }
}

/// Snapshot lifecycle manager
pub struct SnapshotManager {
    rds: Arc<dyn RdsApi>,
    accounts: Arc<dyn AccountDirectory>,
    poller: Poller,
}

impl SnapshotManager {
    /// Create a new snapshot manager
    pub fn new(rds: Arc<dyn RdsApi>, accounts: Arc<dyn AccountDirectory>, poller: Poller) -> Self {
        Self {
            rds,
            accounts,
            poller,
        }
    }

    /// Check whether a snapshot exists
    pub async fn snapshot_exists(&self, scope: &Scope, name: &str) -> Result<bool> {
        match self.rds.snapshot_status(scope, name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Snapshot `instance` as `name`, replacing any existing snapshot of that name
    pub async fn create_snapshot(
        &self,
        scope: &Scope,
        instance: &str,
        name: &str,
        wait: bool,
    ) -> Result<()> {
        if self.snapshot_exists(scope, name).await? {
            warn!(scope = %scope, snapshot = %name, "Snapshot exists, replacing it");
            self.delete_and_wait(scope, name).await?;
        }

        info!(
            scope = %scope,
            snapshot = %name,
            instance = %instance,
            "Creating snapshot"
        );
        self.rds.create_snapshot(scope, instance, name).await?;

        if wait {
            self.wait_available(scope, name).await?;
        }
        Ok(())
    }

    /// Grant restore permission on a snapshot to other accounts
    ///
    /// Account names are resolved to ids before anything is sent, so an
    /// unknown account fails without touching the snapshot.
    pub async fn share_snapshot(
        &self,
        scope: &Scope,
        name: &str,
        target_accounts: &[String],
    ) -> Result<()> {
        let account_ids = target_accounts
            .iter()
            .map(|account| self.accounts.account_id(account))
            .collect::<Result<Vec<_>>>()?;

        info!(
            scope = %scope,
            snapshot = %name,
            accounts = %target_accounts.join(" "),
            "Sharing snapshot"
        );
        self.rds
            .add_restore_permission(scope, name, &account_ids)
            .await
    }

    /// Copy a snapshot into another account and/or region
    ///
    /// Returns `false` without issuing any call when source and destination
    /// are the same account and region.
    pub async fn copy_snapshot(&self, copy: &SnapshotCopy, wait: bool) -> Result<bool> {
        if copy.is_noop() {
            info!(
                scope = %copy.source,
                snapshot = %copy.snapshot,
                "Source and destination match, skipping copy"
            );
            return Ok(false);
        }

        let source_arn = self.snapshot_arn(&copy.source, &copy.snapshot)?;

        if self.snapshot_exists(&copy.dest, &copy.dest_snapshot).await? {
            warn!(
                scope = %copy.dest,
                snapshot = %copy.dest_snapshot,
                "Destination snapshot exists, replacing it"
            );
            self.delete_and_wait(&copy.dest, &copy.dest_snapshot).await?;
        }

        info!(
            source = %copy.source,
            dest = %copy.dest,
            snapshot = %copy.snapshot,
            dest_snapshot = %copy.dest_snapshot,
            "Copying snapshot"
        );
        self.rds
            .copy_snapshot(
                &copy.dest,
                &source_arn,
                &copy.dest_snapshot,
                copy.kms_key.as_deref(),
            )
            .await?;

        if wait {
            self.wait_available(&copy.dest, &copy.dest_snapshot).await?;
        }
        Ok(true)
    }

    /// Delete a snapshot once it is in a deletable state
    ///
    /// Does not wait for the deletion to finish.
    pub async fn delete_snapshot(&self, scope: &Scope, name: &str) -> Result<()> {
        info!(scope = %scope, snapshot = %name, "Deleting snapshot");

        let rds = &*self.rds;
        self.poller
            .await_terminal(
                &format!("snapshot {}", name),
                move || rds.snapshot_status(scope, name),
                &DELETABLE_STATES,
            )
            .await?;

        self.rds.delete_snapshot(scope, name).await
    }

    /// Fully-qualified snapshot ARN for use as a copy source
    pub fn snapshot_arn(&self, scope: &Scope, name: &str) -> Result<String> {
        let account_id = self.accounts.account_id(&scope.account)?;
        Ok(format!(
            "arn:aws:rds:{}:{}:snapshot:{}",
            scope.region, account_id, name
        ))
    }

    /// Delete and wait until the name is free again
    async fn delete_and_wait(&self, scope: &Scope, name: &str) -> Result<()> {
        self.delete_snapshot(scope, name).await?;
        self.poller
            .await_absent(&format!("snapshot {}", name), || {
                self.snapshot_exists(scope, name)
            })
            .await
    }

    async fn wait_available(&self, scope: &Scope, name: &str) -> Result<()> {
        let rds = &*self.rds;
        self.poller
            .await_status(
                &format!("snapshot {}", name),
                move || rds.snapshot_status(scope, name),
                STATUS_AVAILABLE,
            )
            .await?;
        Ok(())
    }
}
