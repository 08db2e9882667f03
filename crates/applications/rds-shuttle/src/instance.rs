//! RDS instance lifecycle management
//!
//! Restores instances from snapshots and drives them through modify/reboot
//! until they are available again. Like snapshots, instances are overwritten:
//! a same-named instance is deleted (and waited out) before a restore.

use crate::cloud::{
    InstanceModification, RdsApi, RestoreRequest, Scope, STATUS_AVAILABLE,
};
use crate::error::Result;
use crate::poller::Poller;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause after modify/reboot before status polling starts
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 10;

/// Instance lifecycle manager
pub struct InstanceManager {
    rds: Arc<dyn RdsApi>,
    poller: Poller,
    settle_delay: Duration,
}

impl InstanceManager {
    /// Create a new instance manager with the default settle delay
    pub fn new(rds: Arc<dyn RdsApi>, poller: Poller) -> Self {
        Self {
            rds,
            poller,
            settle_delay: Duration::from_secs(DEFAULT_SETTLE_DELAY_SECS),
        }
    }

    /// Override the settle delay
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Check whether an instance exists
    pub async fn instance_exists(&self, scope: &Scope, instance: &str) -> Result<bool> {
        match self.rds.describe_instance(scope, instance).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Current instance status
    pub async fn instance_status(&self, scope: &Scope, instance: &str) -> Result<String> {
        Ok(self.rds.describe_instance(scope, instance).await?.status)
    }

    /// KMS key the instance is encrypted with, `None` when unencrypted
    pub async fn kms_key_id(&self, scope: &Scope, instance: &str) -> Result<Option<String>> {
        let description = self.rds.describe_instance(scope, instance).await?;
        debug!(
            scope = %scope,
            instance = %instance,
            kms_key = ?description.kms_key_id,
            "Looked up instance encryption key"
        );
        Ok(description.kms_key_id)
    }

    /// Restore `request.instance_name` from a snapshot, replacing any existing instance
    pub async fn restore_from_snapshot(
        &self,
        scope: &Scope,
        request: &RestoreRequest,
        wait: bool,
    ) -> Result<()> {
        if self.instance_exists(scope, &request.instance_name).await? {
            warn!(
                scope = %scope,
                instance = %request.instance_name,
                "Instance exists, deleting it before restore"
            );
            self.delete(scope, &request.instance_name, true).await?;
        }

        info!(
            scope = %scope,
            instance = %request.instance_name,
            snapshot = %request.snapshot_name,
            instance_class = %request.instance_class,
            storage_type = %request.storage_type,
            multi_az = request.multi_az,
            public = request.public,
            "Restoring instance from snapshot"
        );
        self.rds.restore_instance(scope, request).await?;

        if wait {
            self.wait_available(scope, &request.instance_name).await?;
        }
        Ok(())
    }

    /// Apply security groups / password / parameter group changes
    ///
    /// Issues no call at all when `changes` is empty.
    pub async fn modify(
        &self,
        scope: &Scope,
        instance: &str,
        changes: &InstanceModification,
        wait: bool,
    ) -> Result<()> {
        if changes.is_empty() {
            debug!(instance = %instance, "No modifications requested");
            return Ok(());
        }

        info!(scope = %scope, instance = %instance, changes = ?changes, "Modifying instance");
        self.rds.modify_instance(scope, instance, changes).await?;
        self.settle().await;

        if wait {
            self.wait_available(scope, instance).await?;
        }
        Ok(())
    }

    /// Reboot an instance once it is available
    pub async fn reboot(&self, scope: &Scope, instance: &str, wait: bool) -> Result<()> {
        self.wait_available(scope, instance).await?;

        info!(scope = %scope, instance = %instance, "Rebooting instance");
        self.rds.reboot_instance(scope, instance).await?;
        self.settle().await;

        if wait {
            self.wait_available(scope, instance).await?;
        }
        Ok(())
    }

    /// Delete an instance without a final snapshot
    pub async fn delete(&self, scope: &Scope, instance: &str, wait: bool) -> Result<()> {
        info!(scope = %scope, instance = %instance, "Deleting instance");
        self.rds.delete_instance(scope, instance).await?;

        if wait {
            self.poller
                .await_absent(&format!("instance {}", instance), move || {
                    self.instance_exists(scope, instance)
                })
                .await?;
        }
        Ok(())
    }

    async fn settle(&self) {
        debug!(delay_secs = self.settle_delay.as_secs(), "Waiting for status to settle");
        tokio::time::sleep(self.settle_delay).await;
    }

    async fn wait_available(&self, scope: &Scope, instance: &str) -> Result<()> {
        self.poller
            .await_status(
                &format!("instance {}", instance),
                move || self.instance_status(scope, instance),
                STATUS_AVAILABLE,
            )
            .await?;
        Ok(())
    }
}
