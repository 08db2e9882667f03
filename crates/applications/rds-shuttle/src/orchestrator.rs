//! Migration orchestration
//!
//! Composes the snapshot, key-share, instance and command managers into the
//! full source -> destination sequence:
//!
//! 1. Snapshot the source instance
//! 2. Share the snapshot with the destination account (cross-account only)
//! 3. Look up the source instance's KMS key
//! 4. Temporarily share that key with the destination account (cross-account only)
//! 5. Copy the snapshot into the destination (skipped for same account + region)
//! 6. Remove the temporary key share, even if the copy failed
//! 7. Suspend autoscaling processes
//! 8. Run pre-restore SSM commands
//! 9. Restore the destination instance
//! 10. Apply security groups, password and parameter group
//! 11. Reboot
//! 12. Run post-restore SSM commands
//! 13. Resume autoscaling processes
//!
//! Every step runs to completion before the next one starts. Any error aborts
//! the remaining steps; completed steps are not rolled back.

use crate::cloud::{
    AccountDirectory, AutoScalingApi, InstanceModification, KmsApi, RdsApi, RestoreRequest, Scope,
    SsmApi,
};
use crate::error::Result;
use crate::instance::InstanceManager;
use crate::kms::KeyShareManager;
use crate::plan::{MigrationPlan, RemoteCommand, ScalingStep};
use crate::poller::Poller;
use crate::remote::{CommandRunner, CommandSummary};
use crate::snapshot::{SnapshotCopy, SnapshotManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Service handles the orchestrator drives
#[derive(Clone)]
pub struct CloudClients {
    /// RDS snapshots and instances
    pub rds: Arc<dyn RdsApi>,
    /// KMS key policies
    pub kms: Arc<dyn KmsApi>,
    /// Parameter store and Run Command
    pub ssm: Arc<dyn SsmApi>,
    /// Autoscaling process control
    pub autoscaling: Arc<dyn AutoScalingApi>,
}

impl CloudClients {
    /// Use a single backend for every service
    pub fn shared<T>(cloud: Arc<T>) -> Self
    where
        T: RdsApi + KmsApi + SsmApi + AutoScalingApi + 'static,
    {
        Self {
            rds: cloud.clone(),
            kms: cloud.clone(),
            ssm: cloud.clone(),
            autoscaling: cloud,
        }
    }
}

/// Outcome of a completed migration run
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Snapshot the destination instance was restored from
    pub restored_from: String,
    /// Whether the snapshot was copied into the destination
    pub copied: bool,
    /// Source key that was temporarily shared, if any
    pub shared_key: Option<String>,
    /// Summaries of every SSM command, pre-restore first
    pub commands: Vec<CommandSummary>,
    /// Run start time
    pub started_at: DateTime<Utc>,
    /// Run end time
    pub finished_at: DateTime<Utc>,
}

impl MigrationReport {
    /// Wall-clock duration of the run
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Commands where at least one instance didn't succeed
    pub fn failed_commands(&self) -> impl Iterator<Item = &CommandSummary> {
        self.commands.iter().filter(|c| !c.is_success())
    }
}

/// Runs one migration plan end to end
pub struct Orchestrator {
    snapshots: SnapshotManager,
    keys: KeyShareManager,
    instances: InstanceManager,
    commands: CommandRunner,
    ssm: Arc<dyn SsmApi>,
    autoscaling: Arc<dyn AutoScalingApi>,
    accounts: Arc<dyn AccountDirectory>,
}

impl Orchestrator {
    /// Create an orchestrator over the given clients
    pub fn new(clients: CloudClients, accounts: Arc<dyn AccountDirectory>, poller: Poller) -> Self {
        Self {
            snapshots: SnapshotManager::new(clients.rds.clone(), accounts.clone(), poller),
            keys: KeyShareManager::new(clients.kms, accounts.clone()),
            instances: InstanceManager::new(clients.rds, poller),
            commands: CommandRunner::new(clients.ssm.clone(), poller),
            ssm: clients.ssm,
            autoscaling: clients.autoscaling,
            accounts,
        }
    }

    /// Execute the full migration sequence
    pub async fn run(&self, plan: &MigrationPlan) -> Result<MigrationReport> {
        let started_at = Utc::now();

        // Unknown accounts fail here, before anything is created
        let source_id = self.accounts.account_id(&plan.source.account)?;
        let dest_id = self.accounts.account_id(&plan.dest.account)?;
        info!(
            source = %plan.source,
            source_id = %source_id,
            dest = %plan.dest,
            dest_id = %dest_id,
            "Starting migration"
        );

        let source = &plan.source;
        let dest = &plan.dest;
        let targets = plan.share_targets();

        self.snapshots
            .create_snapshot(source, &plan.source_instance, &plan.source_snapshot, true)
            .await?;

        if plan.is_cross_account() {
            self.snapshots
                .share_snapshot(source, &plan.source_snapshot, &targets)
                .await?;
        }

        let source_key = self.instances.kms_key_id(source, &plan.source_instance).await?;
        let shared_key = match source_key {
            Some(key) if plan.is_cross_account() => {
                self.keys.share_key(source, &key, &targets).await?;
                Some(key)
            }
            _ => None,
        };

        let copy = SnapshotCopy {
            source: source.clone(),
            dest: dest.clone(),
            snapshot: plan.source_snapshot.clone(),
            dest_snapshot: plan.dest_snapshot.clone(),
            kms_key: plan.dest_kms_key.clone(),
        };
        let copy_result = self.snapshots.copy_snapshot(&copy, true).await;

        if let Some(key) = &shared_key {
            let unshared = self.keys.unshare_key(source, key, &targets).await;
            if let Err(e) = unshared {
                if copy_result.is_err() {
                    error!(key = %key, error = %e, "Failed to unshare key after copy failure");
                } else {
                    return Err(e);
                }
            }
        }
        let copied = copy_result?;

        let restored_from = if copied {
            plan.dest_snapshot.clone()
        } else {
            plan.source_snapshot.clone()
        };

        for step in &plan.hooks.pre_scaling {
            self.suspend(dest, step).await?;
        }

        let mut commands = Vec::new();
        for command in &plan.hooks.pre_commands {
            commands.push(self.run_remote(dest, command).await?);
        }

        let restore = RestoreRequest {
            instance_name: plan.dest_instance.clone(),
            snapshot_name: restored_from.clone(),
            instance_class: plan.instance_class.clone(),
            subnet_group: self.parameter(dest, plan.parameters.subnet_group.as_deref()).await?,
            multi_az: plan.multi_az,
            public: plan.public,
            option_group: self.parameter(dest, plan.parameters.option_group.as_deref()).await?,
            storage_type: plan.storage_type.clone(),
        };
        self.instances.restore_from_snapshot(dest, &restore, true).await?;

        let changes = InstanceModification {
            security_groups: self
                .parameter(dest, plan.parameters.security_group.as_deref())
                .await?
                .map(|groups| split_list(&groups)),
            master_password: self.parameter(dest, plan.parameters.db_password.as_deref()).await?,
            parameter_group: self
                .parameter(dest, plan.parameters.parameter_group.as_deref())
                .await?,
        };
        self.instances
            .modify(dest, &plan.dest_instance, &changes, true)
            .await?;

        self.instances.reboot(dest, &plan.dest_instance, true).await?;

        for command in &plan.hooks.post_commands {
            commands.push(self.run_remote(dest, command).await?);
        }

        for step in &plan.hooks.post_scaling {
            self.resume(dest, step).await?;
        }

        let report = MigrationReport {
            restored_from,
            copied,
            shared_key,
            commands,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            instance = %plan.dest_instance,
            snapshot = %report.restored_from,
            "Migration complete"
        );
        Ok(report)
    }

    /// Fetch a parameter-store value when a key is configured
    async fn parameter(&self, scope: &Scope, name: Option<&str>) -> Result<Option<String>> {
        match name {
            Some(name) => Ok(Some(self.ssm.get_parameter(scope, name).await?)),
            None => Ok(None),
        }
    }

    async fn run_remote(&self, scope: &Scope, command: &RemoteCommand) -> Result<CommandSummary> {
        let summary = self
            .commands
            .run_command(scope, &command.document, &command.name_tag)
            .await?;

        for (instance_id, status) in summary.unsuccessful() {
            warn!(
                command_id = %summary.command_id,
                document = %summary.document,
                instance_id = %instance_id,
                status = %status,
                "Command did not succeed on instance"
            );
        }
        Ok(summary)
    }

    async fn suspend(&self, scope: &Scope, step: &ScalingStep) -> Result<()> {
        info!(group = %step.group, processes = %step.processes, "Suspending autoscaling processes");
        self.autoscaling
            .suspend_processes(scope, &step.group, &step.processes)
            .await
    }

    async fn resume(&self, scope: &Scope, step: &ScalingStep) -> Result<()> {
        info!(group = %step.group, processes = %step.processes, "Resuming autoscaling processes");
        self.autoscaling
            .resume_processes(scope, &step.group, &step.processes)
            .await
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
