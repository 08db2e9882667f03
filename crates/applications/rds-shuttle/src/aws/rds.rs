//! RDS snapshot and instance calls

use super::{aws_error, SessionCache};
use crate::cloud::{InstanceDescription, InstanceModification, RdsApi, RestoreRequest, Scope};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use aws_sdk_rds::Client;
use std::sync::Arc;
use tracing::debug;

/// Snapshot attribute that controls cross-account restore permission
const RESTORE_ATTRIBUTE: &str = "restore";

/// RDS backed by the AWS SDK
pub struct AwsRds {
    sessions: Arc<SessionCache>,
}

impl AwsRds {
    /// Create a new RDS wrapper
    pub fn new(sessions: Arc<SessionCache>) -> Self {
        Self { sessions }
    }

    async fn client(&self, scope: &Scope) -> Result<Client> {
        Ok(Client::new(&self.sessions.config_for(scope).await?))
    }
}

#[async_trait]
impl RdsApi for AwsRds {
    async fn snapshot_status(&self, scope: &Scope, snapshot: &str) -> Result<String> {
        let response = self
            .client(scope)
            .await?
            .describe_db_snapshots()
            .db_snapshot_identifier(snapshot)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|err| err.is_db_snapshot_not_found_fault())
                {
                    OrchestratorError::SnapshotNotFound(snapshot.to_string())
                } else {
                    aws_error("RDS describe_db_snapshots", e)
                }
            })?;

        response
            .db_snapshots()
            .first()
            .and_then(|s| s.status())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::SnapshotNotFound(snapshot.to_string()))
    }

    async fn create_snapshot(&self, scope: &Scope, instance: &str, snapshot: &str) -> Result<()> {
        self.client(scope)
            .await?
            .create_db_snapshot()
            .db_instance_identifier(instance)
            .db_snapshot_identifier(snapshot)
            .send()
            .await
            .map_err(|e| aws_error("RDS create_db_snapshot", e))?;
        Ok(())
    }

    async fn delete_snapshot(&self, scope: &Scope, snapshot: &str) -> Result<()> {
        self.client(scope)
            .await?
            .delete_db_snapshot()
            .db_snapshot_identifier(snapshot)
            .send()
            .await
            .map_err(|e| aws_error("RDS delete_db_snapshot", e))?;
        Ok(())
    }

    async fn add_restore_permission(
        &self,
        scope: &Scope,
        snapshot: &str,
        account_ids: &[String],
    ) -> Result<()> {
        self.client(scope)
            .await?
            .modify_db_snapshot_attribute()
            .db_snapshot_identifier(snapshot)
            .attribute_name(RESTORE_ATTRIBUTE)
            .set_values_to_add(Some(account_ids.to_vec()))
            .send()
            .await
            .map_err(|e| aws_error("RDS modify_db_snapshot_attribute", e))?;
        Ok(())
    }

    async fn copy_snapshot(
        &self,
        scope: &Scope,
        source_arn: &str,
        target_snapshot: &str,
        kms_key: Option<&str>,
    ) -> Result<()> {
        self.client(scope)
            .await?
            .copy_db_snapshot()
            .source_db_snapshot_identifier(source_arn)
            .target_db_snapshot_identifier(target_snapshot)
            .set_kms_key_id(kms_key.map(str::to_string))
            .copy_tags(true)
            .send()
            .await
            .map_err(|e| aws_error("RDS copy_db_snapshot", e))?;
        Ok(())
    }

    async fn describe_instance(&self, scope: &Scope, instance: &str) -> Result<InstanceDescription> {
        let response = self
            .client(scope)
            .await?
            .describe_db_instances()
            .db_instance_identifier(instance)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|err| err.is_db_instance_not_found_fault())
                {
                    OrchestratorError::InstanceNotFound(instance.to_string())
                } else {
                    aws_error("RDS describe_db_instances", e)
                }
            })?;

        let db = response
            .db_instances()
            .first()
            .ok_or_else(|| OrchestratorError::InstanceNotFound(instance.to_string()))?;

        Ok(InstanceDescription {
            status: db.db_instance_status().unwrap_or_default().to_string(),
            kms_key_id: db.kms_key_id().map(str::to_string),
        })
    }

    async fn restore_instance(&self, scope: &Scope, request: &RestoreRequest) -> Result<()> {
        debug!(request = ?request, "Restore request");
        self.client(scope)
            .await?
            .restore_db_instance_from_db_snapshot()
            .db_instance_identifier(&request.instance_name)
            .db_snapshot_identifier(&request.snapshot_name)
            .db_instance_class(&request.instance_class)
            .set_db_subnet_group_name(request.subnet_group.clone())
            .multi_az(request.multi_az)
            .publicly_accessible(request.public)
            .set_option_group_name(request.option_group.clone())
            .storage_type(&request.storage_type)
            .copy_tags_to_snapshot(true)
            .send()
            .await
            .map_err(|e| aws_error("RDS restore_db_instance_from_db_snapshot", e))?;
        Ok(())
    }

    async fn modify_instance(
        &self,
        scope: &Scope,
        instance: &str,
        changes: &InstanceModification,
    ) -> Result<()> {
        self.client(scope)
            .await?
            .modify_db_instance()
            .db_instance_identifier(instance)
            .set_vpc_security_group_ids(changes.security_groups.clone())
            .set_master_user_password(changes.master_password.clone())
            .set_db_parameter_group_name(changes.parameter_group.clone())
            .apply_immediately(true)
            .send()
            .await
            .map_err(|e| aws_error("RDS modify_db_instance", e))?;
        Ok(())
    }

    async fn reboot_instance(&self, scope: &Scope, instance: &str) -> Result<()> {
        self.client(scope)
            .await?
            .reboot_db_instance()
            .db_instance_identifier(instance)
            .send()
            .await
            .map_err(|e| aws_error("RDS reboot_db_instance", e))?;
        Ok(())
    }

    async fn delete_instance(&self, scope: &Scope, instance: &str) -> Result<()> {
        self.client(scope)
            .await?
            .delete_db_instance()
            .db_instance_identifier(instance)
            .skip_final_snapshot(true)
            .delete_automated_backups(true)
            .send()
            .await
            .map_err(|e| aws_error("RDS delete_db_instance", e))?;
        Ok(())
    }
}
