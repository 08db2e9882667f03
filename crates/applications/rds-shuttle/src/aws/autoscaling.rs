//! Autoscaling process suspend/resume

use super::{aws_error, SessionCache};
use crate::cloud::{AutoScalingApi, ScalingProcesses, Scope};
use crate::error::Result;
use async_trait::async_trait;
use aws_sdk_autoscaling::Client;
use std::sync::Arc;

/// Autoscaling backed by the AWS SDK
pub struct AwsAutoScaling {
    sessions: Arc<SessionCache>,
}

impl AwsAutoScaling {
    /// Create a new autoscaling wrapper
    pub fn new(sessions: Arc<SessionCache>) -> Self {
        Self { sessions }
    }

    async fn client(&self, scope: &Scope) -> Result<Client> {
        Ok(Client::new(&self.sessions.config_for(scope).await?))
    }
}

#[async_trait]
impl AutoScalingApi for AwsAutoScaling {
    async fn suspend_processes(
        &self,
        scope: &Scope,
        group: &str,
        processes: &ScalingProcesses,
    ) -> Result<()> {
        // No process list means every process
        self.client(scope)
            .await?
            .suspend_processes()
            .auto_scaling_group_name(group)
            .set_scaling_processes(processes.as_names())
            .send()
            .await
            .map_err(|e| aws_error("Autoscaling suspend_processes", e))?;
        Ok(())
    }

    async fn resume_processes(
        &self,
        scope: &Scope,
        group: &str,
        processes: &ScalingProcesses,
    ) -> Result<()> {
        self.client(scope)
            .await?
            .resume_processes()
            .auto_scaling_group_name(group)
            .set_scaling_processes(processes.as_names())
            .send()
            .await
            .map_err(|e| aws_error("Autoscaling resume_processes", e))?;
        Ok(())
    }
}
