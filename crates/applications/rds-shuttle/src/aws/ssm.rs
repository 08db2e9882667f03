//! SSM parameter store and Run Command calls

use super::{aws_error, SessionCache};
use crate::cloud::{InvocationPage, Scope, SsmApi};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use aws_sdk_ssm::types::Target;
use aws_sdk_ssm::Client;
use std::sync::Arc;

/// Run Command target key selecting instances by their `Name` tag
const NAME_TAG_TARGET: &str = "tag:Name";

/// SSM backed by the AWS SDK
pub struct AwsSsm {
    sessions: Arc<SessionCache>,
}

impl AwsSsm {
    /// Create a new SSM wrapper
    pub fn new(sessions: Arc<SessionCache>) -> Self {
        Self { sessions }
    }

    async fn client(&self, scope: &Scope) -> Result<Client> {
        Ok(Client::new(&self.sessions.config_for(scope).await?))
    }
}

#[async_trait]
impl SsmApi for AwsSsm {
    async fn get_parameter(&self, scope: &Scope, name: &str) -> Result<String> {
        let response = self
            .client(scope)
            .await?
            .get_parameter()
            .name(name)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| aws_error("SSM get_parameter", e))?;

        response
            .parameter()
            .and_then(|p| p.value())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::AwsService(format!("parameter {} has no value", name)))
    }

    async fn send_command(&self, scope: &Scope, document: &str, name_tag: &str) -> Result<String> {
        let target = Target::builder()
            .key(NAME_TAG_TARGET)
            .values(name_tag)
            .build();

        let response = self
            .client(scope)
            .await?
            .send_command()
            .document_name(document)
            .targets(target)
            .send()
            .await
            .map_err(|e| aws_error("SSM send_command", e))?;

        response
            .command()
            .and_then(|c| c.command_id())
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::AwsService("SSM response missing command_id".to_string()))
    }

    async fn list_invocations(
        &self,
        scope: &Scope,
        command_id: &str,
        next_token: Option<String>,
    ) -> Result<InvocationPage> {
        let response = self
            .client(scope)
            .await?
            .list_command_invocations()
            .command_id(command_id)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| aws_error("SSM list_command_invocations", e))?;

        Ok(InvocationPage {
            instance_ids: response
                .command_invocations()
                .iter()
                .filter_map(|inv| inv.instance_id().map(str::to_string))
                .collect(),
            next_token: response.next_token().map(str::to_string),
        })
    }

    async fn command_status(&self, scope: &Scope, command_id: &str) -> Result<String> {
        let response = self
            .client(scope)
            .await?
            .list_commands()
            .command_id(command_id)
            .send()
            .await
            .map_err(|e| aws_error("SSM list_commands", e))?;

        Ok(response
            .commands()
            .first()
            .and_then(|c| c.status())
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "Pending".to_string()))
    }

    async fn invocation_status(
        &self,
        scope: &Scope,
        command_id: &str,
        instance_id: &str,
    ) -> Result<String> {
        let response = self
            .client(scope)
            .await?
            .get_command_invocation()
            .command_id(command_id)
            .instance_id(instance_id)
            .send()
            .await
            .map_err(|e| aws_error("SSM get_command_invocation", e))?;

        Ok(response
            .status()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "Pending".to_string()))
    }
}
