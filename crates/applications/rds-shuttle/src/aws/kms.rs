//! KMS alias and key policy calls

use super::{aws_error, SessionCache};
use crate::cloud::{AliasPage, KmsApi, Scope};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use aws_sdk_kms::Client;
use std::sync::Arc;

/// Only the `default` policy exists on a KMS key
const POLICY_NAME: &str = "default";

/// KMS backed by the AWS SDK
pub struct AwsKms {
    sessions: Arc<SessionCache>,
}

impl AwsKms {
    /// Create a new KMS wrapper
    pub fn new(sessions: Arc<SessionCache>) -> Self {
        Self { sessions }
    }

    async fn client(&self, scope: &Scope) -> Result<Client> {
        Ok(Client::new(&self.sessions.config_for(scope).await?))
    }
}

#[async_trait]
impl KmsApi for AwsKms {
    async fn list_aliases(&self, scope: &Scope, marker: Option<String>) -> Result<AliasPage> {
        let response = self
            .client(scope)
            .await?
            .list_aliases()
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| aws_error("KMS list_aliases", e))?;

        let aliases = response
            .aliases()
            .iter()
            .filter_map(|alias| {
                alias
                    .alias_name()
                    .map(|name| (name.to_string(), alias.target_key_id().map(str::to_string)))
            })
            .collect();

        let next_marker = if response.truncated() {
            response.next_marker().map(str::to_string)
        } else {
            None
        };

        Ok(AliasPage {
            aliases,
            next_marker,
        })
    }

    async fn get_key_policy(&self, scope: &Scope, key_id: &str) -> Result<String> {
        let response = self
            .client(scope)
            .await?
            .get_key_policy()
            .key_id(key_id)
            .policy_name(POLICY_NAME)
            .send()
            .await
            .map_err(|e| aws_error("KMS get_key_policy", e))?;

        response
            .policy()
            .map(str::to_string)
            .ok_or_else(|| OrchestratorError::AwsService(format!("key {} has no default policy", key_id)))
    }

    async fn put_key_policy(&self, scope: &Scope, key_id: &str, policy: &str) -> Result<()> {
        self.client(scope)
            .await?
            .put_key_policy()
            .key_id(key_id)
            .policy_name(POLICY_NAME)
            .policy(policy)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|err| err.is_malformed_policy_document_exception())
                {
                    OrchestratorError::MalformedPolicy {
                        key_id: key_id.to_string(),
                        policy: policy.to_string(),
                    }
                } else {
                    aws_error("KMS put_key_policy", e)
                }
            })?;
        Ok(())
    }
}
