//! AWS SDK implementations of the cloud traits
//!
//! Each service wrapper builds its client per call from the
//! [`SessionCache`]'s cached config, so every request runs with the
//! assumed-role credentials of the scope's account and in the scope's region.

pub mod autoscaling;
pub mod kms;
pub mod rds;
pub mod session;
pub mod ssm;

pub use autoscaling::AwsAutoScaling;
pub use kms::AwsKms;
pub use rds::AwsRds;
pub use session::{CredentialSource, SessionCache, StsCredentialSource};
pub use ssm::AwsSsm;

use crate::error::OrchestratorError;
use crate::orchestrator::CloudClients;
use aws_sdk_rds::error::DisplayErrorContext;
use std::sync::Arc;

/// SDK clients for every service, sharing one session cache
pub fn clients(sessions: Arc<SessionCache>) -> CloudClients {
    CloudClients {
        rds: Arc::new(AwsRds::new(sessions.clone())),
        kms: Arc::new(AwsKms::new(sessions.clone())),
        ssm: Arc::new(AwsSsm::new(sessions.clone())),
        autoscaling: Arc::new(AwsAutoScaling::new(sessions)),
    }
}

/// Flatten an SDK error, including its source chain, into `AwsService`
pub(crate) fn aws_error<E>(operation: &str, err: E) -> OrchestratorError
where
    E: std::error::Error,
{
    OrchestratorError::AwsService(format!("{} failed: {}", operation, DisplayErrorContext(&err)))
}
