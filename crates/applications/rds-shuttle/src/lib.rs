//! # RDS Shuttle
//!
//! Cross-account, cross-region RDS snapshot copy and restore.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator
//! ├── SnapshotManager   create / share / copy / delete (overwrite-if-exists)
//! ├── KeyShareManager   temporary kms:CreateGrant statements on the source key
//! ├── InstanceManager   restore / modify / reboot / delete
//! ├── CommandRunner     SSM Run Command hooks around the restore
//! └── Poller            fixed-interval status polling shared by all of the above
//! ```
//!
//! All cloud access goes through the traits in [`cloud`], scoped per call to
//! an (account, region) pair. [`aws`] implements them with the AWS SDK and
//! per-account assumed-role sessions.
//!
//! ## Migration sequence
//!
//! 1. **Snapshot** the source instance and share it with the destination account
//! 2. **Share** the source KMS key for the duration of the copy
//! 3. **Copy** the snapshot into the destination account/region
//! 4. **Restore** the destination instance, apply parameters, reboot
//!
//! Autoscaling suspend/resume and SSM commands run around step 4. See
//! [`orchestrator`] for the full ordering.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accounts;
pub mod aws;
pub mod cloud;
pub mod error;
pub mod instance;
pub mod kms;
pub mod orchestrator;
pub mod plan;
pub mod poller;
pub mod remote;
pub mod snapshot;

#[cfg(test)]
mod testing;

// ============================================================================
// Public exports - Orchestration
// ============================================================================

// Orchestration
pub use orchestrator::{CloudClients, MigrationReport, Orchestrator};

// Run configuration
pub use plan::{
    pair_commands, pair_scaling, MigrationPlan, ParameterKeys, RemoteCommand, RestoreHooks,
    ScalingStep, DEFAULT_STORAGE_TYPE,
};

// Status polling
pub use poller::{Poller, StatusTarget, DEFAULT_POLL_INTERVAL_SECS};

// ============================================================================
// Public exports - Resource managers
// ============================================================================

// Snapshots
pub use snapshot::{SnapshotCopy, SnapshotManager};

// KMS key sharing
pub use kms::{grant_statement_id, KeyShareManager};

// Instance lifecycle
pub use instance::{InstanceManager, DEFAULT_SETTLE_DELAY_SECS};

// Remote execution via SSM
pub use remote::{CommandRunner, CommandSummary};

// ============================================================================
// Public exports - Core infrastructure
// ============================================================================

// Error handling
pub use error::{OrchestratorError, Result};

// Cloud interfaces
pub use cloud::{
    AccountDirectory, AutoScalingApi, KmsApi, RdsApi, ScalingProcesses, Scope, SsmApi,
};

// Account registry
pub use accounts::{AccountRegistry, DEFAULT_ACCOUNTS_FILE};
