//! Cloud collaborator interfaces
//!
//! The orchestration core never talks to AWS directly. Every service it
//! drives is reached through one of the traits below, and every call carries
//! the [`Scope`] (account name + region) it should run in. The concrete SDK
//! implementations live in [`crate::aws`]; tests use an in-memory fake.

use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use std::fmt;

/// Snapshot/instance status reported once a resource is usable
pub const STATUS_AVAILABLE: &str = "available";

/// Snapshot status reported when creation or copy failed
pub const STATUS_FAILED: &str = "failed";

/// Account + region pair that every cloud call is issued against
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    /// Logical account name (resolved through the [`AccountDirectory`])
    pub account: String,
    /// AWS region
    pub region: String,
}

impl Scope {
    /// Create a new scope
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
        }
    }

    /// Same account, regardless of region
    pub fn same_account(&self, other: &Scope) -> bool {
        self.account == other.account
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.region)
    }
}

/// Describe result for a DB instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescription {
    /// Current status string (e.g. "available", "modifying")
    pub status: String,
    /// KMS key the instance storage is encrypted with, if any
    pub kms_key_id: Option<String>,
}

/// Parameters for restoring a DB instance from a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    /// Identifier of the instance to create
    pub instance_name: String,
    /// Snapshot to restore from (in the same account/region)
    pub snapshot_name: String,
    /// DB instance class (e.g. "db.t3.medium")
    pub instance_class: String,
    /// DB subnet group name
    pub subnet_group: Option<String>,
    /// Deploy across availability zones
    pub multi_az: bool,
    /// Publicly accessible endpoint
    pub public: bool,
    /// Option group name
    pub option_group: Option<String>,
    /// Storage type (e.g. "gp2", "gp3")
    pub storage_type: String,
}

/// Partial update applied to an existing DB instance
#[derive(Clone, Default, PartialEq, Eq)]
pub struct InstanceModification {
    /// VPC security group ids
    pub security_groups: Option<Vec<String>>,
    /// New master user password
    pub master_password: Option<String>,
    /// DB parameter group name
    pub parameter_group: Option<String>,
}

impl InstanceModification {
    /// True when no field is set, i.e. there is nothing to send
    pub fn is_empty(&self) -> bool {
        self.security_groups.is_none()
            && self.master_password.is_none()
            && self.parameter_group.is_none()
    }
}

impl fmt::Debug for InstanceModification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceModification")
            .field("security_groups", &self.security_groups)
            .field(
                "master_password",
                &self.master_password.as_ref().map(|_| "<redacted>"),
            )
            .field("parameter_group", &self.parameter_group)
            .finish()
    }
}

/// Autoscaling processes to suspend or resume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalingProcesses {
    /// Every scaling process of the group
    All,
    /// Only the named processes (e.g. "Launch", "AlarmNotification")
    Named(Vec<String>),
}

impl ScalingProcesses {
    /// Parse a CLI value: `all` (any case) or a comma-separated process list
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }

        let names: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() {
            return Err(OrchestratorError::config(
                "autoscaling process list is empty",
            ));
        }
        Ok(Self::Named(names))
    }

    /// Process names to send, `None` meaning all processes
    pub fn as_names(&self) -> Option<Vec<String>> {
        match self {
            Self::All => None,
            Self::Named(names) => Some(names.clone()),
        }
    }
}

impl fmt::Display for ScalingProcesses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Named(names) => write!(f, "{}", names.join(",")),
        }
    }
}

/// One page of a KMS alias listing
#[derive(Debug, Clone, Default)]
pub struct AliasPage {
    /// `(alias name, target key id)` pairs
    pub aliases: Vec<(String, Option<String>)>,
    /// Marker for the next page, `None` on the last page
    pub next_marker: Option<String>,
}

/// One page of a command invocation listing
#[derive(Debug, Clone, Default)]
pub struct InvocationPage {
    /// Instance ids the command was dispatched to
    pub instance_ids: Vec<String>,
    /// Token for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// Resolves logical account names to numeric ids and assumable roles
pub trait AccountDirectory: Send + Sync {
    /// Numeric account id for a logical name
    fn account_id(&self, account: &str) -> Result<String>;

    /// Role ARN to assume for the account
    fn role_arn(&self, account: &str) -> Result<String>;
}

/// RDS snapshot and instance operations
#[async_trait]
pub trait RdsApi: Send + Sync {
    /// Current snapshot status; `SnapshotNotFound` when absent
    async fn snapshot_status(&self, scope: &Scope, snapshot: &str) -> Result<String>;

    /// Start a manual snapshot of an instance
    async fn create_snapshot(&self, scope: &Scope, instance: &str, snapshot: &str) -> Result<()>;

    /// Delete a manual snapshot
    async fn delete_snapshot(&self, scope: &Scope, snapshot: &str) -> Result<()>;

    /// Grant restore permission on a snapshot to the given account ids
    async fn add_restore_permission(
        &self,
        scope: &Scope,
        snapshot: &str,
        account_ids: &[String],
    ) -> Result<()>;

    /// Copy a snapshot (referenced by ARN) into `scope`
    async fn copy_snapshot(
        &self,
        scope: &Scope,
        source_arn: &str,
        target_snapshot: &str,
        kms_key: Option<&str>,
    ) -> Result<()>;

    /// Describe an instance; `InstanceNotFound` when absent
    async fn describe_instance(&self, scope: &Scope, instance: &str)
        -> Result<InstanceDescription>;

    /// Restore a new instance from a snapshot (tags copied)
    async fn restore_instance(&self, scope: &Scope, request: &RestoreRequest) -> Result<()>;

    /// Apply a partial modification to an instance
    async fn modify_instance(
        &self,
        scope: &Scope,
        instance: &str,
        changes: &InstanceModification,
    ) -> Result<()>;

    /// Reboot an instance
    async fn reboot_instance(&self, scope: &Scope, instance: &str) -> Result<()>;

    /// Delete an instance without a final snapshot
    async fn delete_instance(&self, scope: &Scope, instance: &str) -> Result<()>;
}

/// KMS key policy operations
#[async_trait]
pub trait KmsApi: Send + Sync {
    /// Fetch one page of key aliases
    async fn list_aliases(&self, scope: &Scope, marker: Option<String>) -> Result<AliasPage>;

    /// Fetch the `default` key policy document
    async fn get_key_policy(&self, scope: &Scope, key_id: &str) -> Result<String>;

    /// Replace the `default` key policy; `MalformedPolicy` when rejected as malformed
    async fn put_key_policy(&self, scope: &Scope, key_id: &str, policy: &str) -> Result<()>;
}

/// SSM parameter store and Run Command operations
#[async_trait]
pub trait SsmApi: Send + Sync {
    /// Decrypted value of a parameter
    async fn get_parameter(&self, scope: &Scope, name: &str) -> Result<String>;

    /// Dispatch a document to every instance whose `Name` tag matches; returns the command id
    async fn send_command(&self, scope: &Scope, document: &str, name_tag: &str) -> Result<String>;

    /// Fetch one page of the invocation list for a command
    async fn list_invocations(
        &self,
        scope: &Scope,
        command_id: &str,
        next_token: Option<String>,
    ) -> Result<InvocationPage>;

    /// Overall status of a command (e.g. "Pending", "InProgress", "Success")
    async fn command_status(&self, scope: &Scope, command_id: &str) -> Result<String>;

    /// Status of one instance's invocation (e.g. "InProgress", "Success")
    async fn invocation_status(
        &self,
        scope: &Scope,
        command_id: &str,
        instance_id: &str,
    ) -> Result<String>;
}

/// Autoscaling group process control
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    /// Suspend processes of a group
    async fn suspend_processes(
        &self,
        scope: &Scope,
        group: &str,
        processes: &ScalingProcesses,
    ) -> Result<()>;

    /// Resume processes of a group
    async fn resume_processes(
        &self,
        scope: &Scope,
        group: &str,
        processes: &ScalingProcesses,
    ) -> Result<()>;
}
