//! Migration run configuration
//!
//! A [`MigrationPlan`] is the fully validated description of one
//! source -> destination run. The CLI builds it; the orchestrator only
//! consumes it. Paired hook lists are zipped here so a length mismatch is
//! reported before any AWS client exists.

use crate::cloud::{ScalingProcesses, Scope};
use crate::error::{OrchestratorError, Result};

/// Default storage type of the restored instance
pub const DEFAULT_STORAGE_TYPE: &str = "gp2";

/// An SSM document to run against instances with a given `Name` tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    /// SSM document name
    pub document: String,
    /// `Name` tag value of the target instances
    pub name_tag: String,
}

/// Suspend or resume processes of one autoscaling group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingStep {
    /// Processes to act on
    pub processes: ScalingProcesses,
    /// Autoscaling group name
    pub group: String,
}

/// Parameter-store keys resolved in the destination account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterKeys {
    /// VPC security group id
    pub security_group: Option<String>,
    /// Master user password
    pub db_password: Option<String>,
    /// DB subnet group name
    pub subnet_group: Option<String>,
    /// Option group name
    pub option_group: Option<String>,
    /// DB parameter group name
    pub parameter_group: Option<String>,
}

/// Hooks run around the restore window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreHooks {
    /// Autoscaling suspends before the restore
    pub pre_scaling: Vec<ScalingStep>,
    /// Remote commands before the restore
    pub pre_commands: Vec<RemoteCommand>,
    /// Remote commands after the reboot
    pub post_commands: Vec<RemoteCommand>,
    /// Autoscaling resumes after the post-restore commands
    pub post_scaling: Vec<ScalingStep>,
}

/// Everything one migration run needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Source account/region
    pub source: Scope,
    /// Instance to snapshot
    pub source_instance: String,
    /// Name of the source snapshot
    pub source_snapshot: String,
    /// Destination account/region
    pub dest: Scope,
    /// Instance to restore in the destination
    pub dest_instance: String,
    /// Name of the copied snapshot in the destination
    pub dest_snapshot: String,
    /// Key to re-encrypt the copy under
    pub dest_kms_key: Option<String>,
    /// Instance class of the restored instance
    pub instance_class: String,
    /// Multi-AZ restored instance
    pub multi_az: bool,
    /// Publicly accessible restored instance
    pub public: bool,
    /// Storage type of the restored instance
    pub storage_type: String,
    /// Parameter-store keys for the restore and modify steps
    pub parameters: ParameterKeys,
    /// Pre/post restore hooks
    pub hooks: RestoreHooks,
}

impl MigrationPlan {
    /// Destination account name as a one-element share list
    pub fn share_targets(&self) -> Vec<String> {
        vec![self.dest.account.clone()]
    }

    /// True when the snapshot has to be copied out of the source account/region
    pub fn needs_copy(&self) -> bool {
        self.source != self.dest
    }

    /// True when source and destination are different accounts
    pub fn is_cross_account(&self) -> bool {
        !self.source.same_account(&self.dest)
    }
}

/// Zip SSM documents with their `Name` tag targets
pub fn pair_commands(
    label: &str,
    documents: Vec<String>,
    name_tags: Vec<String>,
) -> Result<Vec<RemoteCommand>> {
    check_lengths(label, documents.len(), name_tags.len())?;
    Ok(documents
        .into_iter()
        .zip(name_tags)
        .map(|(document, name_tag)| RemoteCommand { document, name_tag })
        .collect())
}

/// Zip autoscaling process lists with their group names
pub fn pair_scaling(
    label: &str,
    processes: Vec<String>,
    groups: Vec<String>,
) -> Result<Vec<ScalingStep>> {
    check_lengths(label, processes.len(), groups.len())?;
    processes
        .iter()
        .zip(groups)
        .map(|(processes, group)| {
            Ok(ScalingStep {
                processes: ScalingProcesses::parse(processes)?,
                group,
            })
        })
        .collect()
}

fn check_lengths(label: &str, left: usize, right: usize) -> Result<()> {
    if left != right {
        return Err(OrchestratorError::config(format!(
            "{} lists don't match: {} values vs {} targets",
            label, left, right
        )));
    }
    Ok(())
}
