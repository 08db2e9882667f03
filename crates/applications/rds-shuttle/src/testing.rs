//! In-memory cloud used by unit tests
//!
//! Every trait call is appended to an ordered log as a single string
//! (`"rds.create_snapshot staging/ap-southeast-2 db1 snap1"`), so tests can
//! assert exact call sequences. Resources carry a queue of statuses: each
//! probe returns the front and pops it while more than one remains, so the
//! last status sticks. Deleted instances and snapshots drain their queue and
//! then vanish.

use crate::accounts::AccountRegistry;
use crate::cloud::{
    AliasPage, AutoScalingApi, InstanceDescription, InstanceModification, InvocationPage, KmsApi,
    RdsApi, RestoreRequest, ScalingProcesses, Scope, SsmApi, STATUS_AVAILABLE, STATUS_FAILED,
};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Registry with three accounts: staging, production and analytics
pub(crate) fn registry() -> AccountRegistry {
    AccountRegistry::new([
        ("staging", "arn:aws:iam::111111111111:role/rds-shuttle"),
        ("production", "arn:aws:iam::222222222222:role/rds-shuttle"),
        ("analytics", "arn:aws:iam::333333333333:role/rds-shuttle"),
    ])
}

/// Call prefixes that only read state
const READ_ONLY_CALLS: [&str; 8] = [
    "rds.snapshot_status",
    "rds.describe_instance",
    "kms.list_aliases",
    "kms.get_key_policy",
    "ssm.get_parameter",
    "ssm.list_invocations",
    "ssm.command_status",
    "ssm.invocation_status",
];

/// Invocation statuses for instances without a scripted sequence
const DEFAULT_INVOCATION: [&str; 2] = ["InProgress", "Success"];

#[derive(Debug)]
struct Resource {
    statuses: VecDeque<String>,
    vanish: bool,
}

impl Resource {
    fn new(statuses: &[&str]) -> Self {
        Self {
            statuses: statuses.iter().map(|s| s.to_string()).collect(),
            vanish: false,
        }
    }

    fn current(&self) -> &str {
        self.statuses.front().map(String::as_str).unwrap_or(STATUS_AVAILABLE)
    }

    /// Return the current status and step the queue; `true` once it should vanish
    fn advance(&mut self) -> (String, bool) {
        let status = self.current().to_string();
        if self.statuses.len() > 1 {
            self.statuses.pop_front();
            (status, false)
        } else {
            (status, self.vanish)
        }
    }

    fn transition(&mut self, statuses: &[&str]) {
        *self = Self::new(statuses);
    }
}

#[derive(Debug)]
struct Instance {
    resource: Resource,
    kms_key_id: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<String>,
    snapshots: HashMap<(Scope, String), Resource>,
    instances: HashMap<(Scope, String), Instance>,
    key_policies: HashMap<String, String>,
    alias_pages: Vec<AliasPage>,
    reject_policies: bool,
    fail_copies: bool,
    parameters: HashMap<String, String>,
    tag_targets: HashMap<String, Vec<String>>,
    invocations: HashMap<String, VecDeque<String>>,
    commands: HashMap<String, Vec<String>>,
    unlisted_probes: usize,
    hidden_listings: HashMap<String, usize>,
}

/// In-memory implementation of every cloud trait
#[derive(Debug, Default)]
pub(crate) struct FakeCloud {
    state: Mutex<State>,
}

impl FakeCloud {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_snapshot(self, scope: &Scope, name: &str, statuses: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .insert((scope.clone(), name.to_string()), Resource::new(statuses));
        self
    }

    pub(crate) fn with_instance(
        self,
        scope: &Scope,
        name: &str,
        statuses: &[&str],
        kms_key_id: Option<&str>,
    ) -> Self {
        self.state.lock().unwrap().instances.insert(
            (scope.clone(), name.to_string()),
            Instance {
                resource: Resource::new(statuses),
                kms_key_id: kms_key_id.map(str::to_string),
            },
        );
        self
    }

    pub(crate) fn with_key_policy(self, key_id: &str, policy: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .key_policies
            .insert(key_id.to_string(), policy.to_string());
        self
    }

    /// Alias pages are served in order; markers are assigned by the fake
    pub(crate) fn with_alias_pages(self, pages: Vec<AliasPage>) -> Self {
        self.state.lock().unwrap().alias_pages = pages;
        self
    }

    /// Reject every key policy write as malformed
    pub(crate) fn rejecting_policies(self) -> Self {
        self.state.lock().unwrap().reject_policies = true;
        self
    }

    /// Fail every snapshot copy
    pub(crate) fn failing_copies(self) -> Self {
        self.state.lock().unwrap().fail_copies = true;
        self
    }

    pub(crate) fn with_parameter(self, name: &str, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .parameters
            .insert(name.to_string(), value.to_string());
        self
    }

    pub(crate) fn with_tag_targets(self, name_tag: &str, instance_ids: &[&str]) -> Self {
        self.state.lock().unwrap().tag_targets.insert(
            name_tag.to_string(),
            instance_ids.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Commands list no invocations for their first `probes` listings
    pub(crate) fn with_unlisted_probes(self, probes: usize) -> Self {
        self.state.lock().unwrap().unlisted_probes = probes;
        self
    }

    pub(crate) fn with_invocation_statuses(self, instance_id: &str, statuses: &[&str]) -> Self {
        self.state.lock().unwrap().invocations.insert(
            instance_id.to_string(),
            statuses.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Every recorded call, in order
    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Recorded calls minus status probes and other reads
    pub(crate) fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| !READ_ONLY_CALLS.iter().any(|p| call.starts_with(p)))
            .collect()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    /// Peek at a snapshot status without recording a call or advancing it
    pub(crate) fn snapshot_status_now(&self, scope: &Scope, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .get(&(scope.clone(), name.to_string()))
            .map(|s| s.current().to_string())
    }

    pub(crate) fn key_policy(&self, key_id: &str) -> Option<String> {
        self.state.lock().unwrap().key_policies.get(key_id).cloned()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn key(scope: &Scope, name: &str) -> (Scope, String) {
    (scope.clone(), name.to_string())
}

fn or_dash(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

#[async_trait]
impl RdsApi for FakeCloud {
    async fn snapshot_status(&self, scope: &Scope, snapshot: &str) -> Result<String> {
        self.record(format!("rds.snapshot_status {} {}", scope, snapshot));
        let mut state = self.state.lock().unwrap();
        let (status, vanish) = state
            .snapshots
            .get_mut(&key(scope, snapshot))
            .map(Resource::advance)
            .ok_or_else(|| OrchestratorError::SnapshotNotFound(snapshot.to_string()))?;
        if vanish {
            state.snapshots.remove(&key(scope, snapshot));
        }
        Ok(status)
    }

    async fn create_snapshot(&self, scope: &Scope, instance: &str, snapshot: &str) -> Result<()> {
        self.record(format!("rds.create_snapshot {} {} {}", scope, instance, snapshot));
        let mut state = self.state.lock().unwrap();
        if state.snapshots.contains_key(&key(scope, snapshot)) {
            return Err(OrchestratorError::from_aws("DBSnapshotAlreadyExists"));
        }
        state
            .snapshots
            .insert(key(scope, snapshot), Resource::new(&["creating", STATUS_AVAILABLE]));
        Ok(())
    }

    async fn delete_snapshot(&self, scope: &Scope, snapshot: &str) -> Result<()> {
        self.record(format!("rds.delete_snapshot {} {}", scope, snapshot));
        let mut state = self.state.lock().unwrap();
        let entry = state
            .snapshots
            .get_mut(&key(scope, snapshot))
            .ok_or_else(|| OrchestratorError::SnapshotNotFound(snapshot.to_string()))?;
        let status = entry.current();
        if status != STATUS_AVAILABLE && status != STATUS_FAILED {
            return Err(OrchestratorError::from_aws("InvalidDBSnapshotState"));
        }
        entry.transition(&["deleting", "deleting"]);
        entry.vanish = true;
        Ok(())
    }

    async fn add_restore_permission(
        &self,
        scope: &Scope,
        snapshot: &str,
        account_ids: &[String],
    ) -> Result<()> {
        self.record(format!(
            "rds.add_restore_permission {} {} {}",
            scope,
            snapshot,
            account_ids.join(",")
        ));
        if !self.state.lock().unwrap().snapshots.contains_key(&key(scope, snapshot)) {
            return Err(OrchestratorError::SnapshotNotFound(snapshot.to_string()));
        }
        Ok(())
    }

    async fn copy_snapshot(
        &self,
        scope: &Scope,
        source_arn: &str,
        target_snapshot: &str,
        kms_key: Option<&str>,
    ) -> Result<()> {
        self.record(format!(
            "rds.copy_snapshot {} {} {} {}",
            scope,
            source_arn,
            target_snapshot,
            or_dash(kms_key)
        ));
        let mut state = self.state.lock().unwrap();
        if state.fail_copies {
            return Err(OrchestratorError::from_aws("KMSKeyNotAccessibleFault"));
        }
        state.snapshots.insert(
            key(scope, target_snapshot),
            Resource::new(&["creating", STATUS_AVAILABLE]),
        );
        Ok(())
    }

    async fn describe_instance(&self, scope: &Scope, instance: &str) -> Result<InstanceDescription> {
        self.record(format!("rds.describe_instance {} {}", scope, instance));
        let mut state = self.state.lock().unwrap();
        let entry = state
            .instances
            .get_mut(&key(scope, instance))
            .ok_or_else(|| OrchestratorError::InstanceNotFound(instance.to_string()))?;
        let (status, vanish) = entry.resource.advance();
        let description = InstanceDescription {
            status,
            kms_key_id: entry.kms_key_id.clone(),
        };
        if vanish {
            state.instances.remove(&key(scope, instance));
        }
        Ok(description)
    }

    async fn restore_instance(&self, scope: &Scope, request: &RestoreRequest) -> Result<()> {
        self.record(format!(
            "rds.restore_instance {} {} {} {} {}",
            scope,
            request.instance_name,
            request.snapshot_name,
            request.instance_class,
            request.storage_type
        ));
        let mut state = self.state.lock().unwrap();
        if state.instances.contains_key(&key(scope, &request.instance_name)) {
            return Err(OrchestratorError::from_aws("DBInstanceAlreadyExists"));
        }
        state.instances.insert(
            key(scope, &request.instance_name),
            Instance {
                resource: Resource::new(&["creating", "backing-up", STATUS_AVAILABLE]),
                kms_key_id: None,
            },
        );
        Ok(())
    }

    async fn modify_instance(
        &self,
        scope: &Scope,
        instance: &str,
        changes: &InstanceModification,
    ) -> Result<()> {
        let groups = changes.security_groups.as_ref().map(|g| g.join(","));
        self.record(format!(
            "rds.modify_instance {} {} sg={} password={} pg={}",
            scope,
            instance,
            or_dash(groups.as_deref()),
            if changes.master_password.is_some() { "set" } else { "-" },
            or_dash(changes.parameter_group.as_deref())
        ));
        let mut state = self.state.lock().unwrap();
        let entry = state
            .instances
            .get_mut(&key(scope, instance))
            .ok_or_else(|| OrchestratorError::InstanceNotFound(instance.to_string()))?;
        entry.resource.transition(&["modifying", STATUS_AVAILABLE]);
        Ok(())
    }

    async fn reboot_instance(&self, scope: &Scope, instance: &str) -> Result<()> {
        self.record(format!("rds.reboot_instance {} {}", scope, instance));
        let mut state = self.state.lock().unwrap();
        let entry = state
            .instances
            .get_mut(&key(scope, instance))
            .ok_or_else(|| OrchestratorError::InstanceNotFound(instance.to_string()))?;
        if entry.resource.current() != STATUS_AVAILABLE {
            return Err(OrchestratorError::from_aws("InvalidDBInstanceState"));
        }
        entry.resource.transition(&["rebooting", STATUS_AVAILABLE]);
        Ok(())
    }

    async fn delete_instance(&self, scope: &Scope, instance: &str) -> Result<()> {
        self.record(format!("rds.delete_instance {} {}", scope, instance));
        let mut state = self.state.lock().unwrap();
        let entry = state
            .instances
            .get_mut(&key(scope, instance))
            .ok_or_else(|| OrchestratorError::InstanceNotFound(instance.to_string()))?;
        entry.resource.transition(&["deleting", "deleting"]);
        entry.resource.vanish = true;
        Ok(())
    }
}

#[async_trait]
impl KmsApi for FakeCloud {
    async fn list_aliases(&self, scope: &Scope, marker: Option<String>) -> Result<AliasPage> {
        self.record(format!("kms.list_aliases {} {}", scope, or_dash(marker.as_deref())));
        let state = self.state.lock().unwrap();
        let index = marker.and_then(|m| m.parse::<usize>().ok()).unwrap_or(0);

        let aliases = state
            .alias_pages
            .get(index)
            .map(|page| page.aliases.clone())
            .unwrap_or_default();
        let next_marker = (index + 1 < state.alias_pages.len()).then(|| (index + 1).to_string());

        Ok(AliasPage {
            aliases,
            next_marker,
        })
    }

    async fn get_key_policy(&self, scope: &Scope, key_id: &str) -> Result<String> {
        self.record(format!("kms.get_key_policy {} {}", scope, key_id));
        self.state
            .lock()
            .unwrap()
            .key_policies
            .get(key_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::from_aws(format!("NotFoundException: {}", key_id)))
    }

    async fn put_key_policy(&self, scope: &Scope, key_id: &str, policy: &str) -> Result<()> {
        self.record(format!("kms.put_key_policy {} {}", scope, key_id));
        let mut state = self.state.lock().unwrap();
        if state.reject_policies {
            return Err(OrchestratorError::MalformedPolicy {
                key_id: key_id.to_string(),
                policy: policy.to_string(),
            });
        }
        state
            .key_policies
            .insert(key_id.to_string(), policy.to_string());
        Ok(())
    }
}

#[async_trait]
impl SsmApi for FakeCloud {
    async fn get_parameter(&self, scope: &Scope, name: &str) -> Result<String> {
        self.record(format!("ssm.get_parameter {} {}", scope, name));
        self.state
            .lock()
            .unwrap()
            .parameters
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::from_aws(format!("ParameterNotFound: {}", name)))
    }

    async fn send_command(&self, scope: &Scope, document: &str, name_tag: &str) -> Result<String> {
        self.record(format!("ssm.send_command {} {} {}", scope, document, name_tag));
        let mut state = self.state.lock().unwrap();
        let command_id = format!("cmd-{}", state.commands.len() + 1);
        let targets = state.tag_targets.get(name_tag).cloned().unwrap_or_default();
        state.commands.insert(command_id.clone(), targets);
        let hidden = state.unlisted_probes;
        state.hidden_listings.insert(command_id.clone(), hidden);
        Ok(command_id)
    }

    async fn list_invocations(
        &self,
        scope: &Scope,
        command_id: &str,
        next_token: Option<String>,
    ) -> Result<InvocationPage> {
        self.record(format!(
            "ssm.list_invocations {} {} {}",
            scope,
            command_id,
            or_dash(next_token.as_deref())
        ));
        let mut state = self.state.lock().unwrap();
        if let Some(hidden) = state.hidden_listings.get_mut(command_id).filter(|n| **n > 0) {
            *hidden -= 1;
            return Ok(InvocationPage::default());
        }
        let targets = state
            .commands
            .get(command_id)
            .ok_or_else(|| OrchestratorError::from_aws(format!("InvalidCommandId: {}", command_id)))?;
        let index = next_token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);

        // One instance per page
        Ok(InvocationPage {
            instance_ids: targets.get(index).cloned().into_iter().collect(),
            next_token: (index + 1 < targets.len()).then(|| (index + 1).to_string()),
        })
    }

    async fn command_status(&self, scope: &Scope, command_id: &str) -> Result<String> {
        self.record(format!("ssm.command_status {} {}", scope, command_id));
        let state = self.state.lock().unwrap();
        let targets = state
            .commands
            .get(command_id)
            .ok_or_else(|| OrchestratorError::from_aws(format!("InvalidCommandId: {}", command_id)))?;
        Ok(if targets.is_empty() { "Success" } else { "InProgress" }.to_string())
    }

    async fn invocation_status(
        &self,
        scope: &Scope,
        command_id: &str,
        instance_id: &str,
    ) -> Result<String> {
        self.record(format!(
            "ssm.invocation_status {} {} {}",
            scope, command_id, instance_id
        ));
        let mut state = self.state.lock().unwrap();
        let queue = state
            .invocations
            .entry(instance_id.to_string())
            .or_insert_with(|| DEFAULT_INVOCATION.iter().map(|s| s.to_string()).collect());
        let status = queue.front().cloned().unwrap_or_else(|| "Success".to_string());
        if queue.len() > 1 {
            queue.pop_front();
        }
        Ok(status)
    }
}

#[async_trait]
impl AutoScalingApi for FakeCloud {
    async fn suspend_processes(
        &self,
        scope: &Scope,
        group: &str,
        processes: &ScalingProcesses,
    ) -> Result<()> {
        self.record(format!("asg.suspend_processes {} {} {}", scope, group, processes));
        Ok(())
    }

    async fn resume_processes(
        &self,
        scope: &Scope,
        group: &str,
        processes: &ScalingProcesses,
    ) -> Result<()> {
        self.record(format!("asg.resume_processes {} {} {}", scope, group, processes));
        Ok(())
    }
}
