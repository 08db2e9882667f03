//! Remote execution via AWS SSM
//!
//! Runs an SSM document on every instance whose `Name` tag matches a value
//! and blocks until each targeted instance has finished, one way or another.
//!
//! SSM may list no invocations for a short while after dispatch, so the
//! listing is retried until it is non-empty or the command itself reaches a
//! terminal status.
//!
//! Completion only means every invocation reached a terminal status. A
//! `Failed` invocation is reported in the returned [`CommandSummary`] but is
//! not turned into an error here.
//!
//! ## Prerequisites
//!
//! Target instances must have:
//! - SSM Agent installed (Amazon Linux 2/2023 have it by default)
//! - IAM instance profile with `AmazonSSMManagedInstanceCore` policy

use crate::cloud::{Scope, SsmApi};
use crate::error::Result;
use crate::poller::Poller;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Invocation statuses after which no further transition happens
pub const TERMINAL_STATUSES: [&str; 4] = ["Success", "Cancelled", "Failed", "TimedOut"];

/// Status of a finished invocation that ran to completion
pub const STATUS_SUCCESS: &str = "Success";

/// Check whether an invocation status is terminal
pub fn is_terminal(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// Terminal statuses of one dispatched command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSummary {
    /// SSM command ID
    pub command_id: String,

    /// SSM document that was run
    pub document: String,

    /// Terminal status per targeted instance
    pub statuses: BTreeMap<String, String>,
}

impl CommandSummary {
    /// Instances whose invocation did not end in `Success`
    pub fn unsuccessful(&self) -> Vec<(&str, &str)> {
        self.statuses
            .iter()
            .filter(|(_, status)| status.as_str() != STATUS_SUCCESS)
            .map(|(id, status)| (id.as_str(), status.as_str()))
            .collect()
    }

    /// Check if every invocation succeeded
    pub fn is_success(&self) -> bool {
        self.unsuccessful().is_empty()
    }
}

/// Remote command runner using AWS SSM
pub struct CommandRunner {
    ssm: Arc<dyn SsmApi>,
    poller: Poller,
}

impl CommandRunner {
    /// Create a new command runner
    pub fn new(ssm: Arc<dyn SsmApi>, poller: Poller) -> Self {
        Self { ssm, poller }
    }

    /// Run `document` on every instance tagged `Name=<name_tag>` and wait for all of them
    pub async fn run_command(&self, scope: &Scope, document: &str, name_tag: &str) -> Result<CommandSummary> {
        info!(
            scope = %scope,
            document = %document,
            name_tag = %name_tag,
            "Sending SSM command"
        );

        let command_id = self.ssm.send_command(scope, document, name_tag).await?;
        let instances = self.await_targets(scope, &command_id).await?;

        if instances.is_empty() {
            warn!(command_id = %command_id, name_tag = %name_tag, "Command matched no instances");
        } else {
            info!(
                command_id = %command_id,
                instances = instances.len(),
                "Waiting for command to finish executing"
            );
        }

        let statuses = self.wait_for_command(scope, &command_id, &instances).await?;
        info!(command_id = %command_id, "Command finished on all instances");

        Ok(CommandSummary {
            command_id,
            document: document.to_string(),
            statuses,
        })
    }

    /// Wait for the invocation listing to fill in
    ///
    /// Returns an empty list only once the command itself is terminal, which
    /// means it matched no instances.
    async fn await_targets(&self, scope: &Scope, command_id: &str) -> Result<Vec<String>> {
        loop {
            let instances = self.invocation_targets(scope, command_id).await?;
            if !instances.is_empty() {
                return Ok(instances);
            }

            let status = self.ssm.command_status(scope, command_id).await?;
            if is_terminal(&status) {
                return Ok(instances);
            }
            debug!(command_id = %command_id, status = %status, "No invocations listed yet");
            self.poller.tick().await;
        }
    }

    /// Instance ids selected for a command, collected across every page
    pub async fn invocation_targets(&self, scope: &Scope, command_id: &str) -> Result<Vec<String>> {
        let mut instances = Vec::new();
        let mut next_token = None;

        loop {
            let page = self
                .ssm
                .list_invocations(scope, command_id, next_token)
                .await?;
            instances.extend(page.instance_ids);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(instances)
    }

    /// Poll every pending instance each round until all are terminal
    async fn wait_for_command(
        &self,
        scope: &Scope,
        command_id: &str,
        instances: &[String],
    ) -> Result<BTreeMap<String, String>> {
        let mut pending: Vec<&str> = instances.iter().map(String::as_str).collect();
        let mut finished = BTreeMap::new();

        while !pending.is_empty() {
            let mut still_running = Vec::with_capacity(pending.len());

            for instance_id in pending {
                let status = self
                    .ssm
                    .invocation_status(scope, command_id, instance_id)
                    .await?;

                if is_terminal(&status) {
                    info!(
                        command_id = %command_id,
                        instance_id = %instance_id,
                        status = %status,
                        "Command finished on instance"
                    );
                    finished.insert(instance_id.to_string(), status);
                } else {
                    debug!(
                        command_id = %command_id,
                        instance_id = %instance_id,
                        status = %status,
                        "SSM command still running"
                    );
                    still_running.push(instance_id);
                }
            }

            pending = still_running;
            if !pending.is_empty() {
                self.poller.tick().await;
            }
        }

        Ok(finished)
    }
}
