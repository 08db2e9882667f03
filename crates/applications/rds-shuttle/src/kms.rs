//! Temporary cross-account KMS key sharing
//!
//! Copying an encrypted snapshot into another account requires that account
//! to be able to create grants on the source key. We add two statements to
//! the key's `default` policy for the duration of the copy and remove them
//! straight after:
//!
//! - `<sid>`: `kms:CreateGrant` for the target account roots
//! - `<sid>-b`: the same, conditioned on `kms:GrantIsForAWSResource`
//!
//! The statement id is derived from the sorted set of target account names,
//! so a later unshare with the same accounts (in any order) finds exactly the
//! statements the share added.

use crate::cloud::{AccountDirectory, KmsApi, Scope};
use crate::error::{OrchestratorError, Result};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Prefix of every temporary statement id
const SID_PREFIX: &str = "temporary permissions ";

/// Suffix of the resource-scoped statement
const SCOPED_SID_SUFFIX: &str = "-b";

/// Key references starting with this are resolved through the alias list
const ALIAS_PREFIX: &str = "alias/";

/// Deterministic statement id for a set of account names
///
/// Names are de-duplicated and sorted before hashing, so input order never
/// changes the result.
pub fn grant_statement_id(accounts: &[String]) -> String {
    let sorted: BTreeSet<&str> = accounts.iter().map(String::as_str).collect();
    let joined = sorted.into_iter().collect::<Vec<_>>().join(" ");
    format!("{}{:x}", SID_PREFIX, md5::compute(joined.as_bytes()))
}

/// Append the primary and resource-scoped grant statements to a policy
///
/// Statements already carrying either id are replaced, keeping the policy
/// free of duplicate ids when a share is repeated.
pub fn add_grant_statements(policy: &mut Value, sid: &str, principals: &[String]) -> Result<()> {
    let statements = statements_mut(policy)?;
    let scoped_sid = format!("{}{}", sid, SCOPED_SID_SUFFIX);
    statements.retain(|s| !has_sid(s, sid) && !has_sid(s, &scoped_sid));

    statements.push(json!({
        "Sid": sid,
        "Effect": "Allow",
        "Principal": { "AWS": principals },
        "Action": ["kms:CreateGrant"],
        "Resource": "*"
    }));
    statements.push(json!({
        "Sid": scoped_sid,
        "Effect": "Allow",
        "Principal": { "AWS": principals },
        "Action": ["kms:CreateGrant"],
        "Resource": "*",
        "Condition": {
            "Bool": { "kms:GrantIsForAWSResource": "true" }
        }
    }));
    Ok(())
}

/// Remove both grant statements for `sid`, returning how many were removed
pub fn remove_grant_statements(policy: &mut Value, sid: &str) -> Result<usize> {
    let statements = statements_mut(policy)?;
    let scoped_sid = format!("{}{}", sid, SCOPED_SID_SUFFIX);
    let before = statements.len();
    statements.retain(|s| !has_sid(s, sid) && !has_sid(s, &scoped_sid));
    Ok(before - statements.len())
}

fn statements_mut(policy: &mut Value) -> Result<&mut Vec<Value>> {
    policy
        .get_mut("Statement")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| OrchestratorError::config("key policy has no Statement list"))
}

fn has_sid(statement: &Value, sid: &str) -> bool {
    statement.get("Sid").and_then(Value::as_str) == Some(sid)
}

/// Adds and removes temporary key-policy grants
pub struct KeyShareManager {
    kms: Arc<dyn KmsApi>,
    accounts: Arc<dyn AccountDirectory>,
}

impl KeyShareManager {
    /// Create a new key share manager
    pub fn new(kms: Arc<dyn KmsApi>, accounts: Arc<dyn AccountDirectory>) -> Self {
        Self { kms, accounts }
    }

    /// Resolve `alias/...` references to a key id; anything else is returned as is
    pub async fn resolve_key_id(&self, scope: &Scope, key: &str) -> Result<String> {
        if !key.starts_with(ALIAS_PREFIX) {
            return Ok(key.to_string());
        }

        let mut marker = None;
        loop {
            let page = self.kms.list_aliases(scope, marker).await?;

            if let Some(key_id) = page
                .aliases
                .into_iter()
                .find(|(name, _)| name == key)
                .and_then(|(_, target)| target)
            {
                debug!(alias = %key, key_id = %key_id, "Resolved key alias");
                return Ok(key_id);
            }

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => return Err(OrchestratorError::KeyAliasNotFound(key.to_string())),
            }
        }
    }

    /// Grant `kms:CreateGrant` on a key to the target accounts
    pub async fn share_key(&self, scope: &Scope, key: &str, target_accounts: &[String]) -> Result<()> {
        let principals = target_accounts
            .iter()
            .map(|account| {
                self.accounts
                    .account_id(account)
                    .map(|id| format!("arn:aws:iam::{}:root", id))
            })
            .collect::<Result<Vec<_>>>()?;

        let key_id = self.resolve_key_id(scope, key).await?;
        let mut policy = self.load_policy(scope, &key_id).await?;
        let sid = grant_statement_id(target_accounts);

        add_grant_statements(&mut policy, &sid, &principals)?;

        info!(
            scope = %scope,
            key_id = %key_id,
            accounts = %target_accounts.join(" "),
            "Sharing KMS key"
        );
        self.store_policy(scope, &key_id, &policy).await
    }

    /// Remove the statements a matching [`share_key`](Self::share_key) added
    pub async fn unshare_key(
        &self,
        scope: &Scope,
        key: &str,
        target_accounts: &[String],
    ) -> Result<()> {
        let key_id = self.resolve_key_id(scope, key).await?;
        let mut policy = self.load_policy(scope, &key_id).await?;
        let sid = grant_statement_id(target_accounts);

        let removed = remove_grant_statements(&mut policy, &sid)?;
        if removed == 0 {
            debug!(key_id = %key_id, sid = %sid, "No temporary statements present");
        }

        info!(
            scope = %scope,
            key_id = %key_id,
            accounts = %target_accounts.join(" "),
            removed,
            "Unsharing KMS key"
        );
        self.store_policy(scope, &key_id, &policy).await
    }

    async fn load_policy(&self, scope: &Scope, key_id: &str) -> Result<Value> {
        let text = self.kms.get_key_policy(scope, key_id).await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn store_policy(&self, scope: &Scope, key_id: &str, policy: &Value) -> Result<()> {
        let document = serde_json::to_string(policy)?;
        let result = self.kms.put_key_policy(scope, key_id, &document).await;

        if let Err(OrchestratorError::MalformedPolicy { policy, .. }) = &result {
            error!(key_id = %key_id, policy = %policy, "KMS rejected key policy as malformed");
        }
        result
    }
}
