//! Account registry
//!
//! Maps logical account names to the role ARN the tool assumes in that
//! account. The registry file is a flat JSON object:
//!
//! ```json
//! {
//!   "staging": "arn:aws:iam::111111111111:role/rds-shuttle",
//!   "production": "arn:aws:iam::222222222222:role/rds-shuttle"
//! }
//! ```

use crate::cloud::AccountDirectory;
use crate::error::{OrchestratorError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Default registry file name, looked up in the working directory
pub const DEFAULT_ACCOUNTS_FILE: &str = "aws_accounts.json";

/// Account name -> role ARN registry
#[derive(Debug, Clone, Default)]
pub struct AccountRegistry {
    roles: BTreeMap<String, String>,
}

impl AccountRegistry {
    /// Build a registry from name/ARN pairs
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            roles: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse a registry from its JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        let roles: BTreeMap<String, String> = serde_json::from_str(json)?;
        Ok(Self { roles })
    }

    /// Load a registry file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading account registry");
        let json = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::config(format!(
                "cannot read account registry {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    /// Number of registered accounts
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// True when no account is registered
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl AccountDirectory for AccountRegistry {
    fn account_id(&self, account: &str) -> Result<String> {
        if is_account_id(account) {
            return Ok(account.to_string());
        }
        let arn = self.role_arn(account)?;
        account_id_from_arn(&arn)
    }

    fn role_arn(&self, account: &str) -> Result<String> {
        self.roles
            .get(account)
            .cloned()
            .ok_or_else(|| OrchestratorError::config(format!("ARN for account {} not found", account)))
    }
}

/// True for a bare 12-digit style numeric account id
fn is_account_id(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

/// Extract the account id field of an IAM ARN (`arn:aws:iam::<id>:role/...`)
pub fn account_id_from_arn(arn: &str) -> Result<String> {
    arn.split(':')
        .nth(4)
        .filter(|id| is_account_id(id))
        .map(str::to_string)
        .ok_or_else(|| OrchestratorError::config(format!("no account id in ARN {}", arn)))
}
