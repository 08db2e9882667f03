//! Per-account assumed-role sessions
//!
//! Every account in the registry is reached by assuming its role through STS.
//! Credentials are cached per account name and reused until they are within
//! [`REFRESH_MARGIN_SECS`] of expiring. The SDK configuration built from them is
//! cached per region alongside, so clients share one HTTP connector until the
//! credentials are replaced.

use crate::cloud::{AccountDirectory, Scope};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_types::region::Region;
use aws_types::SdkConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Default assumed-role session length (8 hours)
pub const DEFAULT_SESSION_DURATION_SECS: i32 = 28_800;

/// Credentials this close to expiry are refreshed
pub const REFRESH_MARGIN_SECS: u64 = 60;

/// Session name used when `$USER` is unset
const FALLBACK_SESSION_NAME: &str = "rds-shuttle";

/// Produces fresh credentials for an account
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Obtain new credentials for `account`
    async fn credentials(&self, account: &str) -> Result<Credentials>;
}

/// Assumes each account's registered role through STS
pub struct StsCredentialSource {
    sts: aws_sdk_sts::Client,
    accounts: Arc<dyn AccountDirectory>,
    session_name: String,
    duration_secs: i32,
}

impl StsCredentialSource {
    /// Create a source using the ambient credentials for the STS calls
    pub async fn from_env(accounts: Arc<dyn AccountDirectory>, duration_secs: i32) -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self {
            sts: aws_sdk_sts::Client::new(&config),
            accounts,
            session_name: session_name(),
            duration_secs,
        }
    }
}

#[async_trait]
impl CredentialSource for StsCredentialSource {
    async fn credentials(&self, account: &str) -> Result<Credentials> {
        let role_arn = self.accounts.role_arn(account)?;
        info!(account = %account, role_arn = %role_arn, "Assuming role");

        let response = self
            .sts
            .assume_role()
            .role_arn(&role_arn)
            .role_session_name(&self.session_name)
            .duration_seconds(self.duration_secs)
            .send()
            .await
            .map_err(|e| super::aws_error("STS assume_role", e))?;

        let creds = response.credentials().ok_or_else(|| {
            OrchestratorError::AwsService(format!("assume_role for {} returned no credentials", account))
        })?;
        let expiry = SystemTime::try_from(*creds.expiration()).map_err(OrchestratorError::from_aws)?;

        Ok(Credentials::new(
            creds.access_key_id(),
            creds.secret_access_key(),
            Some(creds.session_token().to_string()),
            Some(expiry),
            "rds-shuttle-sts",
        ))
    }
}

/// Session name for assumed roles: the local user name
fn session_name() -> String {
    std::env::var("USER")
        .ok()
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| FALLBACK_SESSION_NAME.to_string())
}

/// True when credentials must be refreshed before use
fn needs_refresh(creds: &Credentials, now: SystemTime) -> bool {
    match creds.expiry() {
        Some(expiry) => now + Duration::from_secs(REFRESH_MARGIN_SECS) >= expiry,
        None => false,
    }
}

/// Credentials for one account and the configs built from them, by region
struct Session {
    credentials: Credentials,
    configs: HashMap<String, SdkConfig>,
}

impl Session {
    fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            configs: HashMap::new(),
        }
    }
}

/// Credential and SDK config cache keyed by account name
pub struct SessionCache {
    source: Arc<dyn CredentialSource>,
    cache: Mutex<HashMap<String, Session>>,
}

impl SessionCache {
    /// Create an empty cache over a credential source
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cached credentials for `account`, refreshed when close to expiry
    pub async fn credentials(&self, account: &str) -> Result<Credentials> {
        let mut cache = self.cache.lock().await;
        Ok(self.session(&mut cache, account).await?.credentials.clone())
    }

    /// SDK configuration for calls in `scope`
    ///
    /// Built once per region and reused until the account's credentials are
    /// refreshed.
    pub async fn config_for(&self, scope: &Scope) -> Result<SdkConfig> {
        let mut cache = self.cache.lock().await;
        let session = self.session(&mut cache, &scope.account).await?;

        if let Some(config) = session.configs.get(&scope.region) {
            return Ok(config.clone());
        }

        debug!(scope = %scope, "Building SDK config");
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(scope.region.clone()))
            .credentials_provider(session.credentials.clone())
            .load()
            .await;
        session.configs.insert(scope.region.clone(), config.clone());
        Ok(config)
    }

    async fn session<'a>(
        &self,
        cache: &'a mut HashMap<String, Session>,
        account: &str,
    ) -> Result<&'a mut Session> {
        let stale = match cache.get(account) {
            Some(session) => needs_refresh(&session.credentials, SystemTime::now()),
            None => true,
        };

        if stale {
            if cache.contains_key(account) {
                debug!(account = %account, "Cached credentials expiring, refreshing");
            }
            let creds = self.source.credentials(account).await?;
            cache.insert(account.to_string(), Session::new(creds));
        }

        cache
            .get_mut(account)
            .ok_or_else(|| OrchestratorError::config(format!("no session for account {}", account)))
    }

    #[cfg(test)]
    async fn cached_configs(&self, account: &str) -> usize {
        self.cache
            .lock()
            .await
            .get(account)
            .map_or(0, |session| session.configs.len())
    }
}
