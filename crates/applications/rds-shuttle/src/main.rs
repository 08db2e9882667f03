//! rds-shuttle - snapshot an RDS instance and restore it in another account
//!
//! ## Usage
//!
//! ```bash
//! rds-shuttle \
//!     --source-account staging --source-instance db1 --source-snapshot-name db1-nightly \
//!     --dest-account production --dest-instance db1-copy --dest-snapshot-name db1-nightly \
//!     --instance-type db.t3.medium \
//!     --ssm-db-password /rds/password \
//!     --pre-restore-ssm-command stop-app --pre-restore-ssm-instance-names web \
//!     --post-restore-ssm-command start-app --post-restore-ssm-instance-names web
//! ```
//!
//! Account names resolve through `aws_accounts.json` (name -> role ARN).

use anyhow::Context;
use clap::Parser;
use rds_shuttle::aws::{self, SessionCache, StsCredentialSource};
use rds_shuttle::{
    pair_commands, pair_scaling, AccountRegistry, MigrationPlan, Orchestrator, ParameterKeys,
    Poller, RestoreHooks, Scope, DEFAULT_ACCOUNTS_FILE, DEFAULT_STORAGE_TYPE,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Region used for both sides unless overridden
const DEFAULT_REGION: &str = "ap-southeast-2";

/// RDS Shuttle: cross-account RDS snapshot copy and restore
#[derive(Parser, Debug)]
#[command(name = "rds-shuttle")]
#[command(about = "Copy an RDS instance into another account via snapshot", long_about = None)]
struct Cli {
    /// Account with the source DB
    #[arg(long, help_heading = "Source")]
    source_account: String,

    /// Source RDS instance name
    #[arg(long, help_heading = "Source")]
    source_instance: String,

    /// Name of snapshot to take for the source DB
    #[arg(long, help_heading = "Source")]
    source_snapshot_name: String,

    /// AWS region for the source snapshot (default: --region)
    #[arg(long, help_heading = "Source")]
    source_region: Option<String>,

    /// Account with the destination DB
    #[arg(long, help_heading = "Destination")]
    dest_account: String,

    /// Destination RDS instance name
    #[arg(long, help_heading = "Destination")]
    dest_instance: String,

    /// Name of the destination snapshot when copying the source
    #[arg(long, help_heading = "Destination")]
    dest_snapshot_name: String,

    /// AWS region for the destination (default: --region)
    #[arg(long, help_heading = "Destination")]
    dest_region: Option<String>,

    /// Destination KMS key to use when copying an encrypted snapshot
    #[arg(long, help_heading = "Destination")]
    dest_kms_key: Option<String>,

    /// Destination RDS instance type
    #[arg(long, help_heading = "Destination")]
    instance_type: String,

    /// Make the destination DB multi-AZ
    #[arg(long, help_heading = "Destination")]
    multi_az: bool,

    /// Make the destination DB publicly accessible
    #[arg(long, help_heading = "Destination")]
    public: bool,

    /// Storage type for the destination RDS instance
    #[arg(long, default_value = DEFAULT_STORAGE_TYPE, help_heading = "Destination")]
    storage_type: String,

    /// AWS region for both sides
    #[arg(long, default_value = DEFAULT_REGION)]
    region: String,

    /// SSM parameter holding the DB security group
    #[arg(long, help_heading = "SSM parameters")]
    ssm_security_group: Option<String>,

    /// SSM parameter holding the DB master password
    #[arg(long, help_heading = "SSM parameters")]
    ssm_db_password: Option<String>,

    /// SSM parameter holding the DB subnet group
    #[arg(long, help_heading = "SSM parameters")]
    ssm_subnet_group: Option<String>,

    /// SSM parameter holding the DB option group
    #[arg(long, help_heading = "SSM parameters")]
    ssm_option_group: Option<String>,

    /// SSM parameter holding the DB parameter group
    #[arg(long, help_heading = "SSM parameters")]
    ssm_parameter_group: Option<String>,

    /// SSM document to run before the restore (repeatable)
    #[arg(long, help_heading = "Pre-restore")]
    pre_restore_ssm_command: Vec<String>,

    /// Name tag of instances to run the matching pre-restore command on
    #[arg(long, help_heading = "Pre-restore")]
    pre_restore_ssm_instance_names: Vec<String>,

    /// Autoscaling processes to suspend before the restore ("all" or a comma list)
    #[arg(long, help_heading = "Pre-restore")]
    pre_restore_asg_suspend: Vec<String>,

    /// Autoscaling group for the matching suspend
    #[arg(long, help_heading = "Pre-restore")]
    pre_restore_asg_names: Vec<String>,

    /// SSM document to run after the restore (repeatable)
    #[arg(long, help_heading = "Post-restore")]
    post_restore_ssm_command: Vec<String>,

    /// Name tag of instances to run the matching post-restore command on
    #[arg(long, help_heading = "Post-restore")]
    post_restore_ssm_instance_names: Vec<String>,

    /// Autoscaling processes to resume after the restore ("all" or a comma list)
    #[arg(long, help_heading = "Post-restore")]
    post_restore_asg_resume: Vec<String>,

    /// Autoscaling group for the matching resume
    #[arg(long, help_heading = "Post-restore")]
    post_restore_asg_names: Vec<String>,

    /// Account registry file (account name -> role ARN)
    #[arg(long, default_value = DEFAULT_ACCOUNTS_FILE)]
    accounts_file: PathBuf,

    /// Assumed-role session length in seconds
    #[arg(long, default_value_t = aws::session::DEFAULT_SESSION_DURATION_SECS)]
    session_duration: i32,

    /// Give up on any single wait after this many seconds (default: wait forever)
    #[arg(long)]
    poll_deadline: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", value_parser = parse_level)]
    log_level: Level,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    /// Validate paired lists and build the run plan
    fn plan(&self) -> anyhow::Result<MigrationPlan> {
        let hooks = RestoreHooks {
            pre_scaling: pair_scaling(
                "Pre-restore autoscaling",
                self.pre_restore_asg_suspend.clone(),
                self.pre_restore_asg_names.clone(),
            )?,
            pre_commands: pair_commands(
                "Pre-restore SSM",
                self.pre_restore_ssm_command.clone(),
                self.pre_restore_ssm_instance_names.clone(),
            )?,
            post_commands: pair_commands(
                "Post-restore SSM",
                self.post_restore_ssm_command.clone(),
                self.post_restore_ssm_instance_names.clone(),
            )?,
            post_scaling: pair_scaling(
                "Post-restore autoscaling",
                self.post_restore_asg_resume.clone(),
                self.post_restore_asg_names.clone(),
            )?,
        };

        Ok(MigrationPlan {
            source: Scope::new(
                &self.source_account,
                self.source_region.as_deref().unwrap_or(&self.region),
            ),
            source_instance: self.source_instance.clone(),
            source_snapshot: self.source_snapshot_name.clone(),
            dest: Scope::new(
                &self.dest_account,
                self.dest_region.as_deref().unwrap_or(&self.region),
            ),
            dest_instance: self.dest_instance.clone(),
            dest_snapshot: self.dest_snapshot_name.clone(),
            dest_kms_key: self.dest_kms_key.clone(),
            instance_class: self.instance_type.clone(),
            multi_az: self.multi_az,
            public: self.public,
            storage_type: self.storage_type.clone(),
            parameters: ParameterKeys {
                security_group: self.ssm_security_group.clone(),
                db_password: self.ssm_db_password.clone(),
                subnet_group: self.ssm_subnet_group.clone(),
                option_group: self.ssm_option_group.clone(),
                parameter_group: self.ssm_parameter_group.clone(),
            },
            hooks,
        })
    }

    fn poller(&self) -> Poller {
        match self.poll_deadline {
            Some(secs) => Poller::new().with_deadline(Duration::from_secs(secs)),
            None => Poller::new(),
        }
    }
}

/// Parse the level flag; `warning` and `critical` are accepted for `warn` and `error`
fn parse_level(value: &str) -> Result<Level, String> {
    match value.to_ascii_lowercase().as_str() {
        "warning" => Ok(Level::WARN),
        "critical" => Ok(Level::ERROR),
        other => Level::from_str(other).map_err(|_| {
            format!(
                "unknown log level '{}' (expected error, warn, info, debug or trace)",
                value
            )
        }),
    }
}

/// Initialize tracing; the returned guard flushes the log file on drop
fn init_tracing(level: Level, log_file: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .with_context(|| format!("invalid log file path {}", path.display()))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_level, cli.log_file.as_deref())?;

    // Everything that can be checked locally fails before any AWS client exists
    let plan = cli.plan()?;
    let accounts = Arc::new(
        AccountRegistry::load(&cli.accounts_file)
            .with_context(|| format!("loading {}", cli.accounts_file.display()))?,
    );
    info!(accounts = accounts.len(), "Loaded account registry");

    let source = Arc::new(StsCredentialSource::from_env(accounts.clone(), cli.session_duration).await);
    let sessions = Arc::new(SessionCache::new(source));
    let orchestrator = Orchestrator::new(aws::clients(sessions), accounts, cli.poller());

    let report = orchestrator.run(&plan).await?;

    for command in report.failed_commands() {
        for (instance_id, status) in command.unsuccessful() {
            warn!(
                document = %command.document,
                instance_id = %instance_id,
                status = %status,
                "SSM command did not succeed"
            );
        }
    }
    info!(
        restored_from = %report.restored_from,
        copied = report.copied,
        duration_secs = report.duration().num_seconds(),
        "Migration finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
