//! Metershare CLI - command-line interface for the usage sharing engine
//!
//! Stands in for the host application: composes the facade from the real
//! adapters and exposes sync, query, profile, delete-my-data, probe, and
//! setup commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use metershare_core::config::{Config, LocalContext};
use metershare_core::ports::clock::SystemClock;
use metershare_core::ports::credential::ICredentialProvider;
use metershare_facade::{Facade, FacadeDeps, ProvisionedResources};
use metershare_query::{GroupDimension, QueryFilters};
use metershare_rollup::{FsSessionSource, StatsCacheFile};
use metershare_sync::CycleOutcome;
use metershare_table::{AzureTableClient, CredentialChain, CredentialValidator, SharedKeyStore};

#[derive(Debug, Parser)]
#[command(name = "metershare", version, about = "Privacy-scoped team usage rollups")]
struct Cli {
    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync cycle now, or keep syncing on the schedule
    Sync {
        /// Keep running, syncing on the interval derived from the
        /// lookback window
        #[arg(long)]
        watch: bool,
    },
    /// Query aggregated usage from the shared table
    Query {
        /// Start of the date range (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// End of the date range (YYYY-MM-DD), inclusive
        #[arg(long)]
        end: NaiveDate,
        /// Restrict to one model
        #[arg(long)]
        model: Option<String>,
        /// Restrict to one user id
        #[arg(long)]
        user: Option<String>,
        /// Dimension to group by: day, model, workspace, machine, user
        #[arg(long, default_value = "user")]
        group_by: String,
    },
    /// Change the sharing profile
    Profile {
        /// off, soloFull, teamAnonymized, teamPseudonymous, teamIdentified
        profile: String,
        /// Record consent for a more disclosive profile
        #[arg(long)]
        consent: bool,
    },
    /// Delete every shared row belonging to a user id
    DeleteUser {
        /// The user id as it appears in shared rows
        user_id: String,
    },
    /// Probe credentials and table permissions
    Probe,
    /// Store the result of the provisioning wizard
    Setup {
        #[arg(long)]
        subscription_id: String,
        #[arg(long)]
        resource_group: String,
        #[arg(long)]
        storage_account: String,
        #[arg(long)]
        table_name: String,
        /// Store this account key in the OS keyring (shared-key auth)
        #[arg(long)]
        account_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path);

    match cli.command {
        Commands::Sync { watch } => run_sync(config, config_path, watch).await,
        Commands::Query {
            start,
            end,
            model,
            user,
            group_by,
        } => run_query(config, config_path, start, end, model, user, &group_by).await,
        Commands::Profile { profile, consent } => {
            run_profile(config, config_path, &profile, consent).await
        }
        Commands::DeleteUser { user_id } => run_delete_user(config, config_path, &user_id).await,
        Commands::Probe => run_probe(config, config_path).await,
        Commands::Setup {
            subscription_id,
            resource_group,
            storage_account,
            table_name,
            account_key,
        } => {
            run_setup(
                config,
                config_path,
                ProvisionedResources {
                    subscription_id,
                    resource_group,
                    storage_account,
                    table_name,
                },
                account_key,
            )
            .await
        }
    }
}

/// Builds the facade from the real adapters
async fn build_facade(config: Config, config_path: PathBuf) -> Result<Facade> {
    config.validate().context(
        "Configuration is incomplete; run 'metershare setup' and edit the config file",
    )?;

    let chain = Arc::new(CredentialChain::new(config.table.storage_account.clone()));
    let credential = chain
        .get_credential(config.table.auth_mode)
        .await
        .context("Could not resolve a credential")?;
    let store = Arc::new(AzureTableClient::new(&config.table, credential)?);
    let validator = Arc::new(CredentialValidator::new(
        chain,
        store.clone(),
        config.table.auth_mode,
        config.dataset_id()?,
    ));

    let sessions_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("metershare")
        .join("sessions");

    Facade::new(
        config,
        config_path,
        local_context(),
        FacadeDeps {
            store,
            validator,
            stats_cache: Arc::new(StatsCacheFile::new(StatsCacheFile::default_path())),
            session_source: Arc::new(FsSessionSource::new(sessions_dir)),
            clock: Arc::new(SystemClock),
        },
    )
}

/// Locally observed dimensions, derived from the environment
fn local_context() -> LocalContext {
    let machine = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-machine".to_string());
    let workspace = std::env::current_dir()
        .ok()
        .and_then(|cwd| cwd.file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "unknown-workspace".to_string());

    LocalContext {
        workspace_id: workspace.clone(),
        workspace_name: Some(workspace),
        machine_id: machine.clone(),
        machine_name: Some(machine),
        tenant_id: std::env::var("AZURE_TENANT_ID").ok(),
        object_id: std::env::var("METERSHARE_OBJECT_ID").ok(),
        team_alias: std::env::var("METERSHARE_TEAM_ALIAS").ok(),
    }
}

async fn run_sync(config: Config, config_path: PathBuf, watch: bool) -> Result<()> {
    let facade = Arc::new(build_facade(config, config_path).await?);

    if watch {
        let (mut scheduler, _handle) = facade.scheduler();
        let driver = facade.clone();
        scheduler
            .run(move || {
                let driver = driver.clone();
                async move { driver.upload_rollups().await }
            })
            .await;
        return Ok(());
    }

    match facade.upload_rollups().await {
        CycleOutcome::Completed(summary) => {
            println!(
                "Uploaded {} rows in {} batches ({} cache hits, {} misses, {} ms)",
                summary.rows_uploaded,
                summary.total_batches,
                summary.cache_hits,
                summary.cache_misses,
                summary.duration_ms
            );
            Ok(())
        }
        CycleOutcome::SharingDisabled => {
            println!("Sharing profile is off; nothing uploaded.");
            Ok(())
        }
        CycleOutcome::AlreadyRunning => {
            println!("A sync cycle is already running.");
            Ok(())
        }
        CycleOutcome::Failed(err) => {
            anyhow::bail!("Sync cycle skipped: {err}")
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_query(
    config: Config,
    config_path: PathBuf,
    start: NaiveDate,
    end: NaiveDate,
    model: Option<String>,
    user: Option<String>,
    group_by: &str,
) -> Result<()> {
    let facade = build_facade(config, config_path).await?;

    let group_by = match group_by {
        "day" => GroupDimension::Day,
        "model" => GroupDimension::Model,
        "workspace" => GroupDimension::Workspace,
        "machine" => GroupDimension::Machine,
        "user" => GroupDimension::User,
        other => anyhow::bail!("Unknown group-by dimension: {other}"),
    };

    let filters = QueryFilters {
        model,
        user_id: user,
        ..QueryFilters::range(start, end)
    };
    let result = facade
        .query_aggregates(&filters, group_by)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!(
        "{} rows scanned{}",
        result.rows_scanned,
        if result.from_cache { " (cached)" } else { "" }
    );
    for bucket in &result.buckets {
        println!(
            "{:<32} {:>12} in {:>12} out {:>8} interactions",
            bucket.key, bucket.input_tokens, bucket.output_tokens, bucket.interactions
        );
    }
    Ok(())
}

async fn run_profile(
    config: Config,
    config_path: PathBuf,
    profile: &str,
    consent: bool,
) -> Result<()> {
    let profile = match profile {
        "off" => metershare_core::domain::sharing::SharingProfile::Off,
        "soloFull" => metershare_core::domain::sharing::SharingProfile::SoloFull,
        "teamAnonymized" => metershare_core::domain::sharing::SharingProfile::TeamAnonymized,
        "teamPseudonymous" => metershare_core::domain::sharing::SharingProfile::TeamPseudonymous,
        "teamIdentified" => metershare_core::domain::sharing::SharingProfile::TeamIdentified,
        other => anyhow::bail!("Unknown sharing profile: {other}"),
    };

    let facade = build_facade(config, config_path).await?;
    let consent_at = consent.then(Utc::now);
    facade.set_sharing_profile(profile, consent_at)?;
    println!("Sharing profile set to {}", profile.as_str());
    Ok(())
}

async fn run_delete_user(config: Config, config_path: PathBuf, user_id: &str) -> Result<()> {
    let facade = build_facade(config, config_path).await?;
    let report = facade
        .delete_user_data(user_id)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!(
        "Deleted {} rows across {} partitions",
        report.rows_deleted, report.partitions_scanned
    );
    for failure in &report.failures {
        eprintln!("  {}: {}", failure.partition_key, failure.error);
    }
    if !report.failures.is_empty() {
        anyhow::bail!("{} partitions could not be cleaned", report.failures.len());
    }
    Ok(())
}

async fn run_probe(config: Config, config_path: PathBuf) -> Result<()> {
    let facade = build_facade(config, config_path).await?;
    let report = facade
        .probe_credentials()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!(
        "Credentials OK ({}): write={}, delete={}",
        report.auth_mode.as_str(),
        report.can_write,
        report.can_delete
    );
    Ok(())
}

async fn run_setup(
    mut config: Config,
    config_path: PathBuf,
    provisioned: ProvisionedResources,
    account_key: Option<String>,
) -> Result<()> {
    if let Some(key) = account_key {
        SharedKeyStore::store(&provisioned.storage_account, &key)?;
        config.table.auth_mode = metershare_core::ports::credential::AuthMode::SharedKey;
    }

    // The facade needs a valid table config to compose; apply the
    // provisioned values directly, then persist through it.
    config.table.storage_account = provisioned.storage_account.clone();
    config.table.table_name = provisioned.table_name.clone();

    let facade = build_facade(config, config_path).await?;
    facade.setup(&provisioned)?;
    println!(
        "Configured table {} in account {}",
        provisioned.table_name, provisioned.storage_account
    );
    Ok(())
}
