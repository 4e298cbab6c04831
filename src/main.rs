//! hcdeploy: deploy declarative health checks to a monitoring platform.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use healthcheck_deployer::checks::probe::Probes;
use healthcheck_deployer::config::{load_document, Violation};
use healthcheck_deployer::engine::Deployer;
use healthcheck_deployer::remote::{PlatformClient, RemoteApi, RemoteError, ResourceKind};
use healthcheck_deployer::state::FileStateStore;

#[derive(Parser)]
#[command(name = "hcdeploy")]
#[command(about = "Deploy declarative health checks to a monitoring platform", long_about = None)]
struct Cli {
    /// State file recording deployed resources.
    #[arg(long, default_value = ".hcdeploy-state.json")]
    state_file: PathBuf,

    /// Platform API base URL.
    #[arg(long, env = "HC_API_URL", default_value = "https://api.monitoring.example.com")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a configuration file against the platform
    Deploy {
        file: PathBuf,
        /// Restrict the run to one check name
        #[arg(long)]
        check: Option<String>,
        /// Compute and print the plan without remote calls
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a configuration file and print every violation
    Validate {
        file: PathBuf,
        /// Stop after structural resolution, skipping semantic rules
        #[arg(long)]
        schema_only: bool,
    },
    /// Execute probes locally and print outcomes
    Run {
        file: PathBuf,
        #[arg(long)]
        check: Option<String>,
    },
    /// List deployed checks from the state store
    List {
        /// Keep only checks carrying this tag (queries the platform)
        #[arg(long)]
        tag: Option<String>,
        /// Keep only checks of this type (queries the platform)
        #[arg(long, value_name = "TYPE")]
        check_type: Option<String>,
    },
    /// Delete a deployed check and its dependents
    Delete {
        name: String,
        /// Leave derived monitors and SLOs in place
        #[arg(long)]
        keep_monitors: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healthcheck_deployer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let exit_code = execute(cli).await?;
    std::process::exit(exit_code);
}

async fn execute(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Validate { file, schema_only } => {
            let doc = load_document(&file)?;
            let violations = if schema_only {
                let (_, violations) = healthcheck_deployer::config::normalize(&doc);
                violations
            } else {
                let (_, violations) = Deployer::resolve(&doc);
                violations
            };
            print_violations(&violations);
            Ok(if violations.is_empty() { 0 } else { 1 })
        }

        Commands::Deploy {
            file,
            check,
            dry_run,
        } => {
            let doc = load_document(&file)?;
            let deployer = build_deployer(&cli.state_file, &cli.api_url, !dry_run)?;
            let report = deployer.deploy(&doc, check.as_deref(), dry_run).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            let summary = report.summary();
            tracing::info!(
                created = summary.created,
                updated = summary.updated,
                deleted = summary.deleted,
                unchanged = summary.unchanged,
                failed = summary.failed,
                "Deploy finished"
            );
            Ok(if report.success() { 0 } else { 1 })
        }

        Commands::Run { file, check } => {
            let doc = load_document(&file)?;
            let deployer = build_deployer(&cli.state_file, &cli.api_url, false)?;
            let report = deployer.run_checks(&doc, check.as_deref()).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.success() { 0 } else { 1 })
        }

        Commands::List { tag, check_type } => {
            let needs_platform = tag.is_some() || check_type.is_some();
            let remote = platform_client(&cli.api_url, needs_platform)?;
            let deployer = build_deployer_with(&cli.state_file, Arc::clone(&remote))?;

            let mut listed = Vec::new();
            for (name, record) in deployer.list().await? {
                if needs_platform {
                    match remote.get(ResourceKind::Check, &record.remote_id).await {
                        Ok(body) => {
                            if let Some(tag) = &tag {
                                let has_tag = body["tags"]
                                    .as_array()
                                    .map(|tags| tags.iter().any(|t| t.as_str() == Some(tag)))
                                    .unwrap_or(false);
                                if !has_tag {
                                    continue;
                                }
                            }
                            if let Some(check_type) = &check_type {
                                if body["type"].as_str() != Some(check_type) {
                                    continue;
                                }
                            }
                        }
                        Err(RemoteError::NotFound) => {
                            tracing::warn!(
                                check = %name,
                                remote_id = %record.remote_id,
                                "Stored record has no remote counterpart (drift)"
                            );
                            continue;
                        }
                        Err(error) => return Err(error.into()),
                    }
                }
                listed.push(serde_json::json!({
                    "name": name,
                    "remote_id": record.remote_id,
                    "content_hash": record.content_hash,
                    "monitors": record.monitor_ids,
                    "slo_id": record.slo_id,
                }));
            }
            println!("{}", serde_json::to_string_pretty(&listed)?);
            Ok(0)
        }

        Commands::Delete {
            name,
            keep_monitors,
        } => {
            let deployer = build_deployer(&cli.state_file, &cli.api_url, true)?;
            let report = deployer.delete(&name, keep_monitors).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.error.is_none() { 0 } else { 1 })
        }
    }
}

fn build_deployer(
    state_file: &PathBuf,
    api_url: &str,
    credentials_required: bool,
) -> Result<Deployer, Box<dyn std::error::Error>> {
    let remote = platform_client(api_url, credentials_required)?;
    build_deployer_with(state_file, remote)
}

fn build_deployer_with(
    state_file: &PathBuf,
    remote: Arc<PlatformClient>,
) -> Result<Deployer, Box<dyn std::error::Error>> {
    let store = Arc::new(FileStateStore::open(state_file)?);
    Ok(Deployer::new(Probes::builtin(), remote, store))
}

/// Build the platform client. Commands that never reach the platform can
/// run without credentials.
fn platform_client(
    api_url: &str,
    credentials_required: bool,
) -> Result<Arc<PlatformClient>, Box<dyn std::error::Error>> {
    match PlatformClient::from_env(api_url) {
        Ok(client) => Ok(Arc::new(client)),
        Err(error) if credentials_required => Err(error.into()),
        Err(_) => {
            tracing::debug!("Platform credentials not set, continuing without them");
            Ok(Arc::new(PlatformClient::new(api_url, "", "")?))
        }
    }
}

fn print_violations(violations: &[Violation]) {
    if violations.is_empty() {
        println!("configuration is valid");
        return;
    }
    for violation in violations {
        eprintln!("{}", violation);
    }
}
