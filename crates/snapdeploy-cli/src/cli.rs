//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use snapdeploy_core::{DeployConfig, DeployError, DeployFacade, DownloadOutcome, FileSettings};
use tracing::info;

/// Settings file kept next to the snapshot folders.
pub const SETTINGS_FILE: &str = "settings.json";

/// Snapdeploy CLI - over-the-air content updates
#[derive(Parser, Debug)]
#[command(name = "snapdeploy")]
#[command(version, about = "Snapdeploy CLI - over-the-air content updates")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// App identifier
    #[arg(long, env = "SNAPDEPLOY_APP_ID", global = true)]
    pub app_id: Option<String>,

    /// Deploy server base URL
    #[arg(long, global = true)]
    pub server_url: Option<String>,

    /// Directory holding snapshots and settings
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Host binary version reported to the channel
    #[arg(long, global = true)]
    pub binary_version: Option<semver::Version>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write the resolved configuration to the config file
    Init,
    /// Check the channel for a new snapshot
    Check {
        /// Channel tag (defaults to the configured channel)
        #[arg(long)]
        channel: Option<String>,
    },
    /// Check the channel, then download the snapshot it offers
    Download {
        #[arg(long)]
        channel: Option<String>,
    },
    /// Extract the downloaded snapshot
    Extract,
    /// Serve a retained snapshot
    Activate { uuid: String },
    /// Check, download, extract and activate in one go
    Update {
        #[arg(long)]
        channel: Option<String>,
    },
    /// Show the current snapshot and binary version
    Info,
    /// List retained snapshots
    Versions,
    /// Delete a retained snapshot
    Delete { uuid: String },
    /// Show the user metadata of a snapshot
    Metadata { uuid: String },
    /// Never offer a snapshot again
    Ignore { uuid: String },
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
}

impl ExitCode {
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
        }
    }
}

impl Cli {
    /// Resolve the configuration: file (or defaults), then CLI flags.
    pub fn load_config(&self) -> anyhow::Result<DeployConfig> {
        let mut config = match &self.config {
            Some(path) if path.exists() => DeployConfig::load_from_file(path)
                .with_context(|| format!("loading config {:?}", path))?,
            _ => DeployConfig::default(),
        };

        if let Some(app_id) = &self.app_id {
            config.app_id = app_id.clone();
        }
        if let Some(server_url) = &self.server_url {
            config.server_url = server_url.clone();
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = Some(data_dir.clone());
        }
        if let Some(version) = &self.binary_version {
            config.binary_version = version.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Execute the CLI command with a resolved configuration
    pub async fn execute_with_config(self, config: DeployConfig) -> anyhow::Result<ExitCode> {
        if let Commands::Init = self.command {
            let path = self
                .config
                .clone()
                .context("init needs --config <path>")?;
            config.save_to_file(&path)?;
            print_json(&json!({ "config": path }))?;
            return Ok(ExitCode::Success);
        }

        let settings = Arc::new(FileSettings::new(config.data_dir().join(SETTINGS_FILE)));
        let default_channel = config.channel_tag.clone();
        let deploy = DeployFacade::with_http(config, settings)?;

        match run(&deploy, self.command, &default_channel).await {
            Ok(value) => {
                print_json(&value)?;
                Ok(ExitCode::Success)
            }
            Err(e) => {
                print_json(&json!({ "code": e.code(), "message": e.to_string() }))?;
                Ok(ExitCode::GeneralError)
            }
        }
    }
}

async fn run(
    deploy: &DeployFacade,
    command: Commands,
    default_channel: &str,
) -> Result<Value, DeployError> {
    let value = match command {
        Commands::Init => Value::Null,
        Commands::Check { channel } => {
            let channel = channel.as_deref().unwrap_or(default_channel);
            json!({ "available": deploy.check(channel).await? })
        }
        Commands::Download { channel } => {
            // The offered candidate only lives for one process.
            deploy.check(channel.as_deref().unwrap_or(default_channel)).await?;
            serde_json::to_value(deploy.download_outcome().await?)?
        }
        Commands::Extract => json!({ "result": deploy.extract().await? }),
        Commands::Activate { uuid } => {
            deploy.activate(&uuid).await?;
            json!({ "loaded": uuid })
        }
        Commands::Update { channel } => {
            let channel = channel.as_deref().unwrap_or(default_channel);
            update(deploy, channel).await?
        }
        Commands::Info => serde_json::to_value(deploy.info().await?)?,
        Commands::Versions => json!(deploy.list_versions().await?),
        Commands::Delete { uuid } => json!({ "deleted": deploy.delete_version(&uuid).await? }),
        Commands::Metadata { uuid } => json!({ "metadata": deploy.metadata(&uuid).await? }),
        Commands::Ignore { uuid } => {
            deploy.ignore(&uuid).await?;
            json!({ "ignored": uuid })
        }
    };
    Ok(value)
}

/// Full cycle: check, then download, extract and activate when offered.
async fn update(deploy: &DeployFacade, channel: &str) -> Result<Value, DeployError> {
    if !deploy.check(channel).await? {
        return Ok(json!({ "updated": false }));
    }

    let outcome = deploy.download_outcome().await?;
    let uuid = match &outcome {
        DownloadOutcome::AlreadyInstalled { uuid } | DownloadOutcome::Downloaded { uuid, .. } => {
            uuid.clone()
        }
    };
    deploy.extract().await?;
    deploy.activate(&uuid).await?;
    info!("Now serving snapshot {}", uuid);

    Ok(json!({
        "updated": true,
        "uuid": uuid,
        "download": outcome,
    }))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
