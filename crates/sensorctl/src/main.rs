//! sensorctl CLI
//!
//! Deploys, upgrades and configures remote network sensors, following each
//! long-running operation until it finishes.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sensorctl::commands;
use sensorctl::session::{self, Overrides, Session};
use sensorctl_orchestrator::control_plane::CreateRequest;
use sensorctl_orchestrator::operation::{TrafficAction, TrafficProtocol, TrafficSpec};

#[derive(Parser)]
#[command(name = "sensorctl")]
#[command(author, version, about = "Deploy, upgrade and configure remote network sensors")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List sensors in the inventory
    /// Alias: ls
    #[command(alias = "ls")]
    List {
        /// Show detailed information
        #[arg(short, long)]
        long: bool,
        /// Print sensors as JSON
        #[arg(long, conflicts_with = "long")]
        json: bool,
    },

    /// Show API connectivity and inventory health
    Status,

    /// Provision a new sensor and wait until it is ready
    Deploy {
        /// Development branch to deploy (defaults to config)
        #[arg(short, long)]
        branch: Option<String>,
        /// Team name recorded with the sensor
        #[arg(short, long)]
        team: Option<String>,
        /// Owner recorded with the sensor
        #[arg(short, long)]
        user: Option<String>,
        /// Return once the sensor is created instead of waiting for readiness
        #[arg(short, long)]
        detach: bool,
    },

    /// Delete a sensor and remove it from the inventory
    Delete {
        /// Sensor name or short ID
        sensor: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Upgrade sensor software and wait for the new version
    Upgrade {
        /// Sensor name or short ID
        sensor: String,
        /// Version to install (defaults to the latest available)
        #[arg(id = "to", long = "to", value_name = "VERSION")]
        version: Option<String>,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Enable sensor features (HTTP access, YARA, Suricata, SmartPCAP)
    EnableFeatures {
        /// Sensor name or short ID
        sensor: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Register a sensor with the fleet manager
    AddToFleet {
        /// Sensor name or short ID
        sensor: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage the traffic generator on a sensor
    Traffic {
        /// Sensor name or short ID
        sensor: String,
        #[command(subcommand)]
        action: TrafficCommand,
    },

    /// Live view of sensors and operations
    Watch,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum TrafficCommand {
    /// Install the traffic generator
    Install,
    /// Start generating traffic towards a target
    Start {
        /// Destination IP address
        #[arg(long)]
        target: String,
        /// Destination port
        #[arg(long, default_value_t = 5555)]
        port: u16,
        /// udp or tcp
        #[arg(long, default_value = "udp")]
        protocol: String,
        /// Packets per second
        #[arg(long, default_value_t = 1000)]
        rate: u32,
        /// Seconds to run; 0 runs until stopped
        #[arg(long, default_value_t = 0)]
        duration: u32,
    },
    /// Stop the traffic generator
    Stop,
    /// Show whether the traffic generator is running
    Status,
}

impl TrafficCommand {
    fn into_action(self) -> Result<TrafficAction> {
        Ok(match self {
            TrafficCommand::Install => TrafficAction::Install,
            TrafficCommand::Stop => TrafficAction::Stop,
            TrafficCommand::Status => TrafficAction::Status,
            TrafficCommand::Start {
                target,
                port,
                protocol,
                rate,
                duration,
            } => {
                let mut spec = TrafficSpec::to(&target)?;
                spec.port = port;
                spec.protocol = protocol.parse::<TrafficProtocol>()?;
                spec.rate = rate;
                spec.duration_secs = duration;
                TrafficAction::Start(spec)
            }
        })
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.as_ref();

    // Config commands work without a reachable control plane
    let command = match cli.command {
        Commands::Config { action } => {
            return match action {
                ConfigAction::Path => commands::config_path(config_path),
                ConfigAction::Init { force } => commands::config_init(config_path, force),
                ConfigAction::Show => {
                    let config = session::load(config_path, &cli.overrides)?;
                    commands::config_show(&config, config_path)
                }
            };
        }
        other => other,
    };

    let config = session::load(config_path, &cli.overrides)?;
    let session = Session::start(&config).await?;
    let handle = session.handle().clone();

    let result = match command {
        Commands::List { long, json } => commands::list_command(&handle, long, json).await,
        Commands::Status => commands::status_command(&handle).await,
        Commands::Deploy {
            branch,
            team,
            user,
            detach,
        } => {
            let mut request = CreateRequest::from(&config.deploy);
            if let Some(branch) = branch {
                request.development_branch = branch;
            }
            if let Some(team) = team {
                request.team_name = team;
            }
            if let Some(user) = user {
                request.username = user;
            }
            commands::deploy_command(&handle, request, detach).await
        }
        Commands::Delete { sensor, yes } => commands::delete_command(&handle, &sensor, yes).await,
        Commands::Upgrade {
            sensor,
            version,
            yes,
        } => commands::upgrade_command(&handle, &sensor, version, yes).await,
        Commands::EnableFeatures { sensor, yes } => {
            commands::enable_features_command(&handle, &sensor, yes).await
        }
        Commands::AddToFleet { sensor, yes } => {
            commands::add_to_fleet_command(&handle, &sensor, yes).await
        }
        Commands::Traffic { sensor, action } => match action.into_action() {
            Ok(action) => commands::traffic_command(&handle, &sensor, action).await,
            Err(e) => Err(e),
        },
        Commands::Watch => commands::watch_command(&handle).await,
        Commands::Config { .. } => Ok(()),
    };

    session.shutdown().await;
    result
}
