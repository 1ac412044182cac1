//! burrow CLI
//!
//! Single binary for every burrow role:
//! - `serve` runs the SSH gateway, the controller and a local node together
//! - the remaining commands manage templates and instances over the IPC port

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burrow::commands::{self, ServeOverrides};
use burrow::ipc::{CreateInstance, GatewayClient};
use bw_core::{InstanceOverrides, Kind, SessionKind};

#[derive(Parser)]
#[command(name = "burrow")]
#[command(author, version, about = "SSH-addressable session pods")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "BURROW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway, controller and local node in the foreground
    #[command(alias = "start")]
    Serve {
        /// SSH bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
        /// Local IPC port (overrides config)
        #[arg(long)]
        ipc_port: Option<u16>,
    },

    /// Manage session templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Manage session instances
    Instance {
        #[command(subcommand)]
        action: InstanceAction,
    },

    /// Show gateway status
    Status,

    /// Stream template and instance changes
    Watch {
        /// Only template changes
        #[arg(long, conflicts_with = "instances")]
        templates: bool,
        /// Only instance changes
        #[arg(long)]
        instances: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List templates
    #[command(alias = "ls")]
    List,
    /// Show one template as JSON
    Show { name: String },
    /// Create or update templates from TOML files
    Apply {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Delete templates
    #[command(alias = "rm")]
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
    },
}

#[derive(Subcommand)]
enum InstanceAction {
    /// List instances
    #[command(alias = "ls")]
    List {
        /// Only instances of this owner
        #[arg(short, long)]
        owner: Option<String>,
        /// Show pod, volume and status message
        #[arg(short, long)]
        long: bool,
    },
    /// Show one instance as JSON
    Show { name: String },
    /// Create an instance ahead of login
    Create {
        /// User the instance belongs to
        owner: String,
        /// Template to instantiate
        #[arg(short, long)]
        template: Option<String>,
        /// Instance name (defaults to `<owner>-<template>`)
        #[arg(short, long)]
        name: Option<String>,
        /// Session kind (ephemeral, persistent, preemptible)
        #[arg(short, long)]
        kind: Option<SessionKind>,
        /// Image override
        #[arg(short, long)]
        image: Option<String>,
    },
    /// Delete instances
    #[command(alias = "rm")]
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
        /// Delete without confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
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

    match cli.command {
        Commands::Serve { bind, ipc_port } => {
            commands::serve_command(config_path, ServeOverrides { bind, ipc_port }).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(config_path)?,
            ConfigAction::Path => commands::config_path(config_path),
            ConfigAction::Init { force } => commands::config_init(config_path, force)?,
        },

        Commands::Template { action } => {
            let mut client = connect(config_path)?;
            match action {
                TemplateAction::List => commands::template_list(&mut client).await?,
                TemplateAction::Show { name } => {
                    commands::template_show(&mut client, &name).await?
                }
                TemplateAction::Apply { files } => {
                    commands::template_apply(&mut client, &files).await?
                }
                TemplateAction::Delete { names } => {
                    commands::template_delete(&mut client, &names).await?
                }
            }
        }

        Commands::Instance { action } => {
            let mut client = connect(config_path)?;
            match action {
                InstanceAction::List { owner, long } => {
                    commands::instance_list(&mut client, owner.as_deref(), long).await?
                }
                InstanceAction::Show { name } => {
                    commands::instance_show(&mut client, &name).await?
                }
                InstanceAction::Create {
                    owner,
                    template,
                    name,
                    kind,
                    image,
                } => {
                    let create = CreateInstance {
                        owner,
                        name,
                        template,
                        kind,
                        overrides: InstanceOverrides {
                            image,
                            ..Default::default()
                        },
                    };
                    commands::instance_create(&mut client, create).await?
                }
                InstanceAction::Delete { names, force } => {
                    commands::instance_delete(&mut client, &names, force).await?
                }
            }
        }

        Commands::Status => {
            let mut client = connect(config_path)?;
            commands::status_command(&mut client).await?;
        }

        Commands::Watch {
            templates,
            instances,
        } => {
            let kinds = match (templates, instances) {
                (true, false) => vec![Kind::Template],
                (false, true) => vec![Kind::Instance],
                _ => vec![Kind::Template, Kind::Instance],
            };
            let mut client = connect(config_path)?;
            commands::watch_command(&mut client, kinds).await?;
        }
    }

    Ok(())
}

/// IPC client for the gateway named by the effective config
fn connect(config_path: Option<&PathBuf>) -> Result<GatewayClient> {
    let config = commands::load_effective_config(config_path)?;
    Ok(GatewayClient::new(config.gateway.ipc_address()))
}
