use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nfs3_smb_bridge::config::{BridgeConfig, DEFAULT_CONFIG_PATH};
use nfs3_smb_bridge::lifecycle::{MountSpec, ShareLifecycle, UnmountOutcome};
use nfs3_smb_bridge::quota;
use nfs3_smb_bridge::store::{ConfigStore, DiskShareFile};
use nfs3_smb_bridge::system::{CommandReload, HostSystem};

#[derive(Debug, Parser)]
#[command(name = "nfs3-smb-bridge")]
#[command(about = "Mount NFSv3 shares and re-export them over SMB", long_about = None)]
struct Cli {
    /// Bridge configuration file
    #[arg(long, global = true, env = "NFS3_SMB_BRIDGE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MountKind {
    /// Parameter is `host:/account/container`
    RemoteHost,
    /// Parameter is a complete mount command line
    Command,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Mount a share and export it over SMB; prints the share name
    Mount {
        #[arg(value_enum)]
        kind: MountKind,

        /// Remote export or mount command line
        parameter: String,

        /// Share name to use instead of the derived one
        #[arg(long)]
        name: Option<String>,
    },

    /// Remove an SMB export and unmount its backing path
    Unmount {
        /// Name of the share
        share: String,
    },

    /// List configured shares
    List {
        #[arg(long)]
        json: bool,
    },

    /// Samba `get quota command` hook; always reports no quota
    Quota {
        path: String,
        kind: Option<String>,
        id: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nfs3_smb_bridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print()?;
            std::process::exit(parse_exit_code(&e));
        }
    };

    match cli.command {
        Commands::Mount {
            kind,
            parameter,
            name,
        } => {
            let (_, lifecycle) = load(&cli.config)?;
            let spec = match kind {
                MountKind::RemoteHost => MountSpec::RemoteHost { export: parameter },
                MountKind::Command => MountSpec::Command {
                    invocation: parameter,
                },
            };
            let share = lifecycle
                .mount(&spec, name.as_deref())
                .context("Mount failed")?;
            println!("{}", share);
        }
        Commands::Unmount { share } => {
            let (_, lifecycle) = load(&cli.config)?;
            let outcome = lifecycle
                .unmount(&share)
                .with_context(|| format!("Unmount of '{}' failed", share))?;
            match outcome {
                UnmountOutcome::Unmounted { path } => {
                    tracing::info!("Share '{}' removed, {} unmounted", share, path.display())
                }
                UnmountOutcome::AlreadyUnmounted { path } => tracing::info!(
                    "Share '{}' removed, {} was not mounted",
                    share,
                    path.display()
                ),
                UnmountOutcome::NoBackingPath => {
                    tracing::info!("Share '{}' removed, no backing path", share)
                }
                UnmountOutcome::NotFound => tracing::info!("Share '{}' not configured", share),
            }
        }
        Commands::List { json } => {
            let (config, lifecycle) = load(&cli.config)?;
            let shares = lifecycle.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&shares)?);
            } else if shares.is_empty() {
                println!("No shares configured in {}.", config.smb_conf.display());
            } else {
                for share in shares {
                    println!(
                        "{:24} {}",
                        share.name,
                        share.path.as_deref().unwrap_or("<no path>")
                    );
                }
            }
        }
        Commands::Quota { path, kind, id } => {
            println!("{}", quota::query(&path, kind.as_deref(), id.as_deref()));
        }
    }

    Ok(())
}

/// Help and version exit 0; every usage error exits 1 like any other failure.
fn parse_exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}

type HostLifecycle = ShareLifecycle<HostSystem, DiskShareFile, CommandReload>;

fn load(config_path: &Path) -> Result<(BridgeConfig, HostLifecycle)> {
    let config = BridgeConfig::load(config_path)?;
    let store = ConfigStore::new(
        DiskShareFile::new(&config.smb_conf, config.lock_timeout()),
        CommandReload::new(config.reload_command.clone()),
    );
    let lifecycle = ShareLifecycle::new(HostSystem, store, &config.scratch_root)
        .with_lock(&config.lock_file, config.lock_timeout());
    Ok((config, lifecycle))
}
