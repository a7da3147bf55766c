//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use blockattach_common::{RequestId, Status, VolumeId};
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};

use crate::config::NodeConfig;
use crate::filesystem::ProcMountTable;
use crate::node::{AccessMode, NodeService, PublishRequest, UnpublishRequest, VolumeCapability};
use crate::{device, inspect};

/// blockattach - node-local block volume publish/unpublish
#[derive(Parser)]
#[command(name = "blockattach")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for node-local state
    #[arg(long, global = true, env = "BLOCKATTACH_ROOT")]
    pub root: Option<PathBuf>,

    /// Path to a TOML configuration file
    #[arg(long, global = true, env = "BLOCKATTACH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable.
    Text,
    /// One JSON object per line.
    Json,
}

/// Access requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AccessArg {
    /// Single node writer.
    Writer,
    /// Single node reader only.
    Reader,
}

impl From<AccessArg> for AccessMode {
    fn from(arg: AccessArg) -> Self {
        match arg {
            AccessArg::Writer => Self::SingleNodeWriter,
            AccessArg::Reader => Self::SingleNodeReaderOnly,
        }
    }
}

/// Output format for listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Tab separated table.
    Table,
    /// JSON array.
    Json,
}

/// Node commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Publish a device to a target path
    Publish {
        /// Volume ID
        #[arg(long)]
        volume_id: String,

        /// Device path (may be a symlink such as /dev/disk/by-id/...)
        #[arg(long)]
        device: PathBuf,

        /// Pre-created target path: a file for --block, a directory otherwise
        #[arg(long)]
        target: PathBuf,

        /// Publish the raw block device
        #[arg(long, conflicts_with_all = ["fs_type", "mount_flag"])]
        block: bool,

        /// Filesystem type (default from configuration)
        #[arg(long)]
        fs_type: Option<String>,

        /// Extra mount option, repeatable
        #[arg(long)]
        mount_flag: Vec<String>,

        /// Access mode
        #[arg(long, value_enum, default_value_t = AccessArg::Writer)]
        access_mode: AccessArg,

        /// Request a read-only publish
        #[arg(long)]
        read_only: bool,

        /// Directory holding private mount points
        #[arg(long)]
        private_dir: Option<PathBuf>,

        /// Correlation id for the log span
        #[arg(long)]
        request_id: Option<RequestId>,
    },

    /// Unpublish a device from a target path
    Unpublish {
        /// Volume ID
        #[arg(long)]
        volume_id: String,

        /// Device path
        #[arg(long)]
        device: PathBuf,

        /// Target path
        #[arg(long)]
        target: PathBuf,

        /// Directory holding private mount points
        #[arg(long)]
        private_dir: Option<PathBuf>,

        /// Correlation id for the log span
        #[arg(long)]
        request_id: Option<RequestId>,
    },

    /// List the observed mounts of a device
    Mounts {
        /// Device path
        device: PathBuf,

        /// Output format (table, json)
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

impl Cli {
    /// Build the node configuration: defaults, then the config file, then
    /// flags.
    ///
    /// # Errors
    ///
    /// Fails if the configuration file cannot be loaded.
    pub fn node_config(&self) -> Result<NodeConfig> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::from_file(path)
                .wrap_err_with(|| format!("Failed to load config {}", path.display()))?,
            None => NodeConfig::default(),
        };
        if let Some(root) = &self.root {
            config = config.with_root(root);
        }
        Ok(config)
    }

    /// Execute the CLI command.
    ///
    /// Request failures are printed to stderr as a JSON status and reported
    /// through the exit code.
    ///
    /// # Errors
    ///
    /// Returns an error for configuration or output failures.
    pub async fn execute(self) -> Result<ExitCode> {
        let mut config = self.node_config()?;

        match self.command {
            Commands::Publish {
                volume_id,
                device,
                target,
                block,
                fs_type,
                mount_flag,
                access_mode,
                read_only,
                private_dir,
                request_id,
            } => {
                if let Some(dir) = private_dir {
                    config = config.with_private_dir(dir);
                }
                let capability = if block {
                    VolumeCapability::block(access_mode.into())
                } else {
                    VolumeCapability::filesystem(
                        access_mode.into(),
                        fs_type.unwrap_or_default(),
                        mount_flag,
                    )
                };
                let request = PublishRequest {
                    volume_id: VolumeId::new(volume_id),
                    target_path: target.clone(),
                    volume_capability: Some(capability),
                    readonly: read_only,
                };

                let service = NodeService::system(config);
                match service.publish(request_id, request, device).await {
                    Ok(()) => {
                        println!("Volume published to {}", target.display());
                        Ok(ExitCode::SUCCESS)
                    }
                    Err(status) => report(&status),
                }
            }

            Commands::Unpublish {
                volume_id,
                device,
                target,
                private_dir,
                request_id,
            } => {
                if let Some(dir) = private_dir {
                    config = config.with_private_dir(dir);
                }
                let request = UnpublishRequest {
                    volume_id: VolumeId::new(volume_id),
                    target_path: target.clone(),
                };

                let service = NodeService::system(config);
                match service.unpublish(request_id, request, device).await {
                    Ok(()) => {
                        println!("Volume unpublished from {}", target.display());
                        Ok(ExitCode::SUCCESS)
                    }
                    Err(status) => report(&status),
                }
            }

            Commands::Mounts { device, format } => {
                let table = ProcMountTable::new(&config.mount_table);
                let mounts = device::resolve(&device).and_then(|dev| {
                    inspect::staging_mounts_of_device(&table, &dev.real_path)
                });
                let mounts = match mounts {
                    Ok(mounts) => mounts,
                    Err(err) => return report(&Status::from(err)),
                };

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&mounts)?);
                    }
                    OutputFormat::Table => {
                        println!("PATH\tSOURCE\tDEVICE\tTYPE\tOPTIONS");
                        for m in &mounts {
                            let options: Vec<&str> = m.options.iter().map(String::as_str).collect();
                            println!(
                                "{}\t{}\t{}\t{}\t{}",
                                m.path.display(),
                                m.source.display(),
                                m.device,
                                m.fs_type,
                                options.join(",")
                            );
                        }
                    }
                }
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn report(status: &Status) -> Result<ExitCode> {
    eprintln!("{}", serde_json::to_string(status)?);
    Ok(ExitCode::FAILURE)
}
