//! blockvol CLI - attach and mount a master volume on this host.
//!
//! Drives the volume mount controller against a JSON volume inventory.
//! Intended for smoke testing the mount pipeline and for deployments where
//! the volume metadata is fronted by static files rather than a live cloud
//! API.

mod inventory;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use blockvol_core::{
    CommandMountBackend, Result, RootfsTranslator, VolumeMountController,
};
use inventory::InventoryProvider;

/// blockvol CLI tool.
#[derive(Parser)]
#[command(name = "blockvol")]
#[command(about = "Attach and mount a master volume on this host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach and mount at most one volume from the inventory.
    ///
    /// Blocks until an attached volume's device appears. Prints the mounted
    /// volumes as JSON on success.
    Mount {
        /// Path to the JSON volume inventory file.
        #[arg(long)]
        inventory: PathBuf,

        /// Run in containerized mode: mount operations enter the host mount
        /// namespace and the mount is bridged back into the local namespace.
        #[arg(long)]
        containerized: bool,

        /// Host root bind mount used for path translation in containerized
        /// mode.
        #[arg(long, default_value = "/rootfs")]
        host_root: PathBuf,

        /// Seconds between device-wait polls.
        #[arg(long, default_value_t = 1)]
        wait_interval_secs: u64,

        /// Filesystem type used when formatting an unformatted device.
        #[arg(long)]
        fstype: Option<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Mount {
            inventory,
            containerized,
            host_root,
            wait_interval_secs,
            fstype,
        } => match run_mount(
            &inventory,
            containerized,
            host_root,
            wait_interval_secs,
            fstype,
        ) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) if e.is_fatal() => {
                error!(error = %e, "aborting: provider contract violation");
                ExitCode::from(2)
            }
            Err(e) => {
                error!(error = %e, "mount failed");
                ExitCode::FAILURE
            }
        },
    }
}

fn run_mount(
    inventory: &std::path::Path,
    containerized: bool,
    host_root: PathBuf,
    wait_interval_secs: u64,
    fstype: Option<String>,
) -> Result<()> {
    let hostname = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let provider = InventoryProvider::load(inventory, hostname)?;

    let mut controller = if containerized {
        VolumeMountController::containerized(
            Box::new(provider),
            Box::new(CommandMountBackend::host_namespace()),
            Box::new(CommandMountBackend::new()),
            Box::new(RootfsTranslator::new(host_root)),
        )
    } else {
        VolumeMountController::host(Box::new(provider), Box::new(CommandMountBackend::new()))
    };

    controller = controller.with_wait_interval(Duration::from_secs(wait_interval_secs));
    if let Some(fstype) = fstype {
        controller = controller.with_fstype(fstype);
    }

    let mounted = controller.mount_volumes()?;
    match serde_json::to_string_pretty(&mounted) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "failed to render mounted volumes"),
    }
    Ok(())
}
