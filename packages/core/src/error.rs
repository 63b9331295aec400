//! Unified error types for the blockvol-core library.
//!
//! Uses SNAFU for context-rich error handling. Several variants wrap a nested
//! [`Error`] so that controller-level failures carry the device and target
//! path that were in play when a backend command failed.

use snafu::Snafu;
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned non-zero exit code.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    CommandExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Failed to parse findmnt JSON output.
    #[snafu(display("failed to parse findmnt output: {message}"))]
    FindmntParse { message: String },

    /// The volume provider failed to enumerate or attach volumes.
    #[snafu(display("volume provider error: {message}"))]
    Provider { message: String },

    /// The attach phase failed before any volume could be claimed.
    #[snafu(display("unable to attach master volumes"))]
    Attach {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// The provider reported a successful attach without setting the local
    /// device path. This is a programming-contract violation, not a runtime
    /// condition: continuing would compute a mount target from invalid state.
    #[snafu(display(
        "provider reported volume {provider_id} as attached but set no local device"
    ))]
    AttachContract { provider_id: String },

    /// The device-wait poll loop was cancelled by the caller.
    #[snafu(display("cancelled while waiting for device of volume {provider_id}"))]
    WaitCancelled { provider_id: String },

    /// Probing for the container-optimized disks directory failed with
    /// something other than "not found".
    #[snafu(display("failed to check for disks directory at {}", path.display()))]
    DisksDirProbe { path: PathBuf, source: nix::Error },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Listing the existing mounts failed.
    #[snafu(display("failed to list existing mounts"))]
    ListMounts {
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// Formatting and mounting the device failed.
    #[snafu(display("failed to format and mount {} on {}", device.display(), target.display()))]
    FormatAndMount {
        device: PathBuf,
        target: PathBuf,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// More than one existing mount was found at the target path. This never
    /// happens under correct operation and requires operator intervention.
    #[snafu(display("found {count} existing mounts at {}", target.display()))]
    AmbiguousMount { target: PathBuf, count: usize },

    /// Checking for an existing mount inside the local namespace failed.
    #[snafu(display(
        "failed to check for mounts of {} inside the local namespace",
        target.display()
    ))]
    BridgeProbe {
        target: PathBuf,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// Something is already mounted at the bridge target, but it is not the
    /// device we are bridging.
    #[snafu(display(
        "device already mounted at {}, but is {} and we want {} or {}",
        target.display(), mounted.display(), device.display(), host_device.display()
    ))]
    BridgeDeviceMismatch {
        target: PathBuf,
        mounted: PathBuf,
        device: PathBuf,
        host_device: PathBuf,
    },

    /// Mounting the device inside the local namespace failed.
    #[snafu(display(
        "failed to mount {} inside the local namespace at {}",
        device.display(), target.display()
    ))]
    BridgeMount {
        device: PathBuf,
        target: PathBuf,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// Failed to read a volume inventory file.
    #[snafu(display("failed to read volume inventory at {}", path.display()))]
    InventoryRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse a volume inventory file.
    #[snafu(display("failed to parse volume inventory at {}: {message}", path.display()))]
    InventoryParse { path: PathBuf, message: String },

    #[snafu(whatever, display("{message}"))]
    Generic {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

impl Error {
    /// Create an [`Error::Provider`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn provider<E: std::fmt::Display>(e: E) -> Self {
        Self::Provider {
            message: e.to_string(),
        }
    }

    /// Returns true for errors that indicate the process must not continue.
    ///
    /// Currently only [`Error::AttachContract`]: the provider broke its
    /// contract and downstream state can no longer be trusted. Callers are
    /// expected to abort rather than retry when this returns true.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::AttachContract { .. } => true,
            Error::Attach { source } => source.is_fatal(),
            _ => false,
        }
    }
}
