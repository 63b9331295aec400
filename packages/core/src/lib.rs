//! blockvol-core: Core library for master-volume attach and mount.
//!
//! This library attaches one block-storage volume to a control-plane host,
//! mounts it at a well-known path, and, when running inside an isolated
//! mount namespace, bridges the mount into that namespace so local
//! consumers observe the same filesystem. Multiple instances may race for
//! the same volumes; correctness relies on the provider's attach operation
//! being safely retryable and on checking the real mount table before
//! mutating, never on cached state.
//!
//! # Modules
//!
//! - [`volume`]: Volume data model
//! - [`provider`]: Volume provider capability (cloud-side attach API)
//! - [`mount`]: Mount backend capability and the command-backed implementation
//! - [`paths`]: Path translation between the local namespace and the host
//! - [`controller`]: The attach → wait → mount → bridge pipeline
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use blockvol_core::{CommandMountBackend, VolumeMountController};
//! # use blockvol_core::{Result, Volume, VolumeProvider};
//! # use std::path::PathBuf;
//! # struct CloudProvider;
//! # impl VolumeProvider for CloudProvider {
//! #     fn find_volumes(&self) -> Result<Vec<Volume>> { Ok(vec![]) }
//! #     fn attach_volume(&self, _v: &mut Volume) -> Result<()> { Ok(()) }
//! #     fn find_mounted_volume(&self, _v: &Volume) -> Result<Option<PathBuf>> { Ok(None) }
//! # }
//!
//! // Running directly on the host against a cloud provider implementation.
//! let mut controller = VolumeMountController::host(
//!     Box::new(CloudProvider),
//!     Box::new(CommandMountBackend::new()),
//! );
//!
//! // Blocks until a volume is attached and its device appears; safe to
//! // call repeatedly from a reconcile loop.
//! let mounted = controller.mount_volumes().unwrap();
//! for volume in &mounted {
//!     println!("{} mounted at {:?}", volume.provider_id, volume.mountpoint);
//! }
//! ```

pub mod controller;
pub mod error;
pub mod mount;
pub mod paths;
pub mod provider;
pub mod volume;

// Re-export commonly used types
pub use controller::{CancelToken, VolumeMountController};
pub use error::{Error, Result};
pub use mount::{CommandMountBackend, MountBackend, MountEntry};
pub use paths::{IdentityTranslator, PathTranslator, RootfsTranslator};
pub use provider::VolumeProvider;
pub use volume::Volume;
