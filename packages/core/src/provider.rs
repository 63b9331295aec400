//! Volume provider capability.
//!
//! The provider is the cloud-side collaborator: it enumerates candidate
//! volumes, attaches one to the local host, and reports the OS device path
//! once the kernel recognizes an attached volume. The controller is generic
//! over this trait so tests can drive it with fakes and deployments can plug
//! in whichever cloud API fronts their volumes.

use std::path::PathBuf;

use crate::error::Result;
use crate::volume::Volume;

/// Access to the block-storage volumes backing this cluster.
pub trait VolumeProvider {
    /// Enumerates all volume candidates this host may claim.
    fn find_volumes(&self) -> Result<Vec<Volume>>;

    /// Attempts to attach the volume to the local host.
    ///
    /// Attach is safely retryable: when several hosts race for the same
    /// volume, the losers get an error and simply move on to the next
    /// candidate. On success the provider must set `volume.local_device`;
    /// failing to do so is a contract violation the controller treats as
    /// fatal.
    fn attach_volume(&self, volume: &mut Volume) -> Result<()>;

    /// Resolves an attached volume to its OS device path.
    ///
    /// Returns `None` while the kernel has not yet surfaced the device; the
    /// controller polls this until a path appears.
    fn find_mounted_volume(&self, volume: &Volume) -> Result<Option<PathBuf>>;
}
