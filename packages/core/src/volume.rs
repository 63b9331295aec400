//! Volume data model.
//!
//! A [`Volume`] describes one block-storage volume candidate as seen through
//! the provider: its stable provider identifier, which host (if any) owns the
//! attachment, and the local device and mount paths once attach/mount have
//! happened on this host.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One block-storage volume candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Opaque stable identifier assigned by the provider; unique per volume.
    pub provider_id: String,
    /// Identifier of the host currently owning the attachment, if any.
    #[serde(default)]
    pub attached_to: Option<String>,
    /// OS device path once attached to *this* host.
    ///
    /// Invariant: set iff the volume is attached to the local host. A
    /// provider that reports a successful attach must populate this field.
    #[serde(default)]
    pub local_device: Option<PathBuf>,
    /// Stable name used to derive the mount target path.
    pub mount_name: String,
    /// Absolute path where the volume is mounted once mounting succeeds.
    ///
    /// Invariant: set iff a controller has successfully mounted the volume.
    #[serde(default)]
    pub mountpoint: Option<PathBuf>,
}

impl Volume {
    /// Creates an unattached, unmounted volume candidate.
    pub fn new(provider_id: impl Into<String>, mount_name: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            attached_to: None,
            local_device: None,
            mount_name: mount_name.into(),
            mountpoint: None,
        }
    }

    /// Returns true if no host currently owns an attachment of this volume.
    pub fn needs_attach(&self) -> bool {
        self.attached_to.as_deref().is_none_or(str::is_empty)
    }

    /// Returns true if the volume is attached to the local host.
    pub fn is_attached_locally(&self) -> bool {
        self.local_device.is_some()
    }
}
