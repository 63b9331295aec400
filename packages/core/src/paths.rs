//! Path translation between the local namespace and the host.
//!
//! When the controller runs inside an isolated mount namespace, paths it
//! computes (like `/mnt/master-data`) refer to host locations that are only
//! reachable through the host root bind (conventionally `/rootfs`). The
//! [`PathTranslator`] capability makes that mapping explicit at every call
//! site that touches a filesystem path; on a plain host it is the identity.

use std::path::{Path, PathBuf};

/// Maps a path as seen by the caller to the corresponding host path.
pub trait PathTranslator {
    /// Returns the host-translated form of `path`.
    fn to_host_path(&self, path: &Path) -> PathBuf;
}

/// Identity translation, for controllers running directly on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslator;

impl PathTranslator for IdentityTranslator {
    fn to_host_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

/// Prefix translation through a host root bind mount.
///
/// Inside an isolated namespace the host filesystem is expected to be bind
/// mounted at `root` (conventionally `/rootfs`), so the host path for
/// `/mnt/master-data` is `<root>/mnt/master-data`.
#[derive(Debug, Clone)]
pub struct RootfsTranslator {
    root: PathBuf,
}

impl RootfsTranslator {
    /// Conventional location of the host root bind mount.
    pub const DEFAULT_ROOT: &str = "/rootfs";

    /// Creates a translator rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for RootfsTranslator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ROOT)
    }
}

impl PathTranslator for RootfsTranslator {
    fn to_host_path(&self, path: &Path) -> PathBuf {
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.root.join(relative)
    }
}
