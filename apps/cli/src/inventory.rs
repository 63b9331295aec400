//! JSON-backed volume inventory provider.
//!
//! Implements [`VolumeProvider`] over a static inventory file: each entry
//! names a volume, its mount name, and the device path it surfaces as once
//! attached. Attaching claims the entry in memory for this host; the device
//! is reported to the controller only once its path actually exists, which
//! gives the device-wait loop realistic behavior with loop or hotplugged
//! devices.
//!
//! ## File format
//!
//! ```json
//! [
//!   {"provider_id": "vol-1", "mount_name": "master-data", "device": "/dev/xvdb"}
//! ]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Deserialize;
use snafu::ResultExt;

use blockvol_core::error::{InventoryReadSnafu, ProviderSnafu};
use blockvol_core::{Error, Result, Volume, VolumeProvider};

/// One inventory file entry.
#[derive(Debug, Clone, Deserialize)]
struct InventoryEntry {
    provider_id: String,
    mount_name: String,
    /// Device path the volume surfaces as once attached to this host.
    device: PathBuf,
    /// Host already owning the attachment, if any.
    #[serde(default)]
    attached_to: Option<String>,
}

#[derive(Debug)]
struct InventoryState {
    entries: Vec<InventoryEntry>,
    /// Provider IDs this process has claimed.
    claimed: HashSet<String>,
}

/// Volume provider backed by a static JSON inventory.
#[derive(Debug)]
pub struct InventoryProvider {
    hostname: String,
    state: Mutex<InventoryState>,
}

impl InventoryProvider {
    /// Loads the inventory from `path`, claiming volumes as `hostname`.
    pub fn load(path: &Path, hostname: String) -> Result<Self> {
        let contents = std::fs::read_to_string(path).context(InventoryReadSnafu { path })?;
        Self::parse(path, &contents, hostname)
    }

    fn parse(path: &Path, json: &str, hostname: String) -> Result<Self> {
        let entries: Vec<InventoryEntry> =
            serde_json::from_str(json).map_err(|e| Error::InventoryParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        Ok(Self {
            hostname,
            state: Mutex::new(InventoryState {
                entries,
                claimed: HashSet::new(),
            }),
        })
    }

    /// Locks the inventory state. The state stays consistent even if a
    /// previous holder panicked, so poisoning is not treated as an error.
    fn state(&self) -> MutexGuard<'_, InventoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn volume_for(&self, entry: &InventoryEntry, claimed: bool) -> Volume {
        Volume {
            provider_id: entry.provider_id.clone(),
            attached_to: if claimed {
                Some(self.hostname.clone())
            } else {
                entry.attached_to.clone()
            },
            local_device: claimed.then(|| entry.device.clone()),
            mount_name: entry.mount_name.clone(),
            mountpoint: None,
        }
    }
}

impl VolumeProvider for InventoryProvider {
    fn find_volumes(&self) -> Result<Vec<Volume>> {
        let state = self.state();
        Ok(state
            .entries
            .iter()
            .map(|entry| self.volume_for(entry, state.claimed.contains(&entry.provider_id)))
            .collect())
    }

    fn attach_volume(&self, volume: &mut Volume) -> Result<()> {
        let mut state = self.state();

        let entry = state
            .entries
            .iter()
            .find(|e| e.provider_id == volume.provider_id)
            .cloned();
        let entry = match entry {
            Some(entry) => entry,
            None => {
                return ProviderSnafu {
                    message: format!("volume {} not in inventory", volume.provider_id),
                }
                .fail();
            }
        };

        if entry.attached_to.as_deref().is_some_and(|h| !h.is_empty()) {
            return ProviderSnafu {
                message: format!(
                    "volume {} is already attached to {}",
                    entry.provider_id,
                    entry.attached_to.as_deref().unwrap_or_default()
                ),
            }
            .fail();
        }

        state.claimed.insert(entry.provider_id.clone());
        volume.attached_to = Some(self.hostname.clone());
        volume.local_device = Some(entry.device.clone());
        Ok(())
    }

    fn find_mounted_volume(&self, volume: &Volume) -> Result<Option<PathBuf>> {
        let state = self.state();
        let Some(entry) = state
            .entries
            .iter()
            .find(|e| e.provider_id == volume.provider_id)
        else {
            return Ok(None);
        };

        if !state.claimed.contains(&entry.provider_id) && !volume.is_attached_locally() {
            return Ok(None);
        }

        // The device "appears" once its path exists, mirroring how a real
        // provider reports the device only after the kernel surfaces it.
        if entry.device.exists() {
            Ok(Some(entry.device.clone()))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_INVENTORY: &str = r#"[
        {"provider_id": "vol-1", "mount_name": "master-data", "device": "/dev/xvdb"},
        {"provider_id": "vol-2", "mount_name": "master-logs", "device": "/dev/xvdc",
         "attached_to": "other-host"}
    ]"#;

    #[test]
    fn test_parse_inventory() {
        let provider =
            InventoryProvider::parse(Path::new("inv.json"), SAMPLE_INVENTORY, "this-host".to_string()).unwrap();
        let volumes = provider.find_volumes().unwrap();

        assert_eq!(volumes.len(), 2);
        assert!(volumes[0].needs_attach());
        assert!(!volumes[0].is_attached_locally());
        assert_eq!(volumes[1].attached_to.as_deref(), Some("other-host"));
    }

    #[test]
    fn test_attach_claims_and_sets_device() {
        let provider =
            InventoryProvider::parse(Path::new("inv.json"), SAMPLE_INVENTORY, "this-host".to_string()).unwrap();
        let mut volume = provider.find_volumes().unwrap().remove(0);

        provider.attach_volume(&mut volume).unwrap();
        assert_eq!(volume.attached_to.as_deref(), Some("this-host"));
        assert_eq!(volume.local_device, Some(PathBuf::from("/dev/xvdb")));

        // The claim is visible on re-enumeration.
        let volumes = provider.find_volumes().unwrap();
        assert!(volumes[0].is_attached_locally());
    }

    #[test]
    fn test_attach_rejects_foreign_attachment() {
        let provider =
            InventoryProvider::parse(Path::new("inv.json"), SAMPLE_INVENTORY, "this-host".to_string()).unwrap();
        let mut volume = provider.find_volumes().unwrap().remove(1);

        let err = provider.attach_volume(&mut volume).unwrap_err();
        assert!(err.to_string().contains("already attached"));
    }

    #[test]
    fn test_device_appears_once_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("loop0");
        let inventory = format!(
            r#"[{{"provider_id": "vol-1", "mount_name": "master-data", "device": {:?}}}]"#,
            device
        );

        let provider = InventoryProvider::parse(Path::new("inv.json"), &inventory, "this-host".to_string()).unwrap();
        let mut volume = provider.find_volumes().unwrap().remove(0);
        provider.attach_volume(&mut volume).unwrap();

        // Not surfaced by the "kernel" yet.
        assert_eq!(provider.find_mounted_volume(&volume).unwrap(), None);

        std::fs::write(&device, b"").unwrap();
        assert_eq!(
            provider.find_mounted_volume(&volume).unwrap(),
            Some(device)
        );
    }

    #[test]
    fn test_survives_poisoned_lock() {
        let provider =
            InventoryProvider::parse(Path::new("inv.json"), SAMPLE_INVENTORY, "this-host".to_string()).unwrap();

        // Poison the state lock by panicking while holding it.
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = provider.state.lock().unwrap();
            panic!("holder panicked");
        }));

        assert_eq!(provider.find_volumes().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_inventory() {
        let err = InventoryProvider::parse(Path::new("inv.json"), "not json", "h".to_string()).unwrap_err();
        assert!(matches!(err, Error::InventoryParse { .. }));
    }
}
