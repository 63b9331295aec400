//! Volume mount controller.
//!
//! Orchestrates the attach → wait → format/mount → verify → bridge pipeline
//! to reach the invariant "at most one volume, durably attached and mounted,
//! per host". The controller never trusts its own memory of the world:
//! idempotency comes from querying the provider's attachment records and the
//! real mount table on every call, so racing instances and process restarts
//! are handled the same way.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::stat;
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::error::{
    AmbiguousMountSnafu, AttachContractSnafu, AttachSnafu, BridgeDeviceMismatchSnafu,
    BridgeMountSnafu, BridgeProbeSnafu, DisksDirProbeSnafu, Error, FormatAndMountSnafu,
    ListMountsSnafu, Result, WaitCancelledSnafu,
};
use crate::mount::{MountBackend, MountEntry};
use crate::paths::{IdentityTranslator, PathTranslator};
use crate::provider::VolumeProvider;
use crate::volume::Volume;

/// Default mount root for master volumes.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";

/// On container-optimized hosts `/mnt` is read-only and disks are mounted
/// under this directory instead. Its presence selects the mount root.
pub const CONTAINER_DISKS_DIR: &str = "/mnt/disks";

/// Default interval between device-wait polls.
pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(1);

/// Cooperative cancellation handle for the device-wait loop.
///
/// By default the wait for an attached volume's device has no upper bound:
/// the controller polls until the kernel surfaces the device. Callers that
/// need to bound worst-case blocking keep a clone of the token and cancel it
/// from another thread; the wait loop then fails with
/// [`Error::WaitCancelled`](crate::Error::WaitCancelled).
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of any wait loop holding a clone of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Attaches and mounts one master volume on this host.
///
/// All collaborators are injected at construction: the volume provider, a
/// mount backend operating on the host mount table, and, for controllers
/// running inside an isolated mount namespace, a second backend operating
/// in the local namespace plus a path translator mapping computed paths to
/// their host form.
///
/// The mounted map is process-scoped bookkeeping only: entries are added,
/// never removed, and double-mount protection across restarts comes from the
/// mount table, not from this map.
pub struct VolumeMountController {
    provider: Box<dyn VolumeProvider>,
    /// Operates on the host mount table (namespace-entering when the
    /// controller itself is containerized).
    backend: Box<dyn MountBackend>,
    /// Present iff the controller runs inside an isolated mount namespace;
    /// operates in the controller's own namespace for the bridge remount.
    bridge_backend: Option<Box<dyn MountBackend>>,
    translator: Box<dyn PathTranslator>,
    fstype: Option<String>,
    wait_interval: Duration,
    cancel: CancelToken,
    /// Volumes this controller instance has mounted, keyed by provider ID.
    mounted: HashMap<String, Volume>,
}

impl VolumeMountController {
    /// Creates a controller running directly on the host.
    ///
    /// Paths need no translation and no bridge remount is performed.
    pub fn host(provider: Box<dyn VolumeProvider>, backend: Box<dyn MountBackend>) -> Self {
        Self {
            provider,
            backend,
            bridge_backend: None,
            translator: Box::new(IdentityTranslator),
            fstype: None,
            wait_interval: DEFAULT_WAIT_INTERVAL,
            cancel: CancelToken::new(),
            mounted: HashMap::new(),
        }
    }

    /// Creates a controller running inside an isolated mount namespace.
    ///
    /// `backend` must execute against the host mount table (for example
    /// [`CommandMountBackend::host_namespace`](crate::CommandMountBackend::host_namespace)),
    /// `bridge_backend` in the controller's own namespace, and `translator`
    /// must map computed paths to their host form.
    pub fn containerized(
        provider: Box<dyn VolumeProvider>,
        backend: Box<dyn MountBackend>,
        bridge_backend: Box<dyn MountBackend>,
        translator: Box<dyn PathTranslator>,
    ) -> Self {
        Self {
            provider,
            backend,
            bridge_backend: Some(bridge_backend),
            translator,
            fstype: None,
            wait_interval: DEFAULT_WAIT_INTERVAL,
            cancel: CancelToken::new(),
            mounted: HashMap::new(),
        }
    }

    /// Sets the filesystem type used when formatting; default lets the
    /// backend detect or pick its own.
    pub fn with_fstype(mut self, fstype: impl Into<String>) -> Self {
        self.fstype = Some(fstype.into());
        self
    }

    /// Overrides the interval between device-wait polls.
    pub fn with_wait_interval(mut self, interval: Duration) -> Self {
        self.wait_interval = interval;
        self
    }

    /// Installs a cancellation token checked by the device-wait loop.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attaches and mounts at most one master volume, returning the volumes
    /// this controller has mounted.
    ///
    /// Runs the attach phase, then mounts the first attached volume not yet
    /// recorded; volumes that fail to mount are logged and skipped. Already
    /// holding a mounted volume makes this a cheap no-op, so the call is
    /// safe to repeat from a reconcile loop.
    pub fn mount_volumes(&mut self) -> Result<Vec<Volume>> {
        let attached = self.attach_volumes().context(AttachSnafu)?;

        for mut volume in attached {
            if !self.mounted.is_empty() {
                // We only attempt to mount a single volume
                break;
            }
            if self.mounted.contains_key(&volume.provider_id) {
                continue;
            }

            debug!(
                volume = %volume.provider_id,
                device = ?volume.local_device,
                "master volume is attached"
            );

            let mountpoint = self.resolve_mountpoint(&volume)?;

            info!(
                device = ?volume.local_device,
                mountpoint = %mountpoint.display(),
                "doing safe-format-and-mount"
            );
            if let Err(e) = self.safe_format_and_mount(&volume, &mountpoint) {
                if e.is_fatal() || matches!(e, Error::WaitCancelled { .. }) {
                    return Err(e);
                }
                warn!(volume = %volume.provider_id, error = %e, "unable to mount master volume");
                continue;
            }

            info!(
                volume = %volume.provider_id,
                mountpoint = %mountpoint.display(),
                "mounted master volume"
            );

            volume.mountpoint = Some(self.translator.to_host_path(&mountpoint));
            self.mounted.insert(volume.provider_id.clone(), volume);
        }

        Ok(self.mounted.values().cloned().collect())
    }

    /// Attach phase: claim at most one volume for this host.
    ///
    /// Volumes already attached locally win outright; otherwise candidates
    /// are attached one at a time until one succeeds. An attach failure is
    /// an expected race with other hosts and only logged.
    fn attach_volumes(&self) -> Result<Vec<Volume>> {
        let volumes = self.provider.find_volumes()?;

        let mut try_attach = Vec::new();
        let mut attached = Vec::new();
        for volume in volumes {
            if volume.is_attached_locally() {
                attached.push(volume.clone());
            }
            if volume.needs_attach() {
                try_attach.push(volume);
            }
        }

        if try_attach.is_empty() {
            return Ok(attached);
        }

        for mut volume in try_attach {
            if !attached.is_empty() {
                // We only attempt to mount a single volume
                break;
            }

            debug!(volume = %volume.provider_id, "trying to attach master volume");

            match self.provider.attach_volume(&mut volume) {
                Err(e) => {
                    // We are racing with other instances here; this can happen
                    warn!(volume = %volume.provider_id, error = %e, "error attaching volume");
                }
                Ok(()) => {
                    if volume.local_device.is_none() {
                        return AttachContractSnafu {
                            provider_id: volume.provider_id,
                        }
                        .fail();
                    }
                    attached.push(volume);
                }
            }
        }

        debug!(count = attached.len(), "currently attached volumes");
        Ok(attached)
    }

    /// Derives the mount target for a volume.
    ///
    /// Container-optimized hosts keep `/mnt` read-only and expect disks
    /// under [`CONTAINER_DISKS_DIR`]; its presence (probed through the path
    /// translator) selects the mount root.
    fn resolve_mountpoint(&self, volume: &Volume) -> Result<PathBuf> {
        let disks_dir = Path::new(CONTAINER_DISKS_DIR);
        let host_disks_dir = self.translator.to_host_path(disks_dir);

        match stat::stat(&host_disks_dir) {
            Ok(_) => Ok(disks_dir.join(&volume.mount_name)),
            Err(Errno::ENOENT) => Ok(Path::new(DEFAULT_MOUNT_ROOT).join(&volume.mount_name)),
            Err(errno) => Err(errno).context(DisksDirProbeSnafu {
                path: host_disks_dir,
            }),
        }
    }

    /// Waits for the kernel to surface the attached volume's device.
    ///
    /// Polls the provider at the configured interval. There is deliberately
    /// no upper bound: absence of the device is not an error, and the loop
    /// blocks until the device appears or the cancel token fires. Callers
    /// needing responsiveness must run this on a dedicated thread.
    fn wait_for_device(&self, volume: &Volume) -> Result<PathBuf> {
        loop {
            if self.cancel.is_cancelled() {
                return WaitCancelledSnafu {
                    provider_id: volume.provider_id.clone(),
                }
                .fail();
            }

            if let Some(device) = self.provider.find_mounted_volume(volume)? {
                info!(volume = %volume.provider_id, device = %device.display(), "found volume device");
                return Ok(device);
            }

            info!(volume = %volume.provider_id, "waiting for volume device to appear");
            std::thread::sleep(self.wait_interval);
        }
    }

    /// Waits for the device, then mounts it at `mountpoint` if the host
    /// mount table does not already show it there; bridges the mount into
    /// the local namespace when containerized.
    fn safe_format_and_mount(&self, volume: &Volume, mountpoint: &Path) -> Result<()> {
        // Wait for the device to show up
        let device = self.wait_for_device(volume)?;

        let mounts = self.backend.list_mounts().context(ListMountsSnafu)?;

        // When containerized the backend still lists mounts in the host, so
        // the untranslated mountpoint is the right comparison key.
        let existing: Vec<&MountEntry> =
            mounts.iter().filter(|m| m.path == mountpoint).collect();

        match existing.len() {
            0 => {
                info!(path = %mountpoint.display(), "creating mount directory");
                self.backend.create_mount_point(mountpoint)?;

                info!(
                    device = %device.display(),
                    mountpoint = %mountpoint.display(),
                    "mounting device"
                );
                self.backend
                    .format_and_mount(&device, mountpoint, self.fstype.as_deref(), &[])
                    .context(FormatAndMountSnafu {
                        device: device.clone(),
                        target: mountpoint,
                    })?;
            }
            1 => {
                info!(
                    device = %device.display(),
                    mountpoint = %mountpoint.display(),
                    "found existing mount"
                );
            }
            count => {
                for m in &mounts {
                    info!(device = %m.device.display(), path = %m.path.display(), "existing mount");
                }
                return AmbiguousMountSnafu {
                    target: mountpoint,
                    count,
                }
                .fail();
            }
        }

        // When containerized the host-side mount is invisible in our own
        // namespace, so mount the device a second time locally. Mount
        // propagation could achieve the same, but this is simple.
        if let Some(bridge_backend) = &self.bridge_backend {
            self.bridge_mount(bridge_backend.as_ref(), &device, mountpoint)?;
        }

        Ok(())
    }

    /// Re-exposes the host-mounted device inside the local namespace.
    ///
    /// Idempotent: an existing local mount of the same device (raw or
    /// host-translated path) is a no-op; any other device is a hard error.
    fn bridge_mount(
        &self,
        backend: &dyn MountBackend,
        device: &Path,
        mountpoint: &Path,
    ) -> Result<()> {
        let source = self.translator.to_host_path(device);
        let target = self.translator.to_host_path(mountpoint);

        let mounted = backend
            .resolve_mounted_device(&target)
            .context(BridgeProbeSnafu {
                target: target.clone(),
            })?;

        match mounted {
            Some(mounted_device) => {
                // Tolerate /dev/X as well as the host-translated form
                if mounted_device != source && mounted_device != device {
                    return BridgeDeviceMismatchSnafu {
                        target,
                        mounted: mounted_device,
                        device,
                        host_device: source,
                    }
                    .fail();
                }
                debug!(
                    device = %mounted_device.display(),
                    target = %target.display(),
                    "device already mounted inside local namespace"
                );
            }
            None => {
                info!(
                    source = %source.display(),
                    target = %target.display(),
                    "mounting inside local namespace"
                );
                backend
                    .mount(&source, &target, self.fstype.as_deref(), &[])
                    .context(BridgeMountSnafu {
                        device: source.clone(),
                        target,
                    })?;
            }
        }

        Ok(())
    }
}
