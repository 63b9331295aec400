//! Mount backend capability and its command-backed implementation.
//!
//! The [`MountBackend`] trait is the controller's view of the mount table:
//! list mounts, format+mount a device, perform a plain mount, and resolve
//! which device (if any) backs a target path. [`CommandMountBackend`] is the
//! real implementation, shelling out to `findmnt`, `blkid`, `mkfs.*` and
//! `mount`, optionally entering the host's mount namespace via `nsenter` so
//! a containerized controller still operates on the host mount table.

use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Deserialize;
use snafu::ResultExt;
use tracing::{debug, info};

use crate::error::{
    CommandExecutionSnafu, CommandExitSnafu, Error, MountPointCreationSnafu, Result,
};

/// Filesystem used when a device carries no filesystem and the caller did not
/// ask for a specific one.
pub const DEFAULT_FSTYPE: &str = "ext4";

/// One entry of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Device backing the mount.
    pub device: PathBuf,
    /// Path the device is mounted at.
    pub path: PathBuf,
}

/// Mount-table operations the controller depends on.
pub trait MountBackend {
    /// Lists the current mounts.
    fn list_mounts(&self) -> Result<Vec<MountEntry>>;

    /// Creates the mount target directory (and parents) with mode 0750, in
    /// the same namespace the mounts execute in.
    fn create_mount_point(&self, target: &Path) -> Result<()>;

    /// Formats the device if it carries no filesystem, then mounts it.
    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: &[String],
    ) -> Result<()>;

    /// Performs a plain mount, no formatting.
    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: &[String],
    ) -> Result<()>;

    /// Reports the device mounted at `target`, if any.
    fn resolve_mounted_device(&self, target: &Path) -> Result<Option<PathBuf>>;
}

/// Which mount namespace the backend's commands execute in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum NamespaceEntry {
    /// Execute in the caller's own namespace.
    #[default]
    Local,
    /// Enter the host's mount namespace (PID 1) via `nsenter` before
    /// executing. Used by containerized controllers so mount operations hit
    /// the host mount table.
    HostMountNamespace,
}

/// Mount backend that shells out to the standard mount tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandMountBackend {
    namespace: NamespaceEntry,
}

impl CommandMountBackend {
    /// Creates a backend executing in the caller's own namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that executes inside the host's mount namespace.
    pub fn host_namespace() -> Self {
        Self {
            namespace: NamespaceEntry::HostMountNamespace,
        }
    }

    /// Builds the actual program and argument list, wrapping with `nsenter`
    /// when targeting the host namespace.
    fn wrap(&self, cmd: &str, args: &[&str]) -> (String, Vec<String>) {
        match self.namespace {
            NamespaceEntry::Local => (
                cmd.to_string(),
                args.iter().map(|a| a.to_string()).collect(),
            ),
            NamespaceEntry::HostMountNamespace => {
                let mut wrapped = vec![
                    "--target".to_string(),
                    "1".to_string(),
                    "--mount".to_string(),
                    "--".to_string(),
                    cmd.to_string(),
                ];
                wrapped.extend(args.iter().map(|a| a.to_string()));
                ("nsenter".to_string(), wrapped)
            }
        }
    }

    fn run(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let (program, program_args) = self.wrap(cmd, args);
        Command::new(&program)
            .args(&program_args)
            .output()
            .context(CommandExecutionSnafu {
                command: cmd.to_string(),
            })
    }

    fn run_checked(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let output = self.run(cmd, args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return CommandExitSnafu {
                command: cmd.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .fail();
        }
        Ok(output)
    }

    /// Probes the device for an existing filesystem via `blkid`.
    ///
    /// Returns the filesystem type, or `None` for an unformatted device
    /// (blkid exits 2 when it finds nothing).
    fn probe_filesystem(&self, device: &Path) -> Result<Option<String>> {
        let device = device.to_string_lossy();
        let output = self.run("blkid", &["-o", "value", "-s", "TYPE", device.as_ref()])?;

        if !output.status.success() {
            if output.status.code() == Some(2) {
                return Ok(None);
            }
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return CommandExitSnafu {
                command: "blkid".to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            }
            .fail();
        }

        let fstype = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if fstype.is_empty() { None } else { Some(fstype) })
    }
}

impl MountBackend for CommandMountBackend {
    fn list_mounts(&self) -> Result<Vec<MountEntry>> {
        let output = self.run_checked(
            "findmnt",
            &["--json", "--list", "--output", "SOURCE,TARGET"],
        )?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_findmnt_json(&stdout)
    }

    fn create_mount_point(&self, target: &Path) -> Result<()> {
        match self.namespace {
            NamespaceEntry::Local => create_mount_point(target),
            NamespaceEntry::HostMountNamespace => {
                let target = target.to_string_lossy();
                self.run_checked("mkdir", &["-p", "-m", "0750", target.as_ref()])?;
                Ok(())
            }
        }
    }

    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: &[String],
    ) -> Result<()> {
        if self.probe_filesystem(device)?.is_none() {
            let fstype = fstype.filter(|f| !f.is_empty()).unwrap_or(DEFAULT_FSTYPE);
            info!(device = %device.display(), fstype, "device has no filesystem, formatting");
            let device = device.to_string_lossy();
            self.run_checked(&format!("mkfs.{fstype}"), &[device.as_ref()])?;
        } else {
            debug!(device = %device.display(), "device already formatted");
        }

        self.mount(device, target, fstype, options)
    }

    fn mount(
        &self,
        source: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: &[String],
    ) -> Result<()> {
        let mut args: Vec<String> = Vec::new();
        if let Some(fstype) = fstype.filter(|f| !f.is_empty()) {
            args.push("-t".to_string());
            args.push(fstype.to_string());
        }
        if !options.is_empty() {
            args.push("-o".to_string());
            args.push(options.join(","));
        }
        args.push(source.to_string_lossy().into_owned());
        args.push(target.to_string_lossy().into_owned());

        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked("mount", &argv)?;
        Ok(())
    }

    fn resolve_mounted_device(&self, target: &Path) -> Result<Option<PathBuf>> {
        let mounts = self.list_mounts()?;
        // The last matching entry wins: it is the most recent mount at the
        // target.
        Ok(mounts
            .into_iter()
            .rev()
            .find(|m| m.path == target)
            .map(|m| m.device))
    }
}

/// Parses `findmnt --json --list` output into mount entries.
///
/// Entries without a device source (virtual filesystems like `proc` report
/// pseudo-sources; automount trigger entries report none) are kept as-is when
/// a source string is present and skipped otherwise.
fn parse_findmnt_json(json: &str) -> Result<Vec<MountEntry>> {
    let parsed: FindmntOutput = serde_json::from_str(json).map_err(|e| Error::FindmntParse {
        message: e.to_string(),
    })?;

    Ok(parsed
        .filesystems
        .into_iter()
        .filter_map(|fs| {
            let source = fs.source.filter(|s| !s.is_empty())?;
            Some(MountEntry {
                device: PathBuf::from(source),
                path: PathBuf::from(fs.target),
            })
        })
        .collect())
}

/// Raw JSON structure from findmnt output.
#[derive(Debug, Deserialize)]
struct FindmntOutput {
    filesystems: Vec<FindmntFilesystem>,
}

#[derive(Debug, Deserialize)]
struct FindmntFilesystem {
    #[serde(default)]
    source: Option<String>,
    target: String,
}

/// Creates a mount point directory (and parents) with mode 0750.
pub fn create_mount_point(path: &Path) -> Result<()> {
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o750)
        .create(path)
        .context(MountPointCreationSnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FINDMNT_JSON: &str = r#"{
        "filesystems": [
            {
                "source": "/dev/nvme0n1p2",
                "target": "/"
            },
            {
                "source": "proc",
                "target": "/proc"
            },
            {
                "source": "/dev/xvdb",
                "target": "/mnt/master-data"
            },
            {
                "source": null,
                "target": "/proc/sys/fs/binfmt_misc"
            }
        ]
    }"#;

    #[test]
    fn test_parse_findmnt_json() {
        let mounts = parse_findmnt_json(SAMPLE_FINDMNT_JSON).unwrap();
        assert_eq!(mounts.len(), 3);
        assert_eq!(
            mounts[2],
            MountEntry {
                device: PathBuf::from("/dev/xvdb"),
                path: PathBuf::from("/mnt/master-data"),
            }
        );
    }

    #[test]
    fn test_parse_findmnt_json_invalid() {
        let err = parse_findmnt_json("not json").unwrap_err();
        assert!(matches!(err, Error::FindmntParse { .. }));
    }

    #[test]
    fn test_wrap_local() {
        let backend = CommandMountBackend::new();
        let (program, args) = backend.wrap("mount", &["/dev/xvdb", "/mnt/master-data"]);
        assert_eq!(program, "mount");
        assert_eq!(args, vec!["/dev/xvdb", "/mnt/master-data"]);
    }

    #[test]
    fn test_wrap_host_namespace() {
        let backend = CommandMountBackend::host_namespace();
        let (program, args) = backend.wrap("mount", &["/dev/xvdb", "/mnt/master-data"]);
        assert_eq!(program, "nsenter");
        assert_eq!(
            args,
            vec![
                "--target",
                "1",
                "--mount",
                "--",
                "mount",
                "/dev/xvdb",
                "/mnt/master-data"
            ]
        );
    }

    #[test]
    fn test_create_mount_point() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("mnt/master-data");
        create_mount_point(&target).unwrap();
        assert!(target.is_dir());

        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);

        // Idempotent for an existing directory.
        create_mount_point(&target).unwrap();
    }
}
