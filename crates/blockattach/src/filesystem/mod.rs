//! Host collaborators: the mount table and mount primitives.
//!
//! This module handles:
//! - Reading the live mount table (`/proc/self/mountinfo`)
//! - bind-mount, mount, format-and-mount and unmount
//!
//! The publish/unpublish logic only talks to the [`MountTable`] and
//! [`Mounter`] traits, so it can run against an in-memory host in tests.

mod format;
mod mountinfo;
mod mounts;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use blockattach_common::AttachResult;
use serde::{Deserialize, Serialize};

pub use format::{FsKind, existing_filesystem};
pub use mountinfo::{ProcMountTable, parse_mountinfo};
pub use mounts::{MountOptions, SystemMounter};

/// Declared filesystem type of the kernel's device node filesystem. A device
/// node bind-mounted elsewhere shows up with this as its filesystem type and
/// the node path as its source; the device field varies by distribution
/// (`devtmpfs`, `udev`, `none`).
pub const DEVICE_SPECIAL_FS: &str = "devtmpfs";

/// One observed entry of the mount table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRecord {
    /// Mount point.
    pub path: PathBuf,
    /// Origin of the mounted tree: the device for a plain mount, the path
    /// inside the originating filesystem for a bind mount.
    pub source: PathBuf,
    /// Mount source field as reported by the kernel (`/dev/sdb`, `udev`).
    pub device: String,
    /// Filesystem type.
    pub fs_type: String,
    /// Per-mount options (`rw`, `ro`, `noatime`, ...).
    pub options: BTreeSet<String>,
}

impl MountRecord {
    /// Whether the mount carries `option`.
    #[must_use]
    pub fn has_option(&self, option: &str) -> bool {
        self.options.contains(option)
    }

    /// A device node bind-mounted from the device special filesystem.
    #[must_use]
    pub fn is_bound_device_node(&self, real_path: &Path) -> bool {
        self.fs_type == DEVICE_SPECIAL_FS && self.source == real_path
    }

    /// A filesystem mounted from the device (or a bind of one).
    #[must_use]
    pub fn is_mounted_from(&self, real_path: &Path) -> bool {
        Path::new(&self.device) == real_path
    }

    /// Any entry whose source or device field names the device.
    #[must_use]
    pub fn references(&self, real_path: &Path) -> bool {
        self.source == real_path || Path::new(&self.device) == real_path
    }
}

/// Source of mount table snapshots.
pub trait MountTable {
    /// Enumerate all current mounts.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read or parsed.
    fn mounts(&self) -> AttachResult<Vec<MountRecord>>;
}

/// Mount primitives.
///
/// Option slices hold mount(8) style option strings (`ro`, `noatime`,
/// `discard`).
pub trait Mounter {
    /// Expose `source` at `target` as well.
    fn bind_mount(&self, source: &Path, target: &Path, options: &[String]) -> AttachResult<()>;

    /// Mount the filesystem on `device` at `target`.
    fn mount(&self, device: &Path, target: &Path, fs_type: &str, options: &[String])
    -> AttachResult<()>;

    /// Create a `fs_type` filesystem on `device` if it carries none, then
    /// mount it at `target`.
    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> AttachResult<()>;

    /// Unmount whatever is mounted at `target`.
    fn unmount(&self, target: &Path) -> AttachResult<()>;
}

/// Everything the attach engine needs from the node.
pub trait Host: MountTable + Mounter + Send + Sync {}

impl<T: MountTable + Mounter + Send + Sync> Host for T {}

/// The real node: `/proc/self/mountinfo` plus mount syscalls.
#[derive(Debug, Clone, Default)]
pub struct SystemHost {
    table: ProcMountTable,
    mounter: SystemMounter,
}

impl SystemHost {
    /// Create a host reading the given mountinfo file.
    #[must_use]
    pub fn new(mountinfo: impl Into<PathBuf>) -> Self {
        Self {
            table: ProcMountTable::new(mountinfo),
            mounter: SystemMounter,
        }
    }
}

impl MountTable for SystemHost {
    fn mounts(&self) -> AttachResult<Vec<MountRecord>> {
        self.table.mounts()
    }
}

impl Mounter for SystemHost {
    fn bind_mount(&self, source: &Path, target: &Path, options: &[String]) -> AttachResult<()> {
        self.mounter.bind_mount(source, target, options)
    }

    fn mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> AttachResult<()> {
        self.mounter.mount(device, target, fs_type, options)
    }

    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> AttachResult<()> {
        self.mounter.format_and_mount(device, target, fs_type, options)
    }

    fn unmount(&self, target: &Path) -> AttachResult<()> {
        self.mounter.unmount(target)
    }
}
