//! Filesystem probing and creation.

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;

use blockattach_common::{AttachError, AttachResult};

/// Filesystems this node knows how to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsKind {
    /// ext2.
    Ext2,
    /// ext3.
    Ext3,
    /// ext4.
    Ext4,
    /// XFS.
    Xfs,
    /// Btrfs.
    Btrfs,
}

impl FsKind {
    /// Name as used by mount(8) and `mkfs.<name>`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ext2 => "ext2",
            Self::Ext3 => "ext3",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Btrfs => "btrfs",
        }
    }

    /// Flag that makes `mkfs.<name>` proceed without prompting.
    const fn force_flag(self) -> &'static str {
        match self {
            Self::Ext2 | Self::Ext3 | Self::Ext4 => "-F",
            Self::Xfs | Self::Btrfs => "-f",
        }
    }

    /// Create a filesystem of this kind on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if `mkfs` cannot be spawned or exits unsuccessfully.
    pub fn format(self, device: &Path) -> AttachResult<()> {
        let program = format!("mkfs.{}", self.as_str());
        tracing::info!(device = %device.display(), fs_type = self.as_str(), "Formatting device");

        let output = Command::new(&program)
            .arg(self.force_flag())
            .arg(device)
            .output()
            .map_err(|e| AttachError::mount("format", device, format!("{program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(stderr = %stderr.trim(), "{program} failed");
            return Err(AttachError::mount("format", device, stderr.trim()));
        }
        Ok(())
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsKind {
    type Err = AttachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ext2" => Ok(Self::Ext2),
            "ext3" => Ok(Self::Ext3),
            "ext4" => Ok(Self::Ext4),
            "xfs" => Ok(Self::Xfs),
            "btrfs" => Ok(Self::Btrfs),
            other => Err(AttachError::Config {
                message: format!(
                    "unsupported filesystem type {other:?}, supported: ext2, ext3, ext4, xfs, btrfs"
                ),
            }),
        }
    }
}

/// Filesystem signature on `device`, if any.
///
/// Uses `blkid -p`, which reads the superblock directly instead of trusting
/// the udev cache. Exit status 2 means no signature was found.
///
/// # Errors
///
/// Returns an error if `blkid` cannot be run or fails for another reason.
pub fn existing_filesystem(device: &Path) -> AttachResult<Option<String>> {
    let output = Command::new("blkid")
        .args(["-p", "-s", "TYPE", "-o", "value"])
        .arg(device)
        .output()
        .map_err(|e| AttachError::mount("blkid", device, format!("blkid: {e}")))?;

    match output.status.code() {
        Some(0) => {
            let fs = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok((!fs.is_empty()).then_some(fs))
        }
        Some(2) => Ok(None),
        _ => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(AttachError::mount("blkid", device, stderr.trim()))
        }
    }
}
