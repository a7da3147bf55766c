//! Standard filesystem paths for blockattach.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Default root directory for node-local attach state.
pub static BLOCKATTACH_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("BLOCKATTACH_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/var/lib/blockattach"))
});

/// Default mount table consulted by the inspector.
pub const DEFAULT_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Standard paths used on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachPaths {
    /// Root data directory (default: /var/lib/blockattach).
    pub root: PathBuf,
}

impl AttachPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding one private mount point per device.
    ///
    /// It must exist before the first publish; creating it is the job of
    /// whoever deploys the node plugin.
    #[must_use]
    pub fn private_dir(&self) -> PathBuf {
        self.root.join("private")
    }
}

impl Default for AttachPaths {
    fn default() -> Self {
        Self {
            root: BLOCKATTACH_ROOT.clone(),
        }
    }
}

/// Private mount point of `device_name` inside `private_dir`.
#[must_use]
pub fn private_mount_point(private_dir: &Path, device_name: &str) -> PathBuf {
    private_dir.join(device_name)
}
