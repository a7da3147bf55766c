//! Node configuration.

use std::path::{Path, PathBuf};

use blockattach_common::paths::DEFAULT_MOUNTINFO;
use blockattach_common::{AttachError, AttachPaths, AttachResult};
use serde::Deserialize;

use crate::filesystem::FsKind;

/// Filesystem created on blank devices when the capability names none.
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// Node configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Paths for node-local state.
    pub paths: AttachPaths,
    /// Directory holding the private mount points.
    pub private_dir: PathBuf,
    /// Filesystem type used when a capability leaves it empty.
    pub default_fs_type: String,
    /// Mount table to inspect.
    pub mount_table: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let paths = AttachPaths::new();
        Self {
            private_dir: paths.private_dir(),
            paths,
            default_fs_type: DEFAULT_FS_TYPE.to_string(),
            mount_table: PathBuf::from(DEFAULT_MOUNTINFO),
        }
    }
}

/// On-disk form; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    root: Option<PathBuf>,
    private_dir: Option<PathBuf>,
    default_fs_type: Option<String>,
    mount_table: Option<PathBuf>,
}

impl NodeConfig {
    /// Set the root directory.
    ///
    /// The private dir moves along with it unless it was set explicitly.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        let follows_root = self.private_dir == self.paths.private_dir();
        self.paths = AttachPaths::with_root(root);
        if follows_root {
            self.private_dir = self.paths.private_dir();
        }
        self
    }

    /// Use a private dir outside the root.
    #[must_use]
    pub fn with_private_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.private_dir = dir.into();
        self
    }

    /// Set the default filesystem type.
    #[must_use]
    pub fn with_default_fs_type(mut self, fs_type: impl Into<String>) -> Self {
        self.default_fs_type = fs_type.into();
        self
    }

    /// Read mounts from another mountinfo file.
    #[must_use]
    pub fn with_mount_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_table = path.into();
        self
    }

    /// Load a TOML file on top of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::Config`] if the file cannot be read or parsed,
    /// or names a filesystem type that cannot be created.
    pub fn from_file(path: &Path) -> AttachResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AttachError::Config {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::default().merge_toml(&text)
    }

    /// Apply the keys set in `text` to this configuration.
    ///
    /// # Errors
    ///
    /// See [`Self::from_file`].
    pub fn merge_toml(mut self, text: &str) -> AttachResult<Self> {
        let file: FileConfig = toml::from_str(text).map_err(|e| AttachError::Config {
            message: e.to_string(),
        })?;

        if let Some(root) = file.root {
            self = self.with_root(root);
        }
        if let Some(dir) = file.private_dir {
            self.private_dir = dir;
        }
        if let Some(fs_type) = file.default_fs_type {
            self.default_fs_type = fs_type.parse::<FsKind>()?.to_string();
        }
        if let Some(table) = file.mount_table {
            self.mount_table = table;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.default_fs_type, "ext4");
        assert_eq!(config.mount_table, PathBuf::from("/proc/self/mountinfo"));
        assert_eq!(config.private_dir, config.paths.private_dir());
    }

    #[test]
    fn builder_pattern() {
        let config = NodeConfig::default()
            .with_root("/custom/root")
            .with_default_fs_type("xfs")
            .with_mount_table("/tmp/mountinfo");

        assert_eq!(config.private_dir, PathBuf::from("/custom/root/private"));
        assert_eq!(config.default_fs_type, "xfs");
        assert_eq!(config.mount_table, PathBuf::from("/tmp/mountinfo"));

        let config = config.with_private_dir("/plugin/private");
        assert_eq!(config.private_dir, PathBuf::from("/plugin/private"));
    }

    #[test]
    fn explicit_private_dir_survives_root_change() {
        let config = NodeConfig::default()
            .merge_toml(r#"private_dir = "/plugin/private""#)
            .unwrap()
            .with_root("/elsewhere");
        assert_eq!(config.paths.root, PathBuf::from("/elsewhere"));
        assert_eq!(config.private_dir, PathBuf::from("/plugin/private"));
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = NodeConfig::default()
            .merge_toml(
                r#"
                root = "/srv/attach"
                default_fs_type = "xfs"
                "#,
            )
            .unwrap();
        assert_eq!(config.private_dir, PathBuf::from("/srv/attach/private"));
        assert_eq!(config.default_fs_type, "xfs");
        assert_eq!(config.mount_table, PathBuf::from(DEFAULT_MOUNTINFO));
    }

    #[test]
    fn toml_rejects_unknown_fs_and_keys() {
        let err = NodeConfig::default()
            .merge_toml(r#"default_fs_type = "ntfs""#)
            .unwrap_err();
        assert!(matches!(err, AttachError::Config { .. }));

        let err = NodeConfig::default()
            .merge_toml(r#"rootless = true"#)
            .unwrap_err();
        assert!(matches!(err, AttachError::Config { .. }));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "private_dir = \"/p\"\n").unwrap();

        let config = NodeConfig::from_file(&path).unwrap();
        assert_eq!(config.private_dir, PathBuf::from("/p"));

        let missing = NodeConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(missing.to_string().contains("failed to read"));
    }
}
