//! Request types and the validated volume capability.
//!
//! The request types mirror the wire messages: every field the caller may
//! omit is an `Option`, so that validation can report exactly what was
//! missing. [`ValidatedCapability`] is what the rest of the engine works
//! with once validation has passed.

use std::path::PathBuf;

use blockattach_common::{AttachError, AttachResult, VolumeId};
use serde::{Deserialize, Serialize};

/// Requested access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    /// Unset on the wire.
    Unknown,
    /// Read-write on a single node.
    SingleNodeWriter,
    /// Read-only on a single node.
    SingleNodeReaderOnly,
    /// Read-only on many nodes.
    MultiNodeReaderOnly,
    /// One writer, many readers.
    MultiNodeSingleWriter,
    /// Many writers.
    MultiNodeMultiWriter,
}

/// Raw block volume: the device node itself is exposed at the target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVolume {}

/// Filesystem volume: the device is formatted and mounted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountVolume {
    /// Filesystem type; empty selects the node default.
    #[serde(default)]
    pub fs_type: String,
    /// Extra mount options, in order.
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

/// Capability as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    #[serde(default)]
    pub access_mode: Option<AccessMode>,
    /// Set for raw block volumes.
    #[serde(default)]
    pub block: Option<BlockVolume>,
    /// Set for filesystem volumes.
    #[serde(default)]
    pub mount: Option<MountVolume>,
}

impl VolumeCapability {
    /// Block capability with the given access mode.
    #[must_use]
    pub fn block(access_mode: AccessMode) -> Self {
        Self {
            access_mode: Some(access_mode),
            block: Some(BlockVolume {}),
            mount: None,
        }
    }

    /// Filesystem capability with the given access mode.
    #[must_use]
    pub fn filesystem(
        access_mode: AccessMode,
        fs_type: impl Into<String>,
        mount_flags: Vec<String>,
    ) -> Self {
        Self {
            access_mode: Some(access_mode),
            block: None,
            mount: Some(MountVolume {
                fs_type: fs_type.into(),
                mount_flags,
            }),
        }
    }
}

/// Publish request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    /// Volume being published; used for logs and messages only.
    pub volume_id: VolumeId,
    /// Pre-created target path.
    pub target_path: PathBuf,
    /// Requested capability.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the caller asked for a read-only publish.
    #[serde(default)]
    pub readonly: bool,
}

/// Unpublish request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpublishRequest {
    /// Volume being unpublished.
    pub volume_id: VolumeId,
    /// Target path to detach.
    pub target_path: PathBuf,
}

/// Access granted to a publish, reduced to what the mounts can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `SINGLE_NODE_WRITER`.
    ReadWrite,
    /// `SINGLE_NODE_READER_ONLY`.
    ReadOnly,
}

impl Access {
    /// Option an existing mount must carry to satisfy this access.
    #[must_use]
    pub const fn permission_flag(self) -> &'static str {
        match self {
            Self::ReadWrite => "rw",
            Self::ReadOnly => "ro",
        }
    }
}

/// How the volume is exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeType {
    /// The device node itself.
    Block,
    /// A filesystem on the device.
    Filesystem {
        /// Filesystem type.
        fs_type: String,
        /// Extra mount options, in order.
        mount_flags: Vec<String>,
    },
}

impl VolumeType {
    /// Whether this is a raw block volume.
    #[must_use]
    pub const fn is_block(&self) -> bool {
        matches!(self, Self::Block)
    }
}

/// A capability that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCapability {
    /// Granted access.
    pub access: Access,
    /// Volume kind.
    pub volume_type: VolumeType,
}

impl ValidatedCapability {
    /// Options for the bind from the private mount point to the target:
    /// none for block volumes, otherwise the declared mount flags plus `ro`
    /// for read-only access.
    #[must_use]
    pub fn target_mount_flags(&self) -> Vec<String> {
        match &self.volume_type {
            VolumeType::Block => Vec::new(),
            VolumeType::Filesystem { mount_flags, .. } => {
                let mut flags = mount_flags.clone();
                if self.access == Access::ReadOnly {
                    flags.push("ro".to_string());
                }
                flags
            }
        }
    }
}

impl PublishRequest {
    /// Validate the request shape.
    ///
    /// Checks, first failure wins: target present, capability present,
    /// access mode present and supported, exactly one volume type, and no
    /// read-only block volume.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::InvalidArgument`] describing the first problem.
    pub fn validate(&self) -> AttachResult<ValidatedCapability> {
        if self.target_path.as_os_str().is_empty() {
            return Err(AttachError::invalid_argument("target path required"));
        }

        let cap = self
            .volume_capability
            .as_ref()
            .ok_or_else(|| AttachError::invalid_argument("volume capability required"))?;

        let access = match cap.access_mode {
            None | Some(AccessMode::Unknown) => {
                return Err(AttachError::invalid_argument("access mode required"));
            }
            Some(AccessMode::SingleNodeWriter) => Access::ReadWrite,
            Some(AccessMode::SingleNodeReaderOnly) => Access::ReadOnly,
            Some(mode) => {
                return Err(AttachError::invalid_argument(format!(
                    "unsupported access mode {mode:?}"
                )));
            }
        };

        let volume_type = match (&cap.block, &cap.mount) {
            (Some(_), None) => VolumeType::Block,
            (None, Some(mount)) => VolumeType::Filesystem {
                fs_type: mount.fs_type.clone(),
                mount_flags: mount.mount_flags.clone(),
            },
            (None, None) => return Err(AttachError::invalid_argument("access type required")),
            (Some(_), Some(_)) => {
                return Err(AttachError::invalid_argument(
                    "only one of block or mount access type may be set",
                ));
            }
        };

        // A read-only bind of a device node does not stop writes to the
        // underlying medium.
        if volume_type.is_block() && (self.readonly || access == Access::ReadOnly) {
            return Err(AttachError::invalid_argument(
                "read only not supported for Block Volume",
            ));
        }

        Ok(ValidatedCapability {
            access,
            volume_type,
        })
    }
}

impl UnpublishRequest {
    /// Validate the request shape.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::InvalidArgument`] if the target path is empty.
    pub fn validate(&self) -> AttachResult<()> {
        if self.target_path.as_os_str().is_empty() {
            return Err(AttachError::invalid_argument("target path required"));
        }
        Ok(())
    }
}
