//! Resolution of a backend-supplied path to a concrete device node.

use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use blockattach_common::{AttachError, AttachResult};

/// A resolved device node.
///
/// Two `Device` values refer to the same physical device iff their
/// `real_path` matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Path as given by the caller, possibly a symlink.
    pub full_path: PathBuf,
    /// Base name of `full_path`; names the private mount point.
    pub name: String,
    /// Symlink-resolved canonical path of the device node.
    pub real_path: PathBuf,
}

/// Resolve `path` to a [`Device`].
///
/// The name is taken from the path itself rather than from the link target,
/// so `/dev/disk/by-id/vol-1 -> /dev/sdb` is named `vol-1`.
///
/// # Errors
///
/// Returns [`AttachError::DeviceNotFound`] if `path` or the end of its
/// symlink chain does not exist, and [`AttachError::NotADevice`] if the
/// resolved node is not a block or character special file.
pub fn resolve(path: impl AsRef<Path>) -> AttachResult<Device> {
    let path = path.as_ref();

    std::fs::symlink_metadata(path).map_err(|e| not_found_or_io(path, e))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| AttachError::NotADevice {
            path: path.to_path_buf(),
        })?;

    let real_path = std::fs::canonicalize(path).map_err(|e| not_found_or_io(path, e))?;
    let file_type = std::fs::metadata(&real_path)
        .map_err(|e| not_found_or_io(path, e))?
        .file_type();

    if !(file_type.is_block_device() || file_type.is_char_device()) {
        return Err(AttachError::NotADevice {
            path: path.to_path_buf(),
        });
    }

    tracing::trace!(
        path = %path.display(),
        real_path = %real_path.display(),
        "Resolved device"
    );

    Ok(Device {
        full_path: path.to_path_buf(),
        name,
        real_path,
    })
}

fn not_found_or_io(path: &Path, err: std::io::Error) -> AttachError {
    if err.kind() == ErrorKind::NotFound {
        AttachError::DeviceNotFound {
            path: path.to_path_buf(),
        }
    } else {
        AttachError::Io(err)
    }
}
