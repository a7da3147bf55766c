//! Mount table queries scoped to one device or one path.
//!
//! Every query takes a fresh snapshot; nothing is cached between calls, so
//! the answer always reflects the kernel's view at the time of the call.

use std::path::Path;

use blockattach_common::AttachResult;

use crate::filesystem::{MountRecord, MountTable};

/// Mounts of the device at `real_path`.
///
/// With `match_block_special`, matches device nodes bind-mounted out of the
/// device special filesystem (how block volumes appear); otherwise matches
/// filesystems mounted from the device (how formatted volumes and their
/// binds appear).
///
/// # Errors
///
/// Fails only if the mount table cannot be read.
pub fn mounts_of_device<T: MountTable + ?Sized>(
    table: &T,
    real_path: &Path,
    match_block_special: bool,
) -> AttachResult<Vec<MountRecord>> {
    let mounts = table.mounts()?;
    Ok(filter_device(mounts, real_path, match_block_special))
}

/// Mounts whose mount point is `path`.
///
/// # Errors
///
/// Fails only if the mount table cannot be read.
pub fn mounts_at_path<T: MountTable + ?Sized>(
    table: &T,
    path: &Path,
) -> AttachResult<Vec<MountRecord>> {
    Ok(table
        .mounts()?
        .into_iter()
        .filter(|m| m.path == path)
        .collect())
}

/// Mounts of the device under either matcher.
///
/// Used when tearing down, where the volume kind is not known.
///
/// # Errors
///
/// Fails only if the mount table cannot be read.
pub fn staging_mounts_of_device<T: MountTable + ?Sized>(
    table: &T,
    real_path: &Path,
) -> AttachResult<Vec<MountRecord>> {
    Ok(table
        .mounts()?
        .into_iter()
        .filter(|m| m.is_bound_device_node(real_path) || m.is_mounted_from(real_path))
        .collect())
}

/// Apply the device matcher to an existing snapshot.
#[must_use]
pub fn filter_device(
    mounts: Vec<MountRecord>,
    real_path: &Path,
    match_block_special: bool,
) -> Vec<MountRecord> {
    mounts
        .into_iter()
        .filter(|m| {
            if match_block_special {
                m.is_bound_device_node(real_path)
            } else {
                m.is_mounted_from(real_path)
            }
        })
        .collect()
}
