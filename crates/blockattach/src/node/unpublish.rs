//! Unpublish: detach the target, then release the private mount point once
//! nothing else uses it.

use std::path::Path;

use blockattach_common::paths::private_mount_point;
use blockattach_common::{AttachError, AttachResult};

use crate::device::{self, Device};
use crate::filesystem::Host;
use crate::inspect;

use super::staging::PrivateMountPoint;
use super::types::UnpublishRequest;

/// Unpublish the device at `device_path` from the request's target path.
///
/// Whether the private mount point is still needed is read off the mount
/// table: it is released only when it is the device's last remaining mount.
/// Unpublishing a volume that is not published is a no-op.
///
/// # Errors
///
/// - `InvalidArgument` if the target path is empty.
/// - `Internal` if the device cannot be resolved, the mount table cannot be
///   read, or an unmount fails.
pub fn unpublish<H: Host + ?Sized>(
    host: &H,
    req: &UnpublishRequest,
    private_dir: &Path,
    device_path: &Path,
) -> AttachResult<()> {
    req.validate()?;
    let id = &req.volume_id;
    let target = req.target_path.as_path();

    let device = device::resolve(device_path).map_err(|e| {
        AttachError::internal(format!(
            "error getting block device for volume: {id}, err: {e}"
        ))
    })?;
    let private = private_mount_point(private_dir, &device.name);

    let span = tracing::debug_span!(
        "unpublish",
        volume_id = %id,
        device = %device.real_path.display(),
        target = %target.display(),
        private_mount = %private.display(),
    );
    let _enter = span.enter();

    let mounts = host.mounts()?;
    let mut target_mounted = false;
    let mut private_mounted = false;
    for m in mounts.iter().filter(|m| m.references(&device.real_path)) {
        if m.path == private {
            private_mounted = true;
        } else if m.path == target {
            target_mounted = true;
        }
    }

    if target_mounted {
        host.unmount(target).map_err(|e| {
            AttachError::internal(format!("Error unmounting target: {e}"))
        })?;
        tracing::info!("Target unmounted");
    } else {
        tracing::debug!("Target not mounted");
    }

    if private_mounted {
        release_private(host, &device, &private).map_err(|e| {
            AttachError::internal(format!(
                "Error unmounting private mount {}: {e}",
                private.display()
            ))
        })?;
    }

    Ok(())
}

/// Unmount and remove the private mount point if it is the device's only
/// remaining mount.
fn release_private<H: Host + ?Sized>(host: &H, device: &Device, private: &Path) -> AttachResult<()> {
    let remaining = inspect::staging_mounts_of_device(host, &device.real_path)?;

    match remaining.as_slice() {
        [only] if only.path == private => {
            host.unmount(private)?;
            tracing::info!("Private mount released");

            let point = if private.is_dir() {
                PrivateMountPoint::FilesystemStaging(private.to_path_buf())
            } else {
                PrivateMountPoint::BlockStaging(private.to_path_buf())
            };
            match point.remove() {
                Ok(()) => tracing::debug!("Removed private mount point"),
                Err(e) => tracing::warn!(error = %e, "Failed to remove private mount point"),
            }
        }
        _ => {
            tracing::debug!(
                remaining = remaining.len(),
                "Private mount still in use, leaving it in place"
            );
        }
    }
    Ok(())
}
