//! Publish: device -> private mount point -> target.

use std::io::ErrorKind;
use std::path::Path;

use blockattach_common::{AttachError, AttachResult};

use crate::device;
use crate::filesystem::Host;
use crate::inspect;

use super::staging;
use super::types::PublishRequest;

/// Publish the device at `device_path` to the request's target path.
///
/// The device is mounted once at its private mount point inside
/// `private_dir`; the target becomes a bind of that mount point, so several
/// targets can share one device. Calling this again with the same arguments
/// after it succeeded is a no-op.
///
/// # Errors
///
/// - `InvalidArgument` for a malformed request, or an access mode that
///   conflicts with how the device is already staged.
/// - `FailedPrecondition` if the target does not exist or is of the wrong
///   kind for the volume type.
/// - `Internal` for everything else.
pub fn publish<H: Host + ?Sized>(
    host: &H,
    req: &PublishRequest,
    private_dir: &Path,
    device_path: &Path,
) -> AttachResult<()> {
    let capability = req.validate()?;
    let id = &req.volume_id;
    let target = req.target_path.as_path();

    let device = device::resolve(device_path).map_err(|e| {
        AttachError::internal(format!(
            "error getting block device for volume: {id}, err: {e}"
        ))
    })?;

    let target_meta = match std::fs::metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(AttachError::failed_precondition(format!(
                "publish target: {} not pre-created",
                target.display()
            )));
        }
        Err(e) => {
            return Err(AttachError::internal(format!(
                "failed to stat target, err: {e}"
            )));
        }
    };

    match std::fs::metadata(private_dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(AttachError::internal(format!(
                "private dir: {} is not a directory",
                private_dir.display()
            )));
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(AttachError::internal(format!(
                "plugin private dir: {} not pre-created",
                private_dir.display()
            )));
        }
        Err(e) => {
            return Err(AttachError::internal(format!(
                "failed to stat private dir, err: {e}"
            )));
        }
    }

    let is_block = capability.volume_type.is_block();
    if target_meta.is_dir() == is_block {
        return Err(AttachError::failed_precondition(format!(
            "target: {} wrong type (file vs dir) Access Type",
            target.display()
        )));
    }

    let span = tracing::debug_span!(
        "publish",
        volume_id = %id,
        volume_path = %device.full_path.display(),
        device = %device.real_path.display(),
        target = %target.display(),
    );
    let _enter = span.enter();

    let private = staging::ensure(host, private_dir, &device, &capability)?;

    let dev_mounts = inspect::mounts_of_device(host, &device.real_path, is_block)?;
    if let Some(existing) = dev_mounts.iter().find(|m| m.path == target) {
        let wanted = capability.access.permission_flag();
        if !existing.has_option(wanted) {
            return Err(AttachError::internal(format!(
                "volume {id} previously published to {} with different options",
                target.display()
            )));
        }
        tracing::debug!("Volume already published to target");
        return Ok(());
    }

    let flags = capability.target_mount_flags();
    host.bind_mount(private.path(), target, &flags)
        .map_err(|e| {
            AttachError::internal(format!(
                "error publish volume {id} from {} to target path: {e}",
                private.path().display()
            ))
        })?;

    tracing::info!(
        private_mount = %private.path().display(),
        ?flags,
        "Volume published"
    );
    Ok(())
}
