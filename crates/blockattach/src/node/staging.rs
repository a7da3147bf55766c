//! Private mount points.
//!
//! Each device gets exactly one private mount point, `<private_dir>/<name>`.
//! It is the only place the device itself is mounted (or, for block
//! volumes, bind-mounted); every target path is a bind of it. The mount
//! point is a regular file for block volumes and a directory for filesystem
//! volumes, fixed when it is first created.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use blockattach_common::paths::private_mount_point;
use blockattach_common::{AttachError, AttachResult};

use crate::device::Device;
use crate::filesystem::Host;
use crate::inspect;

use super::types::{Access, ValidatedCapability, VolumeType};

/// Staging path of a device, typed by volume kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrivateMountPoint {
    /// Regular file a device node is bind-mounted onto.
    BlockStaging(PathBuf),
    /// Directory a filesystem is mounted onto.
    FilesystemStaging(PathBuf),
}

impl PrivateMountPoint {
    /// Private mount point of `device` for a volume of `volume_type`.
    #[must_use]
    pub fn for_device(private_dir: &Path, device: &Device, volume_type: &VolumeType) -> Self {
        let path = private_mount_point(private_dir, &device.name);
        if volume_type.is_block() {
            Self::BlockStaging(path)
        } else {
            Self::FilesystemStaging(path)
        }
    }

    /// Path of the mount point.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::BlockStaging(p) | Self::FilesystemStaging(p) => p,
        }
    }

    /// Create the mount point if needed.
    ///
    /// Returns `true` if it was created, `false` if it already existed with
    /// the right kind.
    ///
    /// # Errors
    ///
    /// Fails if the path exists with the other kind, or on I/O errors.
    pub fn create(&self) -> AttachResult<bool> {
        let path = self.path();
        match std::fs::metadata(path) {
            Ok(meta) => match self {
                Self::BlockStaging(_) if meta.is_dir() => Err(AttachError::internal(format!(
                    "private mount point {} exists and is a directory",
                    path.display()
                ))),
                Self::FilesystemStaging(_) if !meta.is_dir() => {
                    Err(AttachError::internal(format!(
                        "private mount point {} exists and is not a directory",
                        path.display()
                    )))
                }
                _ => Ok(false),
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                match self {
                    Self::BlockStaging(_) => {
                        std::fs::OpenOptions::new()
                            .write(true)
                            .create_new(true)
                            .open(path)?;
                        tracing::debug!(path = %path.display(), "Created file");
                    }
                    Self::FilesystemStaging(_) => {
                        std::fs::create_dir(path)?;
                        tracing::debug!(path = %path.display(), "Created directory");
                    }
                }
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the (unmounted) mount point.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn remove(&self) -> std::io::Result<()> {
        match self {
            Self::BlockStaging(p) => std::fs::remove_file(p),
            Self::FilesystemStaging(p) => std::fs::remove_dir(p),
        }
    }
}

/// Make sure `device` is mounted at its private mount point with the access
/// the capability asks for.
///
/// Idempotent: a correctly mounted private mount point is left as is.
///
/// # Errors
///
/// - `InvalidArgument` if the device is already staged with the other
///   access mode.
/// - `Internal` if the device is mounted elsewhere without a private mount,
///   if a leftover mount point is in use by something else, or if any mount
///   step fails.
pub fn ensure<H: Host + ?Sized>(
    host: &H,
    private_dir: &Path,
    device: &Device,
    capability: &ValidatedCapability,
) -> AttachResult<PrivateMountPoint> {
    let point = PrivateMountPoint::for_device(private_dir, device, &capability.volume_type);
    let is_block = capability.volume_type.is_block();

    let dev_mounts = inspect::mounts_of_device(host, &device.real_path, is_block)?;

    if dev_mounts.is_empty() {
        tracing::debug!(private_mount = %point.path().display(), "Attempting mount to private area");
        create_unused(host, &point)?;
        mount_private(host, device, capability, &point)?;
        tracing::info!(
            device = %device.real_path.display(),
            private_mount = %point.path().display(),
            "Private mount established"
        );
        return Ok(point);
    }

    let wanted = capability.access.permission_flag();
    match dev_mounts.iter().find(|m| m.path == point.path()) {
        Some(m) if m.has_option(wanted) => {
            tracing::debug!(private_mount = %point.path().display(), "Private mount already in place");
            Ok(point)
        }
        Some(_) => Err(AttachError::invalid_argument(format!(
            "access mode conflicts with existing mounts at {}",
            point.path().display()
        ))),
        None => {
            tracing::error!(
                device = %device.real_path.display(),
                mounted_at = ?dev_mounts.iter().map(|m| &m.path).collect::<Vec<_>>(),
                "Device already in use and mounted elsewhere"
            );
            Err(AttachError::internal(format!(
                "device {} already in use and mounted elsewhere",
                device.real_path.display()
            )))
        }
    }
}

/// Create the mount point; a leftover one is reused only if nothing is
/// mounted on it.
fn create_unused<H: Host + ?Sized>(host: &H, point: &PrivateMountPoint) -> AttachResult<()> {
    let created = point
        .create()
        .map_err(|e| AttachError::internal(format!("Unable to create private mount point: {e}")))?;
    if created {
        return Ok(());
    }

    tracing::debug!(private_mount = %point.path().display(), "Private mount target already exists");
    if let Some(m) = inspect::mounts_at_path(host, point.path())?.first() {
        tracing::error!(
            private_mount = %point.path().display(),
            mounted_device = %m.device,
            "Mount point already in use by device"
        );
        return Err(AttachError::internal(format!(
            "Unable to use private mount point {}: already in use",
            point.path().display()
        )));
    }
    Ok(())
}

fn mount_private<H: Host + ?Sized>(
    host: &H,
    device: &Device,
    capability: &ValidatedCapability,
    point: &PrivateMountPoint,
) -> AttachResult<()> {
    let target = point.path();
    let result = match &capability.volume_type {
        VolumeType::Block => host.bind_mount(&device.full_path, target, &[]),
        VolumeType::Filesystem {
            fs_type,
            mount_flags,
        } => match capability.access {
            // Never format a volume the caller only wants to read.
            Access::ReadOnly => {
                let mut flags = mount_flags.clone();
                flags.push("ro".to_string());
                host.mount(&device.full_path, target, fs_type, &flags)
            }
            Access::ReadWrite => {
                host.format_and_mount(&device.full_path, target, fs_type, mount_flags)
            }
        },
    };

    result.map_err(|e| {
        let what = if capability.volume_type.is_block() {
            "failure bind-mounting block device to private mount"
        } else {
            "error performing private mount"
        };
        AttachError::internal(format!("{what}: {e}"))
    })
}
