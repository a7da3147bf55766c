//! Mount operations.

use std::ffi::CString;
use std::path::Path;

use blockattach_common::{AttachError, AttachResult};

use super::Mounter;
use super::format::{FsKind, existing_filesystem};

/// Mount options split into kernel flags and filesystem data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Read-only mount.
    pub readonly: bool,
    /// No exec.
    pub noexec: bool,
    /// No suid.
    pub nosuid: bool,
    /// No dev.
    pub nodev: bool,
    /// Do not update access times.
    pub noatime: bool,
    /// Do not update directory access times.
    pub nodiratime: bool,
    /// Relative access time updates.
    pub relatime: bool,
    /// Synchronous writes.
    pub sync: bool,
    /// Options the kernel does not take as flags, passed to the filesystem.
    pub data: Vec<String>,
}

impl MountOptions {
    /// Parse mount(8) style option strings.
    ///
    /// Later options win over earlier ones, so `["ro", "rw"]` is read-write.
    #[must_use]
    pub fn parse(options: &[String]) -> Self {
        let mut opts = Self::default();
        for option in options.iter().flat_map(|o| o.split(',')) {
            match option.trim() {
                "" | "defaults" | "bind" | "async" | "exec" | "suid" | "dev" | "atime" => {}
                "ro" => opts.readonly = true,
                "rw" => opts.readonly = false,
                "noexec" => opts.noexec = true,
                "nosuid" => opts.nosuid = true,
                "nodev" => opts.nodev = true,
                "noatime" => opts.noatime = true,
                "nodiratime" => opts.nodiratime = true,
                "relatime" => opts.relatime = true,
                "sync" => opts.sync = true,
                other => opts.data.push(other.to_string()),
            }
        }
        opts
    }

    /// Kernel mount flags.
    #[must_use]
    pub fn flags(&self) -> rustix::mount::MountFlags {
        use rustix::mount::MountFlags;

        let mut flags = MountFlags::empty();
        if self.readonly {
            flags |= MountFlags::RDONLY;
        }
        if self.noexec {
            flags |= MountFlags::NOEXEC;
        }
        if self.nosuid {
            flags |= MountFlags::NOSUID;
        }
        if self.nodev {
            flags |= MountFlags::NODEV;
        }
        if self.noatime {
            flags |= MountFlags::NOATIME;
        }
        if self.nodiratime {
            flags |= MountFlags::NODIRATIME;
        }
        if self.relatime {
            flags |= MountFlags::RELATIME;
        }
        if self.sync {
            flags |= MountFlags::SYNCHRONOUS;
        }
        flags
    }

    /// Comma separated filesystem data string.
    #[must_use]
    pub fn data_string(&self) -> String {
        self.data.join(",")
    }
}

/// Mounter issuing mount syscalls through `rustix`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMounter;

impl Mounter for SystemMounter {
    fn bind_mount(&self, source: &Path, target: &Path, options: &[String]) -> AttachResult<()> {
        use rustix::mount::{MountFlags, mount_bind, mount_remount};

        let opts = MountOptions::parse(options);
        tracing::debug!(
            source = %source.display(),
            target = %target.display(),
            ?opts,
            "Creating bind mount"
        );

        mount_bind(source, target).map_err(|e| AttachError::mount("bind mount", target, e))?;

        // Flags on the initial bind are ignored by the kernel; they only take
        // effect through a bind remount.
        let flags = opts.flags();
        if !flags.is_empty() {
            let data = c_string(&opts.data_string(), target)?;
            if let Err(e) = mount_remount(target, MountFlags::BIND | flags, data.as_c_str()) {
                if let Err(undo) = self.unmount(target) {
                    tracing::warn!(target = %target.display(), error = %undo, "Failed to undo bind mount");
                }
                return Err(AttachError::mount("bind remount", target, e));
            }
        }

        tracing::debug!(
            source = %source.display(),
            target = %target.display(),
            "Bind mount created successfully"
        );
        Ok(())
    }

    fn mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> AttachResult<()> {
        use rustix::mount::mount;

        // The kernel records the name it is given; canonicalize so the mount
        // table reports the real device node rather than a by-id link.
        let device = std::fs::canonicalize(device)?;
        let opts = MountOptions::parse(options);

        tracing::debug!(
            device = %device.display(),
            target = %target.display(),
            fs_type,
            ?opts,
            "Mounting filesystem"
        );

        let fstype_c = c_string(fs_type, target)?;
        let data_c = c_string(&opts.data_string(), target)?;

        mount(
            device.as_path(),
            target,
            fstype_c.as_c_str(),
            opts.flags(),
            data_c.as_c_str(),
        )
        .map_err(|e| AttachError::mount("mount", target, e))?;

        Ok(())
    }

    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> AttachResult<()> {
        let kind: FsKind = fs_type.parse()?;

        match existing_filesystem(device)? {
            None => kind.format(device)?,
            Some(existing) if existing == kind.as_str() => {
                tracing::debug!(device = %device.display(), fs_type = %existing, "Device already formatted");
            }
            Some(existing) => {
                return Err(AttachError::mount(
                    "format",
                    device,
                    format!("device already formatted as {existing}, requested {kind}"),
                ));
            }
        }

        self.mount(device, target, kind.as_str(), options)
    }

    fn unmount(&self, target: &Path) -> AttachResult<()> {
        use rustix::mount::{UnmountFlags, unmount};

        tracing::debug!(target = %target.display(), "Unmounting filesystem");

        unmount(target, UnmountFlags::empty()).map_err(|e| AttachError::mount("unmount", target, e))
    }
}

fn c_string(value: &str, target: &Path) -> AttachResult<CString> {
    CString::new(value).map_err(|e| AttachError::mount("mount", target, e))
}
