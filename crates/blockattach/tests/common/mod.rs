//! In-memory host and on-disk fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use blockattach::filesystem::{DEVICE_SPECIAL_FS, MountRecord, MountTable, Mounter};
use blockattach::node::{AccessMode, PublishRequest, UnpublishRequest, VolumeCapability};
use blockattach_common::{AttachError, AttachResult, VolumeId};
use parking_lot::Mutex;
use tempfile::TempDir;

/// Mount table and mounter that only keep records in memory.
///
/// Binds of a mount point copy its device fields. Binds of anything else
/// look like a device node bound out of devtmpfs, with the source named
/// `udev` the way Debian and Ubuntu kernels report it.
#[derive(Default)]
pub struct FakeHost {
    mounts: Mutex<Vec<MountRecord>>,
    formatted: Mutex<HashSet<PathBuf>>,
    log: Mutex<Vec<String>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mount that was not made through this host.
    pub fn preload(&self, record: MountRecord) {
        self.mounts.lock().push(record);
    }

    /// Make every later call to `op` fail (`mounts`, `bind`, `mount`,
    /// `mkfs`, `unmount`).
    pub fn fail(&self, op: &'static str) {
        self.failing.lock().insert(op);
    }

    pub fn snapshot(&self) -> Vec<MountRecord> {
        self.mounts.lock().clone()
    }

    pub fn mounted_at(&self, path: &Path) -> Option<MountRecord> {
        self.mounts.lock().iter().find(|m| m.path == path).cloned()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn check(&self, op: &'static str, target: &Path) -> AttachResult<()> {
        if self.failing.lock().contains(op) {
            return Err(AttachError::mount(op, target, "injected failure"));
        }
        Ok(())
    }

    fn options(flags: &[String]) -> BTreeSet<String> {
        let mut options: BTreeSet<String> = flags
            .iter()
            .filter(|f| f.as_str() != "ro" && f.as_str() != "rw")
            .cloned()
            .collect();
        let permission = if flags.iter().any(|f| f == "ro") { "ro" } else { "rw" };
        options.insert(permission.to_string());
        options
    }
}

impl MountTable for FakeHost {
    fn mounts(&self) -> AttachResult<Vec<MountRecord>> {
        if self.failing.lock().contains("mounts") {
            return Err(AttachError::MountTable {
                message: "injected failure".to_string(),
            });
        }
        Ok(self.snapshot())
    }
}

impl Mounter for FakeHost {
    fn bind_mount(&self, source: &Path, target: &Path, options: &[String]) -> AttachResult<()> {
        self.check("bind", target)?;
        if !target.exists() {
            return Err(AttachError::mount("bind", target, "no such file or directory"));
        }

        let mut mounts = self.mounts.lock();
        let record = match mounts.iter().rev().find(|m| m.path == source) {
            Some(origin) => MountRecord {
                path: target.to_path_buf(),
                source: origin.source.clone(),
                device: origin.device.clone(),
                fs_type: origin.fs_type.clone(),
                options: Self::options(options),
            },
            None => MountRecord {
                path: target.to_path_buf(),
                source: std::fs::canonicalize(source)?,
                device: "udev".to_string(),
                fs_type: DEVICE_SPECIAL_FS.to_string(),
                options: Self::options(options),
            },
        };
        mounts.push(record);
        self.log
            .lock()
            .push(format!("bind {} {}", source.display(), target.display()));
        Ok(())
    }

    fn mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> AttachResult<()> {
        self.check("mount", target)?;
        let real = std::fs::canonicalize(device)?;
        self.mounts.lock().push(MountRecord {
            path: target.to_path_buf(),
            source: real.clone(),
            device: real.display().to_string(),
            fs_type: fs_type.to_string(),
            options: Self::options(options),
        });
        self.log
            .lock()
            .push(format!("mount {fs_type} {}", target.display()));
        Ok(())
    }

    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> AttachResult<()> {
        self.check("mkfs", target)?;
        let real = std::fs::canonicalize(device)?;
        if self.formatted.lock().insert(real) {
            self.log.lock().push(format!("mkfs {fs_type}"));
        }
        self.mount(device, target, fs_type, options)
    }

    fn unmount(&self, target: &Path) -> AttachResult<()> {
        self.check("unmount", target)?;
        let mut mounts = self.mounts.lock();
        let idx = mounts
            .iter()
            .rposition(|m| m.path == target)
            .ok_or_else(|| AttachError::mount("unmount", target, "not mounted"))?;
        mounts.remove(idx);
        self.log.lock().push(format!("unmount {}", target.display()));
        Ok(())
    }
}

/// A node laid out in a temp dir: `dev/` with device links to character
/// devices, an existing `private/` dir, and room for targets.
pub struct Node {
    pub dir: TempDir,
}

impl Node {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("dev")).unwrap();
        std::fs::create_dir(dir.path().join("private")).unwrap();
        symlink("/dev/null", dir.path().join("dev/sdb")).unwrap();
        symlink("/dev/zero", dir.path().join("dev/sdc")).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn private_dir(&self) -> PathBuf {
        self.path().join("private")
    }

    /// Link named `sdb` resolving to `/dev/null`.
    pub fn device(&self) -> PathBuf {
        self.path().join("dev/sdb")
    }

    /// Link named `sdc` resolving to `/dev/zero`.
    pub fn other_device(&self) -> PathBuf {
        self.path().join("dev/sdc")
    }

    pub fn private_mount(&self) -> PathBuf {
        self.private_dir().join("sdb")
    }

    /// Pre-created directory target.
    pub fn dir_target(&self, name: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::create_dir(&path).unwrap();
        path
    }

    /// Pre-created file target.
    pub fn file_target(&self, name: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }
}

pub fn fs_request(target: &Path, mode: AccessMode) -> PublishRequest {
    PublishRequest {
        volume_id: VolumeId::from("vol-1"),
        target_path: target.to_path_buf(),
        volume_capability: Some(VolumeCapability::filesystem(mode, "ext4", vec![])),
        readonly: false,
    }
}

pub fn block_request(target: &Path) -> PublishRequest {
    PublishRequest {
        volume_id: VolumeId::from("vol-1"),
        target_path: target.to_path_buf(),
        volume_capability: Some(VolumeCapability::block(AccessMode::SingleNodeWriter)),
        readonly: false,
    }
}

pub fn unpublish_request(target: &Path) -> UnpublishRequest {
    UnpublishRequest {
        volume_id: VolumeId::from("vol-1"),
        target_path: target.to_path_buf(),
    }
}

pub fn record(path: &Path, device: &str, options: &[&str]) -> MountRecord {
    MountRecord {
        path: path.to_path_buf(),
        source: PathBuf::from(device),
        device: device.to_string(),
        fs_type: "ext4".to_string(),
        options: options.iter().map(|o| (*o).to_string()).collect(),
    }
}
