//! Node publish/unpublish.
//!
//! The free functions [`publish`] and [`unpublish`] are the synchronous
//! engine; they hold no state between calls and re-derive everything from
//! the mount table. [`NodeService`] is the entry point for the RPC layer:
//! it tags each call with a request id, serializes calls per volume, and
//! runs the blocking engine off the async runtime.

mod publish;
mod staging;
mod types;
mod unpublish;

use std::path::PathBuf;
use std::sync::Arc;

use blockattach_common::{AttachResult, ErrorCode, RequestId, Status, VolumeId};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::Instrument;

use crate::config::NodeConfig;
use crate::filesystem::{Host, SystemHost};

pub use publish::publish;
pub use staging::PrivateMountPoint;
pub use types::{
    Access, AccessMode, BlockVolume, MountVolume, PublishRequest, UnpublishRequest,
    ValidatedCapability, VolumeCapability, VolumeType,
};
pub use unpublish::unpublish;

type VolumeLocks = Arc<DashMap<VolumeId, Arc<Mutex<()>>>>;

/// Node-side entry point for publish and unpublish.
pub struct NodeService {
    config: NodeConfig,
    host: Arc<dyn Host>,
    locks: VolumeLocks,
}

/// A volume's lock, shared with the map it came from.
///
/// Dropping it removes the map entry once no other call holds the lock.
/// It lives inside the blocking task, so the entry is released even if
/// the caller stops waiting.
struct VolumeLock {
    locks: VolumeLocks,
    volume_id: VolumeId,
    lock: Arc<Mutex<()>>,
}

impl VolumeLock {
    fn acquire(locks: &VolumeLocks, volume_id: VolumeId) -> Self {
        let lock = Arc::clone(locks.entry(volume_id.clone()).or_default().value());
        Self {
            locks: Arc::clone(locks),
            volume_id,
            lock,
        }
    }
}

impl Drop for VolumeLock {
    fn drop(&mut self) {
        // One reference in the map and one here: nobody else is waiting.
        self.locks.remove_if(&self.volume_id, |_, l| {
            Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2
        });
    }
}

impl NodeService {
    /// Create a service over the given host.
    pub fn new(config: NodeConfig, host: Arc<dyn Host>) -> Self {
        Self {
            config,
            host,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Create a service over this node's real mount table and syscalls.
    #[must_use]
    pub fn system(config: NodeConfig) -> Self {
        let host = Arc::new(SystemHost::new(&config.mount_table));
        Self::new(config, host)
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Number of volumes with a call in flight.
    #[must_use]
    pub fn busy_volumes(&self) -> usize {
        self.locks.len()
    }

    /// Publish the device at `device_path` to `req.target_path`.
    ///
    /// An empty filesystem type is replaced by the configured default.
    ///
    /// # Errors
    ///
    /// Returns the [`Status`] of the first failure.
    pub async fn publish(
        &self,
        request_id: Option<RequestId>,
        mut req: PublishRequest,
        device_path: PathBuf,
    ) -> Result<(), Status> {
        if let Some(mount) = req
            .volume_capability
            .as_mut()
            .and_then(|cap| cap.mount.as_mut())
            .filter(|m| m.fs_type.is_empty())
        {
            mount.fs_type.clone_from(&self.config.default_fs_type);
        }

        let request_id = request_id.unwrap_or_else(RequestId::generate);
        let span = tracing::info_span!(
            "node_publish",
            request_id = %request_id,
            volume_id = %req.volume_id,
        );
        let volume_id = req.volume_id.clone();
        let private_dir = self.config.private_dir.clone();

        self.run(volume_id, span, move |host| {
            publish(host, &req, &private_dir, &device_path)
        })
        .await
    }

    /// Unpublish the device at `device_path` from `req.target_path`.
    ///
    /// # Errors
    ///
    /// Returns the [`Status`] of the first failure.
    pub async fn unpublish(
        &self,
        request_id: Option<RequestId>,
        req: UnpublishRequest,
        device_path: PathBuf,
    ) -> Result<(), Status> {
        let request_id = request_id.unwrap_or_else(RequestId::generate);
        let span = tracing::info_span!(
            "node_unpublish",
            request_id = %request_id,
            volume_id = %req.volume_id,
        );
        let volume_id = req.volume_id.clone();
        let private_dir = self.config.private_dir.clone();

        self.run(volume_id, span, move |host| {
            unpublish(host, &req, &private_dir, &device_path)
        })
        .await
    }

    /// Run `op` on the blocking pool while holding the volume's lock.
    async fn run<F>(&self, volume_id: VolumeId, span: tracing::Span, op: F) -> Result<(), Status>
    where
        F: FnOnce(&dyn Host) -> AttachResult<()> + Send + 'static,
    {
        let entry = VolumeLock::acquire(&self.locks, volume_id);
        let host = Arc::clone(&self.host);
        let blocking_span = span.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let _enter = blocking_span.enter();
            let result = {
                let _guard = entry.lock.lock();
                op(host.as_ref())
            };
            drop(entry);
            result
        })
        .instrument(span.clone())
        .await;

        let _enter = span.enter();
        match joined {
            Ok(Ok(())) => {
                tracing::info!("Request succeeded");
                Ok(())
            }
            Ok(Err(err)) => {
                let status = Status::from(err);
                tracing::warn!(code = %status.code, message = %status.message, "Request failed");
                Err(status)
            }
            Err(join) => {
                tracing::error!(error = %join, "Blocking task failed");
                Err(Status::new(ErrorCode::Internal, join.to_string()))
            }
        }
    }
}
