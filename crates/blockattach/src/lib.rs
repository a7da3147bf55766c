//! # blockattach
//!
//! Node-local publish/unpublish of block volumes.
//!
//! A device is mounted once, at a private mount point named after it, and
//! every workload target is a bind of that private mount point. The engine
//! keeps no state of its own: each call re-reads the mount table and
//! decides from what it sees, so retries and crashes converge.
//!
//! ## Features
//!
//! - **Raw block volumes**: the device node is bind-mounted onto a file
//! - **Filesystem volumes**: formatted on first use, mounted onto a directory
//! - **Sharing**: several targets on one device share one private mount
//! - **Idempotence**: repeating a successful call is a no-op
//!
//! ## Usage
//!
//! ```no_run
//! use blockattach::config::NodeConfig;
//! use blockattach::node::{AccessMode, NodeService, PublishRequest, VolumeCapability};
//!
//! # async fn example() -> Result<(), blockattach_common::Status> {
//! let service = NodeService::system(NodeConfig::default());
//!
//! let request = PublishRequest {
//!     volume_id: "vol-1".into(),
//!     target_path: "/var/lib/kubelet/pods/p/volumes/vol-1".into(),
//!     volume_capability: Some(VolumeCapability::filesystem(
//!         AccessMode::SingleNodeWriter,
//!         "ext4",
//!         vec![],
//!     )),
//!     readonly: false,
//! };
//! service.publish(None, request, "/dev/disk/by-id/vol-1".into()).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod device;
pub mod filesystem;
pub mod inspect;
pub mod node;

pub use blockattach_common::{AttachError, AttachResult, ErrorCode, Status};
pub use config::NodeConfig;
pub use node::{NodeService, publish, unpublish};
