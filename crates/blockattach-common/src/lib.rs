//! # blockattach-common
//!
//! Shared types for the blockattach node engine:
//! - Error taxonomy and the RPC-facing [`Status`]
//! - Volume and request identifiers
//! - Standard filesystem paths

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{AttachError, AttachResult, ErrorCode, Status};
pub use id::{RequestId, VolumeId};
pub use paths::AttachPaths;
