//! Error taxonomy for publish and unpublish.
//!
//! Every failure the attach engine reports is an [`AttachError`]. The RPC
//! layer only ever sees the coarse [`ErrorCode`] plus a message, carried in a
//! [`Status`]; the finer variants exist so that lower layers (device
//! resolution, mount table parsing, mount syscalls) can be matched on before
//! they are folded into `Internal`.

use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`AttachError`].
pub type AttachResult<T> = Result<T, AttachError>;

/// Status code exposed to callers, mapped 1:1 onto the transport's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed or contradictory request. Never retried automatically.
    InvalidArgument,
    /// Expected external state is missing.
    FailedPrecondition,
    /// Everything else.
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::FailedPrecondition => "FailedPrecondition",
            Self::Internal => "Internal",
        };
        f.write_str(s)
    }
}

/// Errors produced while attaching or detaching a volume.
#[derive(Error, Diagnostic, Debug)]
pub enum AttachError {
    /// The request is malformed or conflicts with existing mounts.
    #[error("{message}")]
    #[diagnostic(code(blockattach::invalid_argument))]
    InvalidArgument {
        /// Human readable reason.
        message: String,
    },

    /// External state the request depends on is missing or of the wrong kind.
    #[error("{message}")]
    #[diagnostic(
        code(blockattach::failed_precondition),
        help("The target path must be created by the caller before publishing")
    )]
    FailedPrecondition {
        /// Human readable reason.
        message: String,
    },

    /// Inconsistent mount state or an unexpected system failure.
    #[error("{message}")]
    #[diagnostic(code(blockattach::internal))]
    Internal {
        /// Human readable reason.
        message: String,
    },

    /// The device path (or the target of its symlink chain) does not exist.
    #[error("device not found: {}", path.display())]
    #[diagnostic(code(blockattach::device::not_found))]
    DeviceNotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The resolved path exists but is not a device node.
    #[error("{} is not a block device", path.display())]
    #[diagnostic(code(blockattach::device::not_a_device))]
    NotADevice {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The mount table could not be read or parsed.
    #[error("could not reliably determine existing mount status: {message}")]
    #[diagnostic(code(blockattach::mount_table))]
    MountTable {
        /// Human readable reason.
        message: String,
    },

    /// A mount, bind-mount, format or unmount operation failed.
    #[error("{operation} failed at {}: {reason}", target.display())]
    #[diagnostic(
        code(blockattach::mount),
        help("Mount operations require CAP_SYS_ADMIN in the host mount namespace")
    )]
    Mount {
        /// Operation that failed (`mount`, `bind mount`, `unmount`, `format`).
        operation: &'static str,
        /// Path the operation was applied to.
        target: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(blockattach::io))]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(blockattach::config))]
    Config {
        /// The error message.
        message: String,
    },
}

impl AttachError {
    /// Build an [`AttachError::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Build an [`AttachError::FailedPrecondition`].
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition {
            message: message.into(),
        }
    }

    /// Build an [`AttachError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Build an [`AttachError::Mount`] from anything displayable.
    pub fn mount<E: fmt::Display>(
        operation: &'static str,
        target: impl Into<PathBuf>,
        reason: E,
    ) -> Self {
        Self::Mount {
            operation,
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// The caller-facing code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::FailedPrecondition { .. } => ErrorCode::FailedPrecondition,
            Self::Internal { .. }
            | Self::DeviceNotFound { .. }
            | Self::NotADevice { .. }
            | Self::MountTable { .. }
            | Self::Mount { .. }
            | Self::Io(_)
            | Self::Config { .. } => ErrorCode::Internal,
        }
    }
}

/// Structured error returned across the RPC boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Coarse error code.
    pub code: ErrorCode,
    /// Message for operators; includes volume id, target and private mount
    /// path where they are known.
    pub message: String,
}

impl Status {
    /// Create a new status.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Status {}

impl From<AttachError> for Status {
    fn from(err: AttachError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}
