//! Volume and request identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{AttachError, AttachResult};

/// Opaque identifier of a volume as assigned by the storage backend.
///
/// The attach engine never interprets it; it only appears in logs and error
/// messages, and keys the per-volume serialization in the node service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(String);

impl VolumeId {
    /// Wrap a backend volume id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the volume ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for VolumeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Correlation id attached to the log span of one request.
///
/// Request IDs must:
/// - Be 1-64 characters long
/// - Contain only ASCII alphanumerics, hyphens, and underscores
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Maximum length of a request ID.
    pub const MAX_LENGTH: usize = 64;

    /// Create a request ID from a caller-supplied value, validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> AttachResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Generate a new random request ID.
    ///
    /// The ID is a 16-character hex string derived from a UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        let uuid = uuid::Uuid::new_v4();
        Self(hex::encode(&uuid.as_bytes()[..8]))
    }

    /// Get the request ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> AttachResult<()> {
        let valid = !id.is_empty()
            && id.len() <= Self::MAX_LENGTH
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(AttachError::invalid_argument(format!(
                "invalid request id: {id:?}"
            )))
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = AttachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
