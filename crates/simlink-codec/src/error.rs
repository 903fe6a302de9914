//! Error types for the wire codec.

use std::fmt;

/// Errors from decoding or validating a message.
///
/// Encoding is total and never fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// The bytes are not a valid envelope, or a decoded message breaks
    /// a protocol rule (missing payload, zero sequence, bad tensor).
    Malformed {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// The envelope's format version is outside the supported range.
    UnsupportedVersion {
        /// The version found in the envelope.
        found: u32,
    },
}

impl CodecError {
    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { detail } => write!(f, "malformed message: {detail}"),
            Self::UnsupportedVersion { found } => write!(
                f,
                "unsupported format version {found} (supported {}..={})",
                crate::MIN_FORMAT_VERSION,
                crate::FORMAT_VERSION
            ),
        }
    }
}

impl std::error::Error for CodecError {}
