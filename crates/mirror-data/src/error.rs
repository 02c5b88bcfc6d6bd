//! Error taxonomy for the mirror subsystem.
//!
//! None of these errors are ever propagated into the host chain pipeline;
//! callers log them and bump counters. Lease contention is a benign skip and
//! a failed sender recovery still produces a record, so neither appears here.

use thiserror::Error;

/// Result alias used across the mirror crates.
pub type MirrorResult<T> = std::result::Result<T, MirrorError>;

#[derive(Debug, Error)]
pub enum MirrorError {
    /// Backing store unreachable at construction time.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// Mirroring switched off in configuration.
    #[error("mirroring is disabled by configuration")]
    Disabled,

    #[error("invalid mirror configuration: {0}")]
    InvalidConfig(String),

    /// Payload marshaling failed; the operation is aborted.
    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Store round trip failed after the client's own retry budget.
    #[error("store write failed on {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("store read failed on {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("payload codec failure: {0}")]
    Codec(#[from] std::io::Error),

    /// A stored record could not be decoded back into its summary shape.
    #[error("malformed record {key}: {reason}")]
    MalformedRecord { key: String, reason: String },
}

impl MirrorError {
    pub fn write(key: &str, reason: impl ToString) -> Self {
        Self::Write {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn read(key: &str, reason: impl ToString) -> Self {
        Self::Read {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(key: &str, reason: impl ToString) -> Self {
        Self::MalformedRecord {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for the failures that mean "run the host without mirroring".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Disabled)
    }
}
