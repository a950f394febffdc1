//! Ring coordination error abstractions.

use thiserror::Error;

use crate::models::RingName;

// Error messages.
pub const ERR_READ_BUILDER: &str = "error reading ring builder from disk";
pub const ERR_DECODE_BUILDER: &str = "error decoding ring builder";
pub const ERR_READ_RING: &str = "error reading rendered ring from disk";
pub const ERR_ENCODE_ARTIFACT: &str = "error encoding ring artifact";
pub const ERR_WRITE_ARTIFACT: &str = "error writing ring artifact";

/// Ring coordination error variants.
#[derive(Debug, Error)]
pub enum RingError {
    /// The ring already has a builder on disk and re-initialization was not forced.
    #[error("ring {0} is already initialized")]
    AlreadyInitialized(RingName),
    /// The given ring name is not one of the known rings.
    #[error("unknown ring: {0}")]
    UnknownRing(String),
    /// A device description was malformed or incomplete.
    #[error("invalid device spec: {0}")]
    InvalidDeviceSpec(String),
    /// An I/O failure while reading or writing ring artifacts.
    #[error("persistence error: {0:#}")]
    Persistence(anyhow::Error),
    /// Leadership was lost between the decision to write and the write itself.
    #[error("leadership lost before ring state could be written")]
    StaleLeadership,
    /// An inbound cluster message could not be interpreted.
    #[error("invalid cluster message: {0}")]
    InvalidMessage(String),
}

impl RingError {
    /// Wrap the given error as a persistence error.
    pub fn persistence(err: impl Into<anyhow::Error>) -> Self {
        Self::Persistence(err.into())
    }

    /// Check if the given error chain carries a persistence error.
    pub fn is_persistence(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<Self>(), Some(Self::Persistence(_)))
    }
}
