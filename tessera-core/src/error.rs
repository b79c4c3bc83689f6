//! Error types for Tessera core operations.
//!
//! Following `TigerStyle`: all errors must be handled explicitly.
//! No silent failures, no ignored errors.

use std::fmt;

use crate::CollectionEpoch;

/// The result type for Tessera core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Tessera core operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Two versions from different collection incarnations were compared.
    EpochMismatch {
        /// The epoch of the left-hand version.
        expected: CollectionEpoch,
        /// The epoch of the right-hand version.
        found: CollectionEpoch,
    },

    /// A resource limit was exceeded.
    LimitExceeded {
        /// Which limit was exceeded.
        limit: &'static str,
        /// The maximum allowed value.
        max: u64,
        /// The actual value that exceeded the limit.
        actual: u64,
    },

    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EpochMismatch { expected, found } => {
                write!(f, "epoch mismatch: expected {expected}, found {found}")
            }
            Self::LimitExceeded { limit, max, actual } => {
                write!(f, "limit exceeded: {limit} (max={max}, actual={actual})")
            }
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}
