//! Chunk versions.
//!
//! A chunk version orders changes to the ownership of a single range. It is
//! only meaningful within one collection epoch: when the collection is
//! dropped and recreated a new epoch starts and every older version becomes
//! incomparable.

use std::cmp::Ordering;
use std::fmt;

use crate::{CollectionEpoch, Error, Result};

/// Version token for a chunk: `(epoch, major, minor)`.
///
/// `major` moves when ownership changes (migrations); `minor` moves on
/// ownership-preserving metadata changes (splits and merges on one shard).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkVersion {
    /// Collection incarnation this version belongs to.
    pub epoch: CollectionEpoch,
    /// Incremented on ownership-changing operations.
    pub major: u64,
    /// Incremented on ownership-preserving operations.
    pub minor: u64,
}

impl ChunkVersion {
    /// Creates a new chunk version.
    #[must_use]
    pub const fn new(epoch: CollectionEpoch, major: u64, minor: u64) -> Self {
        Self { epoch, major, minor }
    }

    /// The version a shard reports when it owns no chunks in `epoch`.
    #[must_use]
    pub const fn zero(epoch: CollectionEpoch) -> Self {
        Self::new(epoch, 0, 0)
    }

    /// Returns the `(major, minor)` pair, ignoring the epoch.
    ///
    /// Only meaningful when comparing versions already known to share an
    /// epoch.
    #[must_use]
    pub const fn placement(self) -> (u64, u64) {
        (self.major, self.minor)
    }

    /// Returns the next major version; minor resets to zero.
    ///
    /// # Panics
    /// Panics if the major version would overflow.
    #[must_use]
    pub const fn inc_major(self) -> Self {
        assert!(self.major < u64::MAX, "major version overflow");
        Self::new(self.epoch, self.major + 1, 0)
    }

    /// Returns the next minor version.
    ///
    /// # Panics
    /// Panics if the minor version would overflow.
    #[must_use]
    pub const fn inc_minor(self) -> Self {
        assert!(self.minor < u64::MAX, "minor version overflow");
        Self::new(self.epoch, self.major, self.minor + 1)
    }

    /// Returns true if both versions belong to the same epoch.
    #[must_use]
    pub fn is_same_epoch(&self, other: &Self) -> bool {
        self.epoch == other.epoch
    }

    /// Compares two versions of the same collection incarnation.
    ///
    /// # Errors
    ///
    /// Returns `Error::EpochMismatch` if the versions come from different
    /// epochs; such versions have no meaningful order.
    pub fn compare(&self, other: &Self) -> Result<Ordering> {
        if !self.is_same_epoch(other) {
            return Err(Error::EpochMismatch {
                expected: self.epoch,
                found: other.epoch,
            });
        }
        Ok(self.placement().cmp(&other.placement()))
    }

    /// Returns true if `self` is older than `current` within the same epoch.
    ///
    /// Versions from different epochs are never stale relative to each
    /// other; they are incompatible, which callers check separately.
    #[must_use]
    pub fn is_stale(&self, current: &Self) -> bool {
        matches!(self.compare(current), Ok(Ordering::Less))
    }

    /// Returns the larger of two versions of the same epoch.
    ///
    /// # Panics
    /// Panics if the epochs differ.
    #[must_use]
    pub fn max_of(self, other: Self) -> Self {
        assert!(self.is_same_epoch(&other), "cannot take max across epochs");
        if other.placement() > self.placement() {
            other
        } else {
            self
        }
    }
}

impl PartialOrd for ChunkVersion {
    /// Versions from different epochs are unordered.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl fmt::Debug for ChunkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for ChunkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}||{}", self.major, self.minor, self.epoch)
    }
}
