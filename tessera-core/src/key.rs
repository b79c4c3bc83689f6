//! Shard key space: keys, bounds, and half-open chunk ranges.
//!
//! The key space of a sharded collection is totally ordered. Keys are opaque
//! byte strings compared lexicographically, and the whole space is bracketed
//! by two sentinels, [`RangeBound::Min`] and [`RangeBound::Max`], that sort
//! below and above every real key.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use xxhash_rust::xxh3::xxh3_64;

/// A position in the shard key space.
///
/// Keys compare bytewise. Integer keys built with `From<u64>` are encoded
/// big-endian so that numeric order and key order agree.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ShardKey(Bytes);

impl ShardKey {
    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    /// Returns the length of the key in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if this is the empty key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the smallest key strictly greater than this one.
    #[must_use]
    pub fn successor(&self) -> Self {
        let mut buf = BytesMut::with_capacity(self.0.len() + 1);
        buf.put_slice(&self.0);
        buf.put_u8(0);
        Self(buf.freeze())
    }
}

impl From<u64> for ShardKey {
    fn from(value: u64) -> Self {
        Self(Bytes::copy_from_slice(&value.to_be_bytes()))
    }
}

impl From<Bytes> for ShardKey {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for ShardKey {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

impl From<&'static str> for ShardKey {
    fn from(s: &'static str) -> Self {
        Self(Bytes::from_static(s.as_bytes()))
    }
}

impl fmt::Debug for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Eight-byte keys are almost always encoded integers.
        if let Ok(raw) = <[u8; 8]>::try_from(self.0.as_ref()) {
            return write!(f, "{}", u64::from_be_bytes(raw));
        }
        f.write_str("0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A bound in the shard key space: a real key or one of the two sentinels.
///
/// The derived ordering relies on variant order: `Min < Key(_) < Max`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RangeBound {
    /// Sorts below every key.
    Min,
    /// A real shard key.
    Key(ShardKey),
    /// Sorts above every key.
    Max,
}

impl RangeBound {
    /// Creates a bound from anything convertible into a key.
    #[must_use]
    pub fn key(key: impl Into<ShardKey>) -> Self {
        Self::Key(key.into())
    }

    /// Returns true for the space-minimum sentinel.
    #[must_use]
    pub const fn is_min(&self) -> bool {
        matches!(self, Self::Min)
    }

    /// Returns true for the space-maximum sentinel.
    #[must_use]
    pub const fn is_max(&self) -> bool {
        matches!(self, Self::Max)
    }

    /// Returns the smallest bound strictly greater than this one.
    ///
    /// `Min` is followed by the empty key. `Max` has no successor and maps
    /// to itself.
    #[must_use]
    pub fn successor(&self) -> Self {
        match self {
            Self::Min => Self::Key(ShardKey::default()),
            Self::Key(key) => Self::Key(key.successor()),
            Self::Max => Self::Max,
        }
    }
}

impl From<ShardKey> for RangeBound {
    fn from(key: ShardKey) -> Self {
        Self::Key(key)
    }
}

impl From<u64> for RangeBound {
    fn from(value: u64) -> Self {
        Self::Key(ShardKey::from(value))
    }
}

impl fmt::Debug for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Min => f.write_str("MinKey"),
            Self::Key(key) => write!(f, "{key}"),
            Self::Max => f.write_str("MaxKey"),
        }
    }
}

/// A half-open range of the key space `[min, max)`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ChunkRange {
    /// Start of the range (inclusive).
    pub min: RangeBound,
    /// End of the range (exclusive).
    pub max: RangeBound,
}

impl ChunkRange {
    /// Creates a new chunk range.
    ///
    /// # Panics
    ///
    /// Panics if min >= max.
    #[must_use]
    pub fn new(min: impl Into<RangeBound>, max: impl Into<RangeBound>) -> Self {
        let (min, max) = (min.into(), max.into());
        assert!(min < max, "chunk range min must be < max");
        Self { min, max }
    }

    /// Creates a chunk range, returning `None` if min >= max.
    ///
    /// Use this for bounds that come from outside the process.
    #[must_use]
    pub fn try_new(min: RangeBound, max: RangeBound) -> Option<Self> {
        (min < max).then_some(Self { min, max })
    }

    /// The range covering the whole key space.
    #[must_use]
    pub const fn full() -> Self {
        Self {
            min: RangeBound::Min,
            max: RangeBound::Max,
        }
    }

    /// Returns true if the range holds no keys.
    ///
    /// The fields are public, so a range assembled by hand can be empty or
    /// inverted even though `new` and `try_new` refuse both.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min >= self.max
    }

    /// Returns true if this range contains the given bound.
    #[must_use]
    pub fn contains(&self, bound: &RangeBound) -> bool {
        *bound >= self.min && *bound < self.max
    }

    /// Returns true if the two ranges share at least one key.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min < other.max && other.min < self.max
    }

    /// Returns true if `other` lies entirely within this range.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        self.min <= other.min && other.max <= self.max
    }

    /// Returns the overlapping part of two ranges, if any.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let min = (&self.min).max(&other.min).clone();
        let max = (&self.max).min(&other.max).clone();
        Self::try_new(min, max)
    }
}

impl fmt::Debug for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.min, self.max)
    }
}

/// How document keys map onto the shard key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ShardKeyPattern {
    /// Document keys are used as shard keys unchanged.
    #[default]
    Ranged,
    /// Document keys are hashed (xxh3, big-endian) before placement.
    Hashed,
}

impl ShardKeyPattern {
    /// Maps a document key onto the shard key space.
    #[must_use]
    pub fn key_for(self, document_key: &[u8]) -> ShardKey {
        match self {
            Self::Ranged => ShardKey::from(document_key),
            Self::Hashed => ShardKey::from(xxh3_64(document_key)),
        }
    }

    /// Maps a document key onto a bound in the shard key space.
    #[must_use]
    pub fn bound_for(self, document_key: &[u8]) -> RangeBound {
        RangeBound::Key(self.key_for(document_key))
    }
}
