//! Zone serial number arithmetic
//!
//! Serials are 32-bit counters that wrap around. Whether one serial is newer
//! than another is decided by the distance between them modulo 2^32, as in
//! RFC 1982. This module is the only place that logic lives; everything else
//! asks [`Serial::compare`].

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Half of the serial number space
const HALF_RANGE: u32 = 1 << 31;

/// A zone serial number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Serial(u32);

/// How one serial relates to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialRelation {
    /// Strictly newer, less than half the number space ahead
    Newer,
    /// Strictly older, less than half the number space behind
    Older,
    /// Identical
    Equal,
    /// Exactly half the number space apart; neither is newer
    Ambiguous,
}

impl Serial {
    /// Create a serial from its raw value
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw 32-bit value
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Relation of `self` to `other`
    ///
    /// `Serial(5).compare(Serial(3))` is [`SerialRelation::Newer`].
    pub fn compare(self, other: Serial) -> SerialRelation {
        let distance = self.0.wrapping_sub(other.0);
        match distance {
            0 => SerialRelation::Equal,
            HALF_RANGE => SerialRelation::Ambiguous,
            d if d < HALF_RANGE => SerialRelation::Newer,
            _ => SerialRelation::Older,
        }
    }

    /// True if `self` is strictly newer than `other`
    pub fn is_newer_than(self, other: Serial) -> bool {
        self.compare(other) == SerialRelation::Newer
    }

    /// Add to the serial, wrapping around
    pub fn wrapping_add(self, n: u32) -> Self {
        Self(self.0.wrapping_add(n))
    }
}

impl PartialOrd for Serial {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.compare(*other) {
            SerialRelation::Newer => Some(Ordering::Greater),
            SerialRelation::Older => Some(Ordering::Less),
            SerialRelation::Equal => Some(Ordering::Equal),
            SerialRelation::Ambiguous => None,
        }
    }
}

impl From<u32> for Serial {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Serial> for u32 {
    fn from(value: Serial) -> Self {
        value.0
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
