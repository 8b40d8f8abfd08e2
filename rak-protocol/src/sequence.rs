//! Sequence Number Handling
//!
//! Every counter on the wire (datagram sequence numbers, reliable message
//! indices, sequence indices and order indices) is a 24-bit value that wraps.
//! This module provides a wrapped number type whose comparisons follow the
//! half-space rule so ordering survives the wrap boundary.

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Maximum sequence number value (24-bit: 0xFFFFFF)
pub const MAX_SEQ_NUMBER: u32 = 0x00FF_FFFF;

/// Size of the sequence space
const SEQ_SPACE: i64 = (MAX_SEQ_NUMBER as i64) + 1;

/// Half of the sequence space; distances at or beyond it count as "behind"
const HALF_SPACE: u32 = 0x0080_0000;

/// Sequence number with 24-bit wraparound semantics
///
/// Comparison and arithmetic operations account for wraparound so that a
/// value just past the wrap (e.g. 3) is considered newer than a value just
/// before it (e.g. 0xFFFFFE).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct SeqNumber(u32);

impl SeqNumber {
    /// Zero, the first number handed out by every counter
    pub const ZERO: SeqNumber = SeqNumber(0);

    /// Create a new sequence number
    ///
    /// # Panics
    /// Panics if value exceeds MAX_SEQ_NUMBER
    pub fn new(value: u32) -> Self {
        assert!(
            value <= MAX_SEQ_NUMBER,
            "Sequence number {} exceeds maximum {}",
            value,
            MAX_SEQ_NUMBER
        );
        SeqNumber(value)
    }

    /// Create a sequence number without bounds checking
    ///
    /// The value will be masked to 24 bits
    #[inline]
    pub fn new_unchecked(value: u32) -> Self {
        SeqNumber(value & MAX_SEQ_NUMBER)
    }

    /// Get the raw sequence number value
    #[inline]
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// Increment the sequence number by 1
    #[inline]
    pub fn increment(&mut self) {
        self.0 = (self.0 + 1) & MAX_SEQ_NUMBER;
    }

    /// Return the current value and advance the counter
    #[inline]
    pub fn fetch_increment(&mut self) -> Self {
        let current = *self;
        self.increment();
        current
    }

    /// Get the next sequence number
    #[inline]
    pub fn next(self) -> Self {
        SeqNumber((self.0 + 1) & MAX_SEQ_NUMBER)
    }

    /// Calculate the distance from this sequence number to another
    ///
    /// Returns a signed distance that accounts for wraparound. Positive values
    /// mean `other` is ahead of `self`, negative means `other` is behind.
    pub fn distance_to(self, other: SeqNumber) -> i32 {
        let diff = other.0.wrapping_sub(self.0) & MAX_SEQ_NUMBER;

        if diff >= HALF_SPACE {
            (diff as i64 - SEQ_SPACE) as i32
        } else {
            diff as i32
        }
    }

    /// Check if this sequence number is less than another (accounting for wraparound)
    #[inline]
    pub fn lt(self, other: SeqNumber) -> bool {
        self.distance_to(other) > 0
    }

    /// Check if this sequence number is less than or equal to another
    #[inline]
    pub fn le(self, other: SeqNumber) -> bool {
        self == other || self.lt(other)
    }

    /// Check if this sequence number is greater than another
    #[inline]
    pub fn gt(self, other: SeqNumber) -> bool {
        self.distance_to(other) < 0
    }

    /// Check if this sequence number is greater than or equal to another
    #[inline]
    pub fn ge(self, other: SeqNumber) -> bool {
        self == other || self.gt(other)
    }
}

impl fmt::Debug for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNumber({})", self.0)
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SeqNumber {
    fn from(value: u32) -> Self {
        SeqNumber::new_unchecked(value)
    }
}

impl From<SeqNumber> for u32 {
    fn from(seq: SeqNumber) -> u32 {
        seq.0
    }
}

impl Add<u32> for SeqNumber {
    type Output = SeqNumber;

    fn add(self, rhs: u32) -> SeqNumber {
        SeqNumber::new_unchecked(self.0.wrapping_add(rhs))
    }
}

impl AddAssign<u32> for SeqNumber {
    fn add_assign(&mut self, rhs: u32) {
        *self = SeqNumber::new_unchecked(self.0.wrapping_add(rhs));
    }
}

impl Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    fn sub(self, rhs: u32) -> SeqNumber {
        SeqNumber::new_unchecked(self.0.wrapping_sub(rhs))
    }
}

impl SubAssign<u32> for SeqNumber {
    fn sub_assign(&mut self, rhs: u32) {
        *self = SeqNumber::new_unchecked(self.0.wrapping_sub(rhs));
    }
}

impl Sub for SeqNumber {
    type Output = i32;

    /// Calculate the signed distance between two sequence numbers
    fn sub(self, rhs: SeqNumber) -> i32 {
        rhs.distance_to(self)
    }
}
