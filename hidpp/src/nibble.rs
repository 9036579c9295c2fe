//! A very simple u4/nibble implementation.
//!
//! HID++2.0 packs the function ID and the software ID into a single header
//! byte, which is why both are represented as nibbles throughout this crate.

use std::fmt;

/// Represents an unsigned 4-bit value (nibble) encoded as a byte.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct U4(u8);

impl U4 {
    /// The largest value a nibble can hold.
    pub const MAX: U4 = U4(0x0f);

    /// Constructs a nibble from a value, returning [`None`] if it does not fit
    /// into 4 bits.
    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX.0).then_some(Self(value))
    }

    /// Constructs a nibble from the 4 low/rightmost bits of a byte.
    pub fn from_lo(raw: u8) -> Self {
        Self(raw & 0x0f)
    }

    /// Constructs a nibble from the 4 high/leftmost bits of a byte.
    pub fn from_hi(raw: u8) -> Self {
        Self(raw >> 4)
    }

    /// Constructs a byte with the nibble set as the 4 low/rightmost bits.
    pub fn to_lo(self) -> u8 {
        self.0
    }

    /// Constructs a byte with the nibble set as the 4 high/leftmost bits.
    pub fn to_hi(self) -> u8 {
        self.0 << 4
    }
}

impl fmt::Display for U4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Combines two nibbles to a byte, with `hi` being set to the 4 leftmost and
/// `lo` being set to the 4 rightmost bits.
pub fn combine(hi: U4, lo: U4) -> u8 {
    hi.to_hi() | lo.to_lo()
}

/// Splits a byte into its high and low nibble.
pub fn split(raw: u8) -> (U4, U4) {
    (U4::from_hi(raw), U4::from_lo(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_split_are_inverse() {
        let byte = combine(U4::from_lo(0x3), U4::from_lo(0xa));
        assert_eq!(byte, 0x3a);
        assert_eq!(split(byte), (U4::from_lo(0x3), U4::from_lo(0xa)));
    }

    #[test]
    fn new_rejects_wide_values() {
        assert_eq!(U4::new(0x0f), Some(U4::MAX));
        assert_eq!(U4::new(0x10), None);
    }
}
