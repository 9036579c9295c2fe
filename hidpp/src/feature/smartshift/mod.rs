//! Implements the `SmartShift` feature (ID `0x2110`) that controls the
//! ratchet mode of the scroll wheel.

pub mod v0;

/// The protocol ID of the feature.
pub const FEATURE_ID: u16 = 0x2110;
