//! Implements the `AdjustableDPI` feature (ID `0x2201`) that allows reading
//! and changing the resolution of the sensors of a pointing device.

pub mod v0;

/// The protocol ID of the feature.
pub const FEATURE_ID: u16 = 0x2201;
