//! Implements the `HiResWheel` feature (ID `0x2121`) that controls the
//! resolution and reporting target of the scroll wheel.

pub mod v0;

/// The protocol ID of the feature.
pub const FEATURE_ID: u16 = 0x2121;
