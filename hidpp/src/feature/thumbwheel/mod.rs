//! Implements the `Thumbwheel` feature (ID `0x2150`).

pub mod v0;

/// The protocol ID of the feature.
pub const FEATURE_ID: u16 = 0x2150;
