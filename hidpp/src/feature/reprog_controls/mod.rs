//! Implements the `ReprogControlsV4` feature (ID `0x1b04`) that allows
//! diverting buttons and pointer motion to HID++ notifications.

pub mod v4;

/// The protocol ID of the feature.
pub const FEATURE_ID: u16 = 0x1b04;
