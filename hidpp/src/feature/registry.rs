//! Maintains a registry of well-known HID++2.0 features relevant to pointing
//! devices.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::feature::{
    CreatableFeature,
    adjustable_dpi::v0::AdjustableDpiFeatureV0,
    hires_wheel::v0::HiResWheelFeatureV0,
    reprog_controls::v4::ReprogControlsV4Feature,
    root::RootFeature,
    smartshift::v0::SmartShiftFeatureV0,
    thumbwheel::v0::ThumbwheelFeatureV0,
};

/// Represents a known HID++2.0 device feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KnownFeature {
    /// The name of the feature.
    /// This is usually a slightly modified version of the name found in
    /// Logitech's documentation.
    pub name: &'static str,

    /// The first feature version implemented by this crate, if any.
    pub implemented_since: Option<u8>,
}

/// Looks up a feature by its ID.
pub fn lookup(feature_id: u16) -> Option<KnownFeature> {
    KNOWN_FEATURES.get(&feature_id).copied()
}

/// Returns the name of a feature, or `"Unknown"` for unknown IDs.
pub fn name(feature_id: u16) -> &'static str {
    lookup(feature_id).map_or("Unknown", |feat| feat.name)
}

/// Checks whether this crate implements a feature in the given version.
pub fn is_implemented(feature_id: u16, feature_version: u8) -> bool {
    lookup(feature_id)
        .and_then(|feat| feat.implemented_since)
        .is_some_and(|since| since <= feature_version)
}

fn known(name: &'static str) -> KnownFeature {
    KnownFeature {
        name,
        implemented_since: None,
    }
}

fn implemented<F: CreatableFeature>(name: &'static str) -> KnownFeature {
    KnownFeature {
        name,
        implemented_since: Some(F::STARTING_VERSION),
    }
}

lazy_static! {
    static ref KNOWN_FEATURES: HashMap<u16, KnownFeature> = HashMap::from([
        (RootFeature::ID, implemented::<RootFeature>("Root")),
        (0x0001, known("FeatureSet")),
        (0x0002, known("FeatureInfo")),
        (0x0003, known("DeviceInformation")),
        (0x0005, known("DeviceTypeAndName")),
        (0x0007, known("DeviceFriendlyName")),
        (0x1000, known("BatteryStatus")),
        (0x1004, known("UnifiedBattery")),
        (0x1814, known("ChangeHost")),
        (0x1b00, known("ReprogControls")),
        (0x1b04, implemented::<ReprogControlsV4Feature>("ReprogControlsV4")),
        (0x1d4b, known("WirelessDeviceStatus")),
        (0x2100, known("VerticalScrolling")),
        (
            SmartShiftFeatureV0::ID,
            implemented::<SmartShiftFeatureV0>("SmartShiftWheel")
        ),
        (0x2111, known("SmartShiftWheelEnhanced")),
        (0x2120, known("HighResolutionScrolling")),
        (
            HiResWheelFeatureV0::ID,
            implemented::<HiResWheelFeatureV0>("HiResWheel")
        ),
        (0x2130, known("RatchetWheel")),
        (
            ThumbwheelFeatureV0::ID,
            implemented::<ThumbwheelFeatureV0>("Thumbwheel")
        ),
        (0x2200, known("MousePointer")),
        (
            AdjustableDpiFeatureV0::ID,
            implemented::<AdjustableDpiFeatureV0>("AdjustableDpi")
        ),
        (0x2202, known("ExtendedAdjustableDpi")),
        (0x2205, known("PointerMotionScaling")),
        (0x2250, known("AnalysisMode")),
        (0x6501, known("Gestures2")),
        (0x8060, known("AdjustableReportRate")),
        (0x8100, known("OnboardProfiles")),
    ]);
}
