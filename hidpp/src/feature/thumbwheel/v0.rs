//! Thumbwheel control, version 0 onwards.

use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    channel::HidppChannel,
    feature::{CreatableFeature, EmittingFeature, Feature, FeatureHandle, Notifications},
    protocol::v20::Hidpp20Error,
};

const FN_GET_INFO: u8 = 0;
const FN_GET_STATUS: u8 = 1;
const FN_SET_REPORTING: u8 = 2;
const EVENT_STATUS: u8 = 0;

const STATUS_TOUCH: u8 = 1 << 1;
const STATUS_PROXY: u8 = 1 << 2;
const STATUS_SINGLE_TAP: u8 = 1 << 3;

/// The thumbwheel of a device, e.g. the horizontal wheel of an MX Master.
///
/// Rotation and touch notifications only arrive once the wheel was switched
/// to [`ThumbwheelReportingMode::Diverted`].
pub struct ThumbwheelFeatureV0 {
    handle: FeatureHandle,
    notifications: Notifications<ThumbwheelEvent>,
}

impl CreatableFeature for ThumbwheelFeatureV0 {
    const ID: u16 = super::FEATURE_ID;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        let handle = FeatureHandle::new(chan, device_index, feature_index);
        let notifications = handle.notifications(|function, params| {
            (function == EVENT_STATUS)
                .then(|| ThumbwheelStatusUpdate::parse(params))
                .flatten()
                .map(ThumbwheelEvent::StatusUpdate)
        });

        Self {
            handle,
            notifications,
        }
    }
}

impl Feature for ThumbwheelFeatureV0 {
}

impl EmittingFeature<ThumbwheelEvent> for ThumbwheelFeatureV0 {
    fn listen(&self) -> flume::Receiver<ThumbwheelEvent> {
        self.notifications.receiver()
    }
}

impl ThumbwheelFeatureV0 {
    /// Reads the static properties of the wheel.
    pub async fn get_thumbwheel_info(&self) -> Result<ThumbwheelInfo, Hidpp20Error> {
        let data = self.handle.call(FN_GET_INFO, &[]).await?;

        Ok(ThumbwheelInfo {
            native_resolution: u16::from_be_bytes([data[0], data[1]]),
            diverted_resolution: u16::from_be_bytes([data[2], data[3]]),
            default_direction: ThumbwheelDirection::try_from(data[4] & 0x01)
                .map_err(|_| Hidpp20Error::UnsupportedResponse)?,
            capabilities: ThumbwheelCapabilities::from(data[5]),
            time_unit: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Reads how the wheel currently reports and whether it is touched.
    pub async fn get_thumbwheel_status(&self) -> Result<ThumbwheelStatus, Hidpp20Error> {
        let data = self.handle.call(FN_GET_STATUS, &[]).await?;

        Ok(ThumbwheelStatus {
            reporting_mode: ThumbwheelReportingMode::try_from(data[0])
                .map_err(|_| Hidpp20Error::UnsupportedResponse)?,
            direction_inverted: data[1] & 0x01 != 0,
            touch: data[1] & STATUS_TOUCH != 0,
            proxy: data[1] & STATUS_PROXY != 0,
        })
    }

    /// Routes wheel reports to HID or to HID++ notifications.
    ///
    /// With `invert_direction` set the sign of
    /// [`ThumbwheelStatusUpdate::rotation`] flips relative to
    /// [`ThumbwheelInfo::default_direction`].
    pub async fn set_thumbwheel_reporting(
        &self,
        mode: ThumbwheelReportingMode,
        invert_direction: bool,
    ) -> Result<(), Hidpp20Error> {
        self.handle
            .call(FN_SET_REPORTING, &[mode.into(), u8::from(invert_direction)])
            .await
            .map(drop)
    }
}

/// Static properties of the thumbwheel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ThumbwheelInfo {
    /// Ratchets per revolution while reporting through HID.
    pub native_resolution: u16,

    /// Increments per revolution while diverted to HID++.
    pub diverted_resolution: u16,

    /// Microseconds per tick of [`ThumbwheelStatusUpdate::time_elapsed`], `0`
    /// without [`ThumbwheelCapabilities::time_stamp`].
    pub time_unit: u16,

    /// Which way of turning produces positive rotation values.
    pub default_direction: ThumbwheelDirection,

    pub capabilities: ThumbwheelCapabilities,
}

/// The physical turn that yields positive rotation values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ThumbwheelDirection {
    PositiveWhenLeftOrBack = 0,
    PositiveWhenRightOrFront = 1,
}

/// Optional sensors and reports of the thumbwheel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ThumbwheelCapabilities {
    /// Status updates carry the time since the previous one.
    pub time_stamp: bool,

    /// A touch sensor fills [`ThumbwheelStatusUpdate::touch`].
    pub touch: bool,

    /// A proximity sensor fills [`ThumbwheelStatusUpdate::proxy`].
    pub proxy: bool,

    /// Taps are reported in [`ThumbwheelStatusUpdate::single_tap`].
    pub single_tap: bool,
}

impl From<u8> for ThumbwheelCapabilities {
    fn from(raw: u8) -> Self {
        Self {
            time_stamp: raw & 0x01 != 0,
            touch: raw & STATUS_TOUCH != 0,
            proxy: raw & STATUS_PROXY != 0,
            single_tap: raw & STATUS_SINGLE_TAP != 0,
        }
    }
}

/// The current reporting configuration of the thumbwheel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ThumbwheelStatus {
    pub reporting_mode: ThumbwheelReportingMode,
    pub direction_inverted: bool,

    /// Always `false` without a touch sensor.
    pub touch: bool,

    /// Always `false` without a proximity sensor.
    pub proxy: bool,
}

/// Where the thumbwheel sends its reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ThumbwheelReportingMode {
    /// Plain HID horizontal scrolling.
    Native = 0,

    /// HID++ notifications, see [`ThumbwheelFeatureV0::listen`].
    Diverted = 1,
}

/// Notifications of [`ThumbwheelFeatureV0`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub enum ThumbwheelEvent {
    StatusUpdate(ThumbwheelStatusUpdate),
}

/// A rotation, touch or tap reported by a diverted thumbwheel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ThumbwheelStatusUpdate {
    /// Signed increments since the previous update.
    pub rotation: i16,

    /// Ticks of [`ThumbwheelInfo::time_unit`] since the previous update.
    pub time_elapsed: u16,

    pub rotation_status: ThumbwheelRotationStatus,
    pub touch: bool,
    pub proxy: bool,
    pub single_tap: bool,
}

impl ThumbwheelStatusUpdate {
    /// Decodes the parameters of a status notification.
    ///
    /// Returns [`None`] for an unknown rotation status.
    pub fn parse(params: &[u8; 16]) -> Option<Self> {
        let flags = params[5];

        Some(Self {
            rotation: i16::from_be_bytes([params[0], params[1]]),
            time_elapsed: u16::from_be_bytes([params[2], params[3]]),
            rotation_status: ThumbwheelRotationStatus::try_from(params[4]).ok()?,
            touch: flags & STATUS_TOUCH != 0,
            proxy: flags & STATUS_PROXY != 0,
            single_tap: flags & STATUS_SINGLE_TAP != 0,
        })
    }
}

/// The phase of a rotation gesture on the thumbwheel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ThumbwheelRotationStatus {
    Inactive = 0,
    Start = 1,
    Active = 2,
    Stop = 3,
}
