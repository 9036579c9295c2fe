//! Hi-res scroll wheel control, version 0 onwards.

use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    channel::HidppChannel,
    feature::{CreatableFeature, EmittingFeature, Feature, FeatureHandle, Notifications},
    nibble::U4,
    protocol::v20::Hidpp20Error,
};

/// Mode bit routing wheel reports to HID++ instead of native HID.
pub const MODE_TARGET: u8 = 1 << 0;

/// Mode bit enabling high-resolution reports.
pub const MODE_HIRES: u8 = 1 << 1;

/// Mode bit inverting the native scrolling direction.
pub const MODE_INVERT: u8 = 1 << 2;

const FN_GET_CAPABILITIES: u8 = 0;
const FN_GET_MODE: u8 = 1;
const FN_SET_MODE: u8 = 2;
const FN_GET_RATCHET_STATE: u8 = 3;

const EVENT_MOVEMENT: u8 = 0;
const EVENT_RATCHET_SWITCH: u8 = 1;

/// The main scroll wheel, its resolution and where it reports to.
///
/// Analytics collection (mode bit 3) is left alone.
pub struct HiResWheelFeatureV0 {
    handle: FeatureHandle,
    notifications: Notifications<HiResWheelEvent>,
}

impl CreatableFeature for HiResWheelFeatureV0 {
    const ID: u16 = super::FEATURE_ID;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        let handle = FeatureHandle::new(chan, device_index, feature_index);
        let notifications = handle.notifications(HiResWheelEvent::parse);

        Self {
            handle,
            notifications,
        }
    }
}

impl Feature for HiResWheelFeatureV0 {
}

impl EmittingFeature<HiResWheelEvent> for HiResWheelFeatureV0 {
    fn listen(&self) -> flume::Receiver<HiResWheelEvent> {
        self.notifications.receiver()
    }
}

impl HiResWheelFeatureV0 {
    pub async fn get_wheel_capabilities(&self) -> Result<WheelCapabilities, Hidpp20Error> {
        let data = self.handle.call(FN_GET_CAPABILITIES, &[]).await?;

        Ok(WheelCapabilities {
            multiplier: data[0],
            has_switch: data[1] & 0x04 != 0,
            has_invert: data[1] & 0x08 != 0,
            ratches_per_rotation: data[2],
            wheel_diameter: data[3],
        })
    }

    /// Reads the mode bitmask, see [`MODE_TARGET`], [`MODE_HIRES`] and
    /// [`MODE_INVERT`].
    pub async fn get_mode_bits(&self) -> Result<u8, Hidpp20Error> {
        Ok(self.handle.call(FN_GET_MODE, &[]).await?[0])
    }

    /// Writes the mode bitmask and returns the one the device applied.
    pub async fn set_mode_bits(&self, bits: u8) -> Result<u8, Hidpp20Error> {
        Ok(self.handle.call(FN_SET_MODE, &[bits]).await?[0])
    }

    pub async fn get_wheel_mode(&self) -> Result<WheelMode, Hidpp20Error> {
        WheelMode::try_from(self.get_mode_bits().await?)
    }

    pub async fn set_wheel_mode(&self, mode: WheelMode) -> Result<WheelMode, Hidpp20Error> {
        WheelMode::try_from(self.set_mode_bits(mode.into()).await?)
    }

    /// Reads the position of the physical ratchet switch.
    pub async fn get_ratchet_switch_state(&self) -> Result<WheelRatchetState, Hidpp20Error> {
        let data = self.handle.call(FN_GET_RATCHET_STATE, &[]).await?;

        WheelRatchetState::try_from(data[0] & 0x01).map_err(|_| Hidpp20Error::UnsupportedResponse)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct WheelCapabilities {
    /// Hi-res reports generated per ratchet.
    pub multiplier: u8,

    /// Native reports can be inverted. Diverted reports never are.
    pub has_invert: bool,

    /// A physical switch toggles the ratchet.
    pub has_switch: bool,

    pub ratches_per_rotation: u8,

    /// Nominal diameter in millimeters.
    pub wheel_diameter: u8,
}

/// Typed view of the wheel mode bitmask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct WheelMode {
    /// Only honored for native reports.
    pub inverted: bool,
    pub resolution: WheelResolution,
    pub target: WheelEventTarget,
}

impl WheelMode {
    pub fn new(target: WheelEventTarget, resolution: WheelResolution, inverted: bool) -> Self {
        Self {
            inverted,
            resolution,
            target,
        }
    }
}

impl TryFrom<u8> for WheelMode {
    type Error = Hidpp20Error;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        let resolution = if bits & MODE_HIRES != 0 {
            WheelResolution::High
        } else {
            WheelResolution::Low
        };
        let target = if bits & MODE_TARGET != 0 {
            WheelEventTarget::Diverted
        } else {
            WheelEventTarget::Native
        };

        Ok(Self {
            inverted: bits & MODE_INVERT != 0,
            resolution,
            target,
        })
    }
}

impl From<WheelMode> for u8 {
    fn from(mode: WheelMode) -> Self {
        let mut bits = 0;
        if mode.target == WheelEventTarget::Diverted {
            bits |= MODE_TARGET;
        }
        if mode.resolution == WheelResolution::High {
            bits |= MODE_HIRES;
        }
        if mode.inverted {
            bits |= MODE_INVERT;
        }
        bits
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WheelResolution {
    Low = 0,
    High = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WheelEventTarget {
    Native = 0,
    Diverted = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WheelRatchetState {
    Freespin = 0,
    Ratchet = 1,
}

/// Notifications of [`HiResWheelFeatureV0`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub enum HiResWheelEvent {
    /// Wheel motion, only sent while the target is [`WheelEventTarget::Diverted`].
    WheelMovement(WheelMovementData),

    /// The ratchet switch was flipped. Always sent.
    RatchetSwitch(WheelRatchetState),
}

impl HiResWheelEvent {
    fn parse(function: u8, params: &[u8; 16]) -> Option<Self> {
        match function {
            EVENT_MOVEMENT => Some(Self::WheelMovement(WheelMovementData {
                resolution: WheelResolution::try_from((params[0] >> 4) & 0x01).ok()?,
                periods: U4::from_lo(params[0]),
                delta_vertical: i16::from_be_bytes([params[1], params[2]]),
            })),
            EVENT_RATCHET_SWITCH => {
                WheelRatchetState::try_from(params[0] & 0x01).ok().map(Self::RatchetSwitch)
            },
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct WheelMovementData {
    pub resolution: WheelResolution,

    /// Sampling periods covered by this report, at most 15.
    pub periods: U4,

    /// Positive when scrolling away from the user.
    pub delta_vertical: i16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockReply};

    const FEATURE_ID: u16 = super::super::FEATURE_ID;

    #[test]
    fn mode_bits() {
        let mode = WheelMode::try_from(MODE_HIRES | MODE_INVERT).unwrap();
        assert_eq!(mode.resolution, WheelResolution::High);
        assert_eq!(mode.target, WheelEventTarget::Native);
        assert!(mode.inverted);
        assert_eq!(u8::from(mode), 0x06);

        let mode = WheelMode::new(WheelEventTarget::Diverted, WheelResolution::Low, false);
        assert_eq!(u8::from(mode), MODE_TARGET);
    }

    #[tokio::test]
    async fn movement_and_ratchet_events() {
        let mock = MockDevice::new(0x01).with_feature(FEATURE_ID, |_, _| MockReply::Silent);
        let index = mock.feature_index(FEATURE_ID).unwrap();
        let chan = Arc::new(HidppChannel::from_raw_channel(mock.clone()).await.unwrap());
        let wheel = HiResWheelFeatureV0::new(chan, 0x01, index);
        let rx = wheel.listen();

        mock.emit_event(FEATURE_ID, 0, &[0x13, 0xff, 0xf8]);
        mock.emit_event(FEATURE_ID, 1, &[0x01]);

        let HiResWheelEvent::WheelMovement(movement) = rx.recv_async().await.unwrap() else {
            panic!("expected wheel movement");
        };
        assert_eq!(movement.resolution, WheelResolution::High);
        assert_eq!(movement.periods, U4::from_lo(3));
        assert_eq!(movement.delta_vertical, -8);

        assert_eq!(
            rx.recv_async().await.unwrap(),
            HiResWheelEvent::RatchetSwitch(WheelRatchetState::Ratchet)
        );
    }
}
