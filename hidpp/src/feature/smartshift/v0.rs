//! Scroll wheel ratchet control, version 0 onwards.

use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    channel::HidppChannel,
    feature::{CreatableFeature, Feature, FeatureHandle},
    protocol::v20::Hidpp20Error,
};

const FN_GET_MODE: u8 = 0;
const FN_SET_MODE: u8 = 1;

/// Switches the scroll wheel between ratchet and freespin and tunes how
/// eagerly it disengages on its own.
pub struct SmartShiftFeatureV0 {
    handle: FeatureHandle,
}

impl CreatableFeature for SmartShiftFeatureV0 {
    const ID: u16 = super::FEATURE_ID;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            handle: FeatureHandle::new(chan, device_index, feature_index),
        }
    }
}

impl Feature for SmartShiftFeatureV0 {
}

impl SmartShiftFeatureV0 {
    /// Reads the configured ratchet mode.
    ///
    /// A wheel that is currently auto-disengaged still reports
    /// [`WheelMode::Ratchet`] here.
    pub async fn get_ratchet_control_mode(&self) -> Result<RatchetControlMode, Hidpp20Error> {
        let data = self.handle.call(FN_GET_MODE, &[]).await?;
        let wheel_mode =
            WheelMode::try_from(data[0]).map_err(|_| Hidpp20Error::UnsupportedResponse)?;

        Ok(RatchetControlMode {
            wheel_mode,
            auto_disengage: data[1],
            auto_disengage_default: data[2],
        })
    }

    /// Writes the ratchet mode. Every [`None`] is sent as `0`, which the
    /// device treats as "keep the current value".
    ///
    /// Auto-disengage thresholds count quarter turns per second in
    /// `0x01..=0xfe`. `0xff` keeps the ratchet engaged permanently.
    pub async fn set_ratchet_control_mode(
        &self,
        wheel_mode: Option<WheelMode>,
        auto_disengage: Option<u8>,
        auto_disengage_default: Option<u8>,
    ) -> Result<(), Hidpp20Error> {
        let params = [
            wheel_mode.map_or(0, u8::from),
            auto_disengage.unwrap_or(0),
            auto_disengage_default.unwrap_or(0),
        ];

        self.handle.call(FN_SET_MODE, &params).await.map(drop)
    }

    /// Whether the ratchet is engaged.
    pub async fn is_active(&self) -> Result<bool, Hidpp20Error> {
        let mode = self.get_ratchet_control_mode().await?;
        Ok(mode.wheel_mode == WheelMode::Ratchet)
    }

    /// Engages (`true`) or releases (`false`) the ratchet without touching the
    /// auto-disengage thresholds.
    pub async fn set_active(&self, active: bool) -> Result<(), Hidpp20Error> {
        let mode = match active {
            true => WheelMode::Ratchet,
            false => WheelMode::Freespin,
        };
        self.set_ratchet_control_mode(Some(mode), None, None).await
    }
}

/// The ratchet configuration read by
/// [`SmartShiftFeatureV0::get_ratchet_control_mode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct RatchetControlMode {
    pub wheel_mode: WheelMode,

    /// Quarter turns per second that release the ratchet, `0xff` for never.
    pub auto_disengage: u8,

    pub auto_disengage_default: u8,
}

/// Whether the wheel spins freely or clicks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum WheelMode {
    Freespin = 1,
    Ratchet = 2,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockReply};

    const FEATURE_ID: u16 = super::super::FEATURE_ID;

    async fn smartshift(mock: &MockDevice) -> SmartShiftFeatureV0 {
        let index = mock.feature_index(FEATURE_ID).unwrap();
        let chan = Arc::new(HidppChannel::from_raw_channel(mock.clone()).await.unwrap());
        SmartShiftFeatureV0::new(chan, 0x01, index)
    }

    #[tokio::test]
    async fn unknown_wheel_mode_is_unsupported() {
        let mock = MockDevice::new(0x01)
            .with_feature(FEATURE_ID, |_, _| MockReply::Ok(vec![0x07, 0x0a, 0x0a]));

        let err = smartshift(&mock).await.get_ratchet_control_mode().await.unwrap_err();
        assert!(matches!(err, Hidpp20Error::UnsupportedResponse));
    }

    #[tokio::test]
    async fn set_active_keeps_thresholds() {
        let mock = MockDevice::new(0x01).with_feature(FEATURE_ID, |_, _| MockReply::Ok(vec![]));

        smartshift(&mock).await.set_active(false).await.unwrap();
        let written = mock.requests_to(FEATURE_ID, 1);
        assert_eq!(&written[0].params()[..3], &[0x01, 0x00, 0x00]);
    }
}
