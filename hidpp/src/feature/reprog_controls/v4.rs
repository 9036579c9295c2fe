//! Control reprogramming and diversion, version 0 onwards.

use std::sync::Arc;

use crate::{
    channel::HidppChannel,
    feature::{CreatableFeature, EmittingFeature, Feature, FeatureHandle, Notifications},
    protocol::v20::Hidpp20Error,
};

/// The maximum amount of controls reported in a single diverted buttons
/// event.
pub const MAX_DIVERTED_BUTTONS: usize = 4;

/// Implements the `ReprogControlsV4` / `0x1b04` feature.
///
/// Every reprogrammable control (button) is identified by a control ID (CID).
/// Diverted controls stop producing native HID reports and are reported via
/// [`ReprogControlsEvent::DivertedButtons`] instead.
pub struct ReprogControlsV4Feature {
    handle: FeatureHandle,
    notifications: Notifications<ReprogControlsEvent>,
}

impl CreatableFeature for ReprogControlsV4Feature {
    const ID: u16 = super::FEATURE_ID;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        let handle = FeatureHandle::new(chan, device_index, feature_index);
        let notifications = handle.notifications(ReprogControlsEvent::parse);

        Self {
            handle,
            notifications,
        }
    }
}

impl Feature for ReprogControlsV4Feature {
}

impl EmittingFeature<ReprogControlsEvent> for ReprogControlsV4Feature {
    fn listen(&self) -> flume::Receiver<ReprogControlsEvent> {
        self.notifications.receiver()
    }
}

impl ReprogControlsV4Feature {
    async fn call(&self, function: u8, params: &[u8]) -> Result<[u8; 16], Hidpp20Error> {
        self.handle.call(function, params).await
    }

    /// Retrieves the amount of reprogrammable controls.
    pub async fn get_count(&self) -> Result<u8, Hidpp20Error> {
        Ok(self.call(0, &[]).await?[0])
    }

    /// Retrieves information about the control at `index`, which ranges from
    /// `0` to [`Self::get_count`] (exclusive).
    pub async fn get_control_info(&self, index: u8) -> Result<ControlInfo, Hidpp20Error> {
        let payload = self.call(1, &[index]).await?;

        Ok(ControlInfo {
            cid: u16::from_be_bytes([payload[0], payload[1]]),
            task_id: u16::from_be_bytes([payload[2], payload[3]]),
            flags: ControlFlags::from_raw(payload[4], payload[8]),
            position: payload[5],
            group: payload[6],
            group_mask: payload[7],
        })
    }

    /// Retrieves how a control is currently reported.
    pub async fn get_cid_reporting(&self, cid: u16) -> Result<CidReporting, Hidpp20Error> {
        let payload = self.call(2, &cid.to_be_bytes()).await?;

        if u16::from_be_bytes([payload[0], payload[1]]) != cid {
            return Err(Hidpp20Error::UnsupportedResponse);
        }

        Ok(CidReporting::from_raw(
            payload[2],
            u16::from_be_bytes([payload[3], payload[4]]),
        ))
    }

    /// Changes how a control is reported.
    ///
    /// Fields of `change` set to [`None`] are left as they are.
    pub async fn set_cid_reporting(
        &self,
        cid: u16,
        change: CidReportingChange,
    ) -> Result<(), Hidpp20Error> {
        let [cid_hi, cid_lo] = cid.to_be_bytes();
        let [remap_hi, remap_lo] = change.remap.unwrap_or(0).to_be_bytes();

        self.call(3, &[cid_hi, cid_lo, change.to_flags(), remap_hi, remap_lo])
            .await?;

        Ok(())
    }
}

/// Represents static information about a control as reported by
/// [`ReprogControlsV4Feature::get_control_info`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ControlInfo {
    /// The control ID.
    pub cid: u16,

    /// The task the control performs natively.
    pub task_id: u16,

    pub flags: ControlFlags,

    /// The position of F-keys, `0` for other controls.
    pub position: u8,

    /// The group the control belongs to, `0` if none.
    pub group: u8,

    /// A bitmask of groups the control can be remapped to.
    pub group_mask: u8,
}

/// Represents the capabilities of a control.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ControlFlags {
    pub mouse: bool,
    pub fkey: bool,
    pub hotkey: bool,
    pub fn_toggle: bool,
    pub reprogrammable: bool,
    pub divertable: bool,
    pub persistently_divertable: bool,
    pub virtual_control: bool,

    /// Whether pointer motion can be diverted while the control is held.
    pub raw_xy: bool,

    /// Whether pointer motion can be diverted regardless of the control
    /// state.
    pub force_raw_xy: bool,
}

impl ControlFlags {
    fn from_raw(flags: u8, additional: u8) -> Self {
        Self {
            mouse: flags & (1 << 0) != 0,
            fkey: flags & (1 << 1) != 0,
            hotkey: flags & (1 << 2) != 0,
            fn_toggle: flags & (1 << 3) != 0,
            reprogrammable: flags & (1 << 4) != 0,
            divertable: flags & (1 << 5) != 0,
            persistently_divertable: flags & (1 << 6) != 0,
            virtual_control: flags & (1 << 7) != 0,
            raw_xy: additional & (1 << 0) != 0,
            force_raw_xy: additional & (1 << 1) != 0,
        }
    }
}

/// Represents how a control is reported as returned by
/// [`ReprogControlsV4Feature::get_cid_reporting`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct CidReporting {
    /// Whether the control is temporarily diverted to HID++.
    pub divert: bool,

    /// Whether the control is persistently diverted to HID++.
    pub persist: bool,

    /// Whether pointer motion is diverted while the control is held.
    pub raw_xy: bool,

    /// Whether pointer motion is diverted regardless of the control state.
    pub force_raw_xy: bool,

    /// The CID the control is remapped to, `0` if not remapped.
    pub remap: u16,
}

impl CidReporting {
    fn from_raw(flags: u8, remap: u16) -> Self {
        Self {
            divert: flags & (1 << 0) != 0,
            persist: flags & (1 << 2) != 0,
            raw_xy: flags & (1 << 4) != 0,
            force_raw_xy: flags & (1 << 6) != 0,
            remap,
        }
    }
}

/// Describes a change to the reporting of a control, as passed to
/// [`ReprogControlsV4Feature::set_cid_reporting`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct CidReportingChange {
    pub divert: Option<bool>,
    pub persist: Option<bool>,
    pub raw_xy: Option<bool>,
    pub remap: Option<u16>,
}

impl CidReportingChange {
    /// Encodes the change into the flag byte, where each value bit is
    /// followed by a bit marking it as valid.
    fn to_flags(self) -> u8 {
        [self.divert, self.persist, self.raw_xy]
            .into_iter()
            .enumerate()
            .filter_map(|(i, value)| value.map(|value| (i * 2, value)))
            .fold(0, |flags, (shift, value)| {
                flags | (u8::from(value) << shift) | (1 << (shift + 1))
            })
    }
}

/// The CIDs of up to [`MAX_DIVERTED_BUTTONS`] diverted controls currently
/// held down. Unused slots are `0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DivertedButtons(pub [u16; MAX_DIVERTED_BUTTONS]);

impl DivertedButtons {
    /// Iterates over the CIDs of all held controls.
    pub fn pressed(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied().filter(|&cid| cid != 0)
    }

    /// Checks whether a specific control is held.
    pub fn contains(&self, cid: u16) -> bool {
        cid != 0 && self.0.contains(&cid)
    }
}

/// Represents an event emitted by the [`ReprogControlsV4Feature`] feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub enum ReprogControlsEvent {
    /// Is emitted whenever the set of held diverted controls changes.
    DivertedButtons(DivertedButtons),

    /// Is emitted for pointer motion while raw XY diversion is active.
    RawXy { dx: i16, dy: i16 },
}

impl ReprogControlsEvent {
    fn parse(function: u8, params: &[u8; 16]) -> Option<Self> {
        match function {
            0 => {
                let mut cids = [0u16; MAX_DIVERTED_BUTTONS];
                for (cid, raw) in cids.iter_mut().zip(params.chunks_exact(2)) {
                    *cid = u16::from_be_bytes([raw[0], raw[1]]);
                }
                Some(Self::DivertedButtons(DivertedButtons(cids)))
            },
            1 => Some(Self::RawXy {
                dx: i16::from_be_bytes([params[0], params[1]]),
                dy: i16::from_be_bytes([params[2], params[3]]),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockReply};

    const FEATURE_ID: u16 = super::super::FEATURE_ID;

    async fn feature(mock: &MockDevice) -> ReprogControlsV4Feature {
        let index = mock.feature_index(FEATURE_ID).unwrap();
        let chan = Arc::new(HidppChannel::from_raw_channel(mock.clone()).await.unwrap());
        ReprogControlsV4Feature::new(chan, 0x02, index)
    }

    #[test]
    fn reporting_change_flags() {
        let change = CidReportingChange {
            divert: Some(true),
            raw_xy: Some(false),
            ..Default::default()
        };
        assert_eq!(change.to_flags(), 0b0010_0011);
        assert_eq!(CidReportingChange::default().to_flags(), 0);
    }

    #[tokio::test]
    async fn set_cid_reporting_request() {
        let mock = MockDevice::new(0x02).with_feature(FEATURE_ID, |_, params| {
            MockReply::Ok(params[..5].to_vec())
        });
        let reprog = feature(&mock).await;

        reprog
            .set_cid_reporting(0x00c3, CidReportingChange {
                divert: Some(true),
                raw_xy: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();

        let written = mock.requests_to(FEATURE_ID, 3);
        assert_eq!(&written[0].params()[..5], &[0x00, 0xc3, 0x33, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn control_info_and_reporting() {
        let mock = MockDevice::new(0x02).with_feature(FEATURE_ID, |function, _| {
            match function.to_lo() {
                1 => MockReply::Ok(vec![0x00, 0xc3, 0x00, 0x38, 0x31, 0x00, 0x03, 0x00, 0x01]),
                2 => MockReply::Ok(vec![0x00, 0xc3, 0x11, 0x00, 0x00]),
                _ => MockReply::Err(0x07),
            }
        });
        let reprog = feature(&mock).await;

        let info = reprog.get_control_info(0).await.unwrap();
        assert_eq!(info.cid, 0xc3);
        assert!(info.flags.mouse && info.flags.reprogrammable && info.flags.divertable);
        assert!(info.flags.raw_xy);
        assert!(!info.flags.virtual_control);

        let reporting = reprog.get_cid_reporting(0xc3).await.unwrap();
        assert!(reporting.divert && reporting.raw_xy && !reporting.persist);

        assert!(matches!(
            reprog.get_cid_reporting(0x52).await,
            Err(Hidpp20Error::UnsupportedResponse)
        ));
    }

    #[tokio::test]
    async fn diverted_events() {
        let mock = MockDevice::new(0x02).with_feature(FEATURE_ID, |_, _| MockReply::Silent);
        let reprog = feature(&mock).await;
        let rx = reprog.listen();

        mock.emit_event(FEATURE_ID, 0, &[0x00, 0xc3, 0x00, 0x56]);
        mock.emit_event(FEATURE_ID, 1, &[0xff, 0xba, 0x00, 0x0a]);

        let ReprogControlsEvent::DivertedButtons(buttons) = rx.recv_async().await.unwrap() else {
            panic!("expected diverted buttons");
        };
        assert_eq!(buttons.pressed().collect::<Vec<_>>(), vec![0xc3, 0x56]);
        assert!(buttons.contains(0x56));
        assert!(!buttons.contains(0));

        assert_eq!(
            rx.recv_async().await.unwrap(),
            ReprogControlsEvent::RawXy {
                dx: -70,
                dy: 10
            }
        );
    }
}
