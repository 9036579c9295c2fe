//! Implements the Root feature (ID `0x0000`) that every device supports by
//! default.

use std::sync::Arc;

use tracing::debug;

use super::{CreatableFeature, Feature, FeatureHandle, FeatureType};
use crate::{channel::HidppChannel, protocol::v20::Hidpp20Error};

/// The feature living at index 0 of every HID++2.0 device.
///
/// [`crate::device::Device::new`] registers it before anything else, as it
/// is what resolves every other feature ID to its index.
#[derive(Clone)]
pub struct RootFeature {
    handle: FeatureHandle,
}

impl CreatableFeature for RootFeature {
    const ID: u16 = 0x0000;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, _: u8) -> Self {
        Self {
            handle: FeatureHandle::new(chan, device_index, 0),
        }
    }
}

impl Feature for RootFeature {
}

impl RootFeature {
    /// Looks up where a feature ID lives in the feature table.
    ///
    /// Index `0` in the response means the device lacks the feature, which is
    /// returned as [`None`]. Root version 1 devices report version `0` for
    /// every feature.
    ///
    /// The ID goes on the wire big-endian, high byte first.
    pub async fn get_feature(&self, id: u16) -> Result<Option<FeatureInformation>, Hidpp20Error> {
        let payload = self.handle.call(0, &id.to_be_bytes()).await?;
        let device_index = self.handle.device_index();

        if payload[0] == 0 {
            debug!(
                device_index,
                feature_id = format_args!("{id:#06x}"),
                "feature is not supported"
            );
            return Ok(None);
        }

        let info = FeatureInformation {
            id,
            index: payload[0],
            typ: FeatureType::from(payload[1]),
            version: payload[2],
        };
        debug!(device_index, ?info, "resolved feature");

        Ok(Some(info))
    }

    /// Sends a ping carrying `data`.
    ///
    /// The answer is `(protocol_major, protocol_minor, data)`, the data byte
    /// echoed back unchanged.
    pub async fn ping(&self, data: u8) -> Result<(u8, u8, u8), Hidpp20Error> {
        let payload = self.handle.call(1, &[0x00, 0x00, data]).await?;
        Ok((payload[0], payload[1], payload[2]))
    }
}

/// A feature table entry as returned by [`RootFeature::get_feature`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureInformation {
    pub id: u16,

    /// Where requests for this feature are addressed.
    pub index: u8,

    pub typ: FeatureType,

    /// Highest version implemented. Later versions keep every function of
    /// earlier ones.
    pub version: u8,
}
