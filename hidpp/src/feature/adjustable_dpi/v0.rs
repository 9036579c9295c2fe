//! Sensor resolution control, version 0 onwards.

use std::sync::Arc;

use crate::{
    channel::HidppChannel,
    feature::{CreatableFeature, Feature, FeatureHandle},
    protocol::v20::Hidpp20Error,
};

/// Marks a DPI list entry as the step of a range between its neighbours.
const DPI_RANGE_MARKER: u16 = 0xe000;

/// Reads and changes the resolution of the motion sensors of a pointing
/// device.
pub struct AdjustableDpiFeatureV0 {
    handle: FeatureHandle,
}

impl CreatableFeature for AdjustableDpiFeatureV0 {
    const ID: u16 = super::FEATURE_ID;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            handle: FeatureHandle::new(chan, device_index, feature_index),
        }
    }
}

impl Feature for AdjustableDpiFeatureV0 {
}

impl AdjustableDpiFeatureV0 {
    async fn call(&self, function: u8, params: &[u8]) -> Result<[u8; 16], Hidpp20Error> {
        self.handle.call(function, params).await
    }

    /// Retrieves the amount of sensors whose DPI can be adjusted.
    pub async fn get_sensor_count(&self) -> Result<u8, Hidpp20Error> {
        let payload = self.call(0, &[]).await?;
        Ok(payload[0])
    }

    /// Retrieves the DPI values a sensor supports.
    pub async fn get_sensor_dpi_list(&self, sensor: u8) -> Result<SensorDpiList, Hidpp20Error> {
        let payload = self.call(1, &[sensor]).await?;
        Ok(SensorDpiList::parse(&payload[1..]))
    }

    /// Retrieves the current and the default DPI of a sensor, returned as
    /// `(current, default)`.
    ///
    /// Devices not reporting a default DPI return `0` for it.
    pub async fn get_sensor_dpi(&self, sensor: u8) -> Result<(u16, u16), Hidpp20Error> {
        let payload = self.call(2, &[sensor]).await?;

        Ok((
            u16::from_be_bytes([payload[1], payload[2]]),
            u16::from_be_bytes([payload[3], payload[4]]),
        ))
    }

    /// Sets the DPI of a sensor.
    ///
    /// The value is not checked against [`Self::get_sensor_dpi_list`]; the
    /// device rejects or clamps unsupported values itself.
    pub async fn set_sensor_dpi(&self, sensor: u8, dpi: u16) -> Result<(), Hidpp20Error> {
        let [hi, lo] = dpi.to_be_bytes();
        self.call(3, &[sensor, hi, lo]).await?;
        Ok(())
    }
}

/// Represents a single entry of a [`SensorDpiList`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DpiEntry {
    /// A single supported DPI value.
    Value(u16),

    /// All values from `min` to `max` (inclusive) in increments of `step`.
    Range { min: u16, max: u16, step: u16 },
}

/// Represents the DPI values supported by a sensor as reported by
/// [`AdjustableDpiFeatureV0::get_sensor_dpi_list`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SensorDpiList {
    pub entries: Vec<DpiEntry>,
}

impl SensorDpiList {
    /// Parses the big-endian DPI list following the sensor index.
    ///
    /// An entry of the form `0xe0xx` denotes a step size, turning the values
    /// before and after it into the bounds of a range. The list ends at the
    /// first zero entry.
    fn parse(raw: &[u8]) -> Self {
        let mut entries = Vec::new();
        let mut values = raw
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .take_while(|&value| value != 0);

        while let Some(value) = values.next() {
            if value & DPI_RANGE_MARKER != DPI_RANGE_MARKER {
                entries.push(DpiEntry::Value(value));
                continue;
            }

            let (Some(DpiEntry::Value(min)), Some(max)) = (entries.last().copied(), values.next())
            else {
                break;
            };

            entries.pop();
            entries.push(DpiEntry::Range {
                min,
                max,
                step: value & !DPI_RANGE_MARKER,
            });
        }

        Self {
            entries,
        }
    }

    /// Checks whether a DPI value is supported by the sensor.
    pub fn contains(&self, dpi: u16) -> bool {
        self.entries.iter().any(|entry| match *entry {
            DpiEntry::Value(value) => value == dpi,
            DpiEntry::Range {
                min,
                max,
                step,
            } => dpi >= min && dpi <= max && step != 0 && (dpi - min) % step == 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mock::{MockDevice, MockReply},
        nibble::U4,
    };

    #[test]
    fn dpi_list_with_range() {
        let list = SensorDpiList::parse(&[
            0x00, 0xc8, 0xe0, 0x32, 0x0f, 0xa0, 0x1f, 0x40, 0x00, 0x00, 0x12, 0x34,
        ]);

        assert_eq!(
            list.entries,
            vec![
                DpiEntry::Range {
                    min: 200,
                    max: 4000,
                    step: 50
                },
                DpiEntry::Value(8000),
            ]
        );
        assert!(list.contains(250));
        assert!(!list.contains(260));
        assert!(list.contains(8000));
    }

    #[tokio::test]
    async fn sensor_dpi_round_trip() {
        let mock = MockDevice::new(0x01).with_feature(super::super::FEATURE_ID, {
            let mut dpi = 1600u16;
            move |function, params| match function.to_lo() {
                0 => MockReply::Ok(vec![1]),
                2 => {
                    let [hi, lo] = dpi.to_be_bytes();
                    MockReply::Ok(vec![params[0], hi, lo, 0x03, 0xe8])
                },
                3 => {
                    dpi = u16::from_be_bytes([params[1], params[2]]);
                    MockReply::Ok(params[..3].to_vec())
                },
                _ => MockReply::Err(0x07),
            }
        });
        let index = mock.feature_index(super::super::FEATURE_ID).unwrap();
        let chan = Arc::new(HidppChannel::from_raw_channel(mock.clone()).await.unwrap());
        let dpi = AdjustableDpiFeatureV0::new(chan, 0x01, index);

        assert_eq!(dpi.get_sensor_count().await.unwrap(), 1);
        assert_eq!(dpi.get_sensor_dpi(0).await.unwrap(), (1600, 1000));
        dpi.set_sensor_dpi(0, 1400).await.unwrap();
        assert_eq!(dpi.get_sensor_dpi(0).await.unwrap(), (1400, 1000));

        let set = mock.requests_to(super::super::FEATURE_ID, 3);
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].function_id(), U4::from_lo(3));
        assert_eq!(&set[0].params()[..3], &[0x00, 0x05, 0x78]);
    }
}
