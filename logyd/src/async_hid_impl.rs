//! Raw HID access through `async-hid`.

use std::{error::Error, fs, path::Path};

use anyhow::{Context, Result, anyhow};
use async_hid::{
    AsyncHidRead,
    AsyncHidWrite,
    Device,
    DeviceId,
    DeviceInfo,
    DeviceReader,
    DeviceWriter,
    HidBackend,
};
use futures_lite::StreamExt;
use hidpp::{
    async_trait,
    channel::{ChannelError, HidppChannel, RawHidChannel},
};
use itertools::Itertools;
use tokio::sync::Mutex;
use tracing::debug;

type BoxError = Box<dyn Error + Sync + Send>;

/// One opened hidraw interface.
struct HidInterface {
    info: DeviceInfo,
    reader: Mutex<DeviceReader>,
    writer: Mutex<DeviceWriter>,
}

impl HidInterface {
    async fn open(device: Device) -> Result<Self> {
        let (reader, writer) = device.open().await?;
        let info = device.to_device_info();

        Ok(Self {
            info,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
        })
    }

    fn sysfs_path(&self) -> Option<&Path> {
        match &self.info.id {
            DeviceId::DevPath(path) => Some(path),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }
}

#[async_trait]
impl RawHidChannel for HidInterface {
    fn vendor_id(&self) -> u16 {
        self.info.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.info.product_id
    }

    async fn write_report(&self, src: &[u8]) -> Result<usize, BoxError> {
        self.writer.lock().await.write_output_report(src).await?;
        Ok(src.len())
    }

    async fn read_report(&self, buf: &mut [u8]) -> Result<usize, BoxError> {
        Ok(self.reader.lock().await.read_input_report(buf).await?)
    }

    // Decided from the report descriptor.
    fn supports_short_long_hidpp(&self) -> Option<(bool, bool)> {
        None
    }

    async fn get_report_descriptor(&self, buf: &mut [u8]) -> Result<usize, BoxError> {
        let path = self
            .sysfs_path()
            .ok_or_else(|| anyhow!("report descriptors can only be read through sysfs"))?;

        let descriptor = fs::read(path.join("device/report_descriptor"))?;
        let len = descriptor.len().min(buf.len());
        buf[..len].copy_from_slice(&descriptor[..len]);
        Ok(len)
    }
}

/// Opens the HID++ channels of all local HID devices with the given vendor
/// and product ID.
///
/// Interfaces of the device not speaking HID++ are skipped.
pub async fn open_hidpp(vendor_id: u16, product_id: u16) -> Result<Vec<HidppChannel>> {
    let candidates = HidBackend::default()
        .enumerate()
        .await?
        .filter(|dev| dev.vendor_id == vendor_id && dev.product_id == product_id)
        .collect::<Vec<Device>>()
        .await;

    let mut channels = Vec::new();
    for dev in candidates.into_iter().unique_by(|dev| dev.id.clone()) {
        let interface = HidInterface::open(dev).await?;

        match HidppChannel::from_raw_channel(interface).await {
            Ok(channel) => channels.push(channel),
            Err(ChannelError::HidppNotSupported) => {
                debug!(vendor_id, product_id, "skipping interface without HID++ support");
            },
            Err(err) => return Err(err).context("could not initialize the HID++ channel"),
        }
    }

    Ok(channels)
}
