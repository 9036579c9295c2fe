//! The HID++2.0 protocol spoken by Logitech mice and keyboards.
//!
//! HID++ is a vendor extension of [HID](https://en.wikipedia.org/wiki/Human_interface_device)
//! exposing device capabilities as numbered features. This crate covers the
//! parts needed to remap controls:
//!
//! - framing and validation of short and long reports ([`report`])
//! - request/response matching over a shared HID channel ([`channel`])
//! - feature index resolution and caching per device ([`device`])
//! - the features for DPI, wheel modes, the thumbwheel and reprogrammable
//!   controls ([`feature`])
//!
//! HID++1.0 devices are not supported.
//!
//! # Quickstart
//!
//! The transport is not part of this crate. Implement
//! [`channel::RawHidChannel`] for the HID library of your choice (the daemon
//! in this workspace uses [`async-hid`](https://crates.io/crates/async-hid));
//! [`mod@async_trait`] is re-exported for that purpose. Tests can use
//! `mock::MockDevice` behind the `mock` feature instead.
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use hidpp::{
//!     channel::HidppChannel,
//!     device::Device,
//!     feature::{
//!         EmittingFeature,
//!         adjustable_dpi::v0::AdjustableDpiFeatureV0,
//!         thumbwheel::v0::{ThumbwheelFeatureV0, ThumbwheelReportingMode},
//!     },
//! };
//!
//! // Fails with `ChannelError::HidppNotSupported` for non-HID++ interfaces.
//! let channel = Arc::new(HidppChannel::from_raw_channel(my_hid_channel).await?);
//!
//! // Rotating the software ID keeps concurrent requests apart.
//! channel.set_rotating_sw_id(true);
//!
//! // `0xff` addresses a directly connected device, receivers use the
//! // pairing slot.
//! let device = Device::new(Arc::clone(&channel), 0xff).await?;
//!
//! // Feature indices are looked up through the root feature on first use.
//! if let Some(dpi) = device.feature::<AdjustableDpiFeatureV0>().await? {
//!     let (current, default) = dpi.get_sensor_dpi(0).await?;
//!     dpi.set_sensor_dpi(0, default).await?;
//! }
//!
//! // Notifications are delivered through flume receivers.
//! if let Some(thumbwheel) = device.feature::<ThumbwheelFeatureV0>().await? {
//!     let events = thumbwheel.listen();
//!     thumbwheel
//!         .set_thumbwheel_reporting(ThumbwheelReportingMode::Diverted, false)
//!         .await?;
//!     while let Ok(event) = events.recv_async().await {
//!         println!("{event:?}");
//!     }
//! }
//! ```

pub use async_trait::async_trait;

pub mod channel;
pub mod device;
pub mod event;
pub mod feature;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod nibble;
pub mod protocol;
pub mod report;
