//! Specific device feature implementations.

use std::{any::Any, sync::Arc};

use crate::{
    channel::HidppChannel,
    event::EventEmitter,
    nibble::U4,
    protocol::v20::Hidpp20Error,
    report::{Report, ReportType},
};

pub mod adjustable_dpi;
pub mod hires_wheel;
pub mod registry;
pub mod reprog_controls;
pub mod root;
pub mod smartshift;
pub mod thumbwheel;

/// Represents a concrete implementation of a HID++2.0 device feature.
pub trait Feature: Any + Send + Sync {}

/// Represents a [`Feature`] that can be instantiated automatically.
pub trait CreatableFeature: Feature {
    /// The protocol ID of the implemented feature.
    const ID: u16;

    /// The version of the feature the implementation starts to support.
    const STARTING_VERSION: u8;

    /// Creates a new instance of the feature implementation.
    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self;
}

/// Represents a [`Feature`] that emits events the device sends on its own.
pub trait EmittingFeature<T>: Feature {
    /// Creates a new receiver for events of the feature.
    ///
    /// Events are only delivered to receivers created before they arrive.
    fn listen(&self) -> flume::Receiver<T>;
}

/// Flags a device attaches to every entry of its feature table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureType {
    /// Superseded by a newer feature but still listed for older software.
    pub obsolete: bool,

    /// Not meant to be touched by user configuration software.
    pub hidden: bool,

    /// Reserved for testing and manufacturing.
    pub internal: bool,

    /// Can be disabled for good once manufacturing is done.
    pub manufacturing_deactivatable: bool,

    /// Can be disabled for good once compliance testing is done.
    pub compliance_deactivatable: bool,
}

const FLAG_OBSOLETE: u8 = 0x80;
const FLAG_HIDDEN: u8 = 0x40;
const FLAG_INTERNAL: u8 = 0x20;
const FLAG_MANUFACTURING: u8 = 0x10;
const FLAG_COMPLIANCE: u8 = 0x08;

impl From<u8> for FeatureType {
    fn from(raw: u8) -> Self {
        Self {
            obsolete: raw & FLAG_OBSOLETE != 0,
            hidden: raw & FLAG_HIDDEN != 0,
            internal: raw & FLAG_INTERNAL != 0,
            manufacturing_deactivatable: raw & FLAG_MANUFACTURING != 0,
            compliance_deactivatable: raw & FLAG_COMPLIANCE != 0,
        }
    }
}

impl From<FeatureType> for u8 {
    fn from(typ: FeatureType) -> Self {
        [
            (typ.obsolete, FLAG_OBSOLETE),
            (typ.hidden, FLAG_HIDDEN),
            (typ.internal, FLAG_INTERNAL),
            (typ.manufacturing_deactivatable, FLAG_MANUFACTURING),
            (typ.compliance_deactivatable, FLAG_COMPLIANCE),
        ]
        .into_iter()
        .filter(|(set, _)| *set)
        .fold(0, |raw, (_, bit)| raw | bit)
    }
}

/// Addresses one entry of the feature table of one device.
#[derive(Clone)]
pub(crate) struct FeatureHandle {
    chan: Arc<HidppChannel>,
    device_index: u8,
    feature_index: u8,
}

impl FeatureHandle {
    pub(crate) fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            chan,
            device_index,
            feature_index,
        }
    }

    pub(crate) fn device_index(&self) -> u8 {
        self.device_index
    }

    /// Invokes a function of the feature and returns the response parameters
    /// padded with zeroes.
    ///
    /// A short report is used whenever the parameters fit and the channel
    /// accepts short reports.
    pub(crate) async fn call(&self, function: u8, params: &[u8]) -> Result<[u8; 16], Hidpp20Error> {
        let fits_short = params.len() <= ReportType::Short.params_capacity();
        let typ = if self.chan.supports_short && fits_short {
            ReportType::Short
        } else {
            ReportType::Long
        };

        let request = Report::with_params(
            typ,
            self.device_index,
            self.feature_index,
            U4::from_lo(function),
            self.chan.get_sw_id(),
            params,
        )?;

        Ok(self.chan.send_v20(request).await?.extend_params())
    }

    /// Starts decoding notifications of the feature.
    ///
    /// `decode` receives the function ID and the padded parameters of every
    /// unsolicited report addressed to this feature. Reports it maps to
    /// [`None`] are dropped.
    pub(crate) fn notifications<T>(
        &self,
        decode: impl Fn(u8, &[u8; 16]) -> Option<T> + Send + Sync + 'static,
    ) -> Notifications<T>
    where
        T: Clone + Send + 'static,
    {
        let emitter = Arc::new(EventEmitter::new());
        let (device_index, feature_index) = (self.device_index, self.feature_index);

        let listener = self.chan.add_msg_listener({
            let emitter = Arc::clone(&emitter);
            move |report, matched| {
                // Notifications carry software ID 0 and never answer a request.
                if matched
                    || report.device_index() != device_index
                    || report.feature_index() != feature_index
                    || report.software_id().to_lo() != 0
                {
                    return;
                }

                if let Some(event) = decode(report.function_id().to_lo(), &report.extend_params())
                {
                    emitter.emit(event);
                }
            }
        });

        Notifications {
            chan: Arc::clone(&self.chan),
            emitter,
            listener,
        }
    }
}

/// Decoded notifications of a single feature.
///
/// The channel listener feeding it is unregistered on drop.
pub(crate) struct Notifications<T: Clone> {
    chan: Arc<HidppChannel>,
    emitter: Arc<EventEmitter<T>>,
    listener: u32,
}

impl<T: Clone> Notifications<T> {
    pub(crate) fn receiver(&self) -> flume::Receiver<T> {
        self.emitter.create_receiver()
    }
}

impl<T: Clone> Drop for Notifications<T> {
    fn drop(&mut self) {
        self.chan.remove_msg_listener(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_type_bits() {
        let typ = FeatureType::from(0x40);
        assert!(typ.hidden);
        assert!(!typ.obsolete);
        assert!(!typ.internal);

        let typ = FeatureType::from(0xa0);
        assert!(typ.obsolete && typ.internal && !typ.hidden);
        assert_eq!(u8::from(typ), 0xa0);
    }
}
