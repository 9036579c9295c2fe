//! Implements peripheral devices connected to HID++ channels.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    channel::{ChannelError, HidppChannel},
    feature::{
        CreatableFeature,
        registry,
        root::{FeatureInformation, RootFeature},
    },
    protocol::{ProtocolVersion, v20::Hidpp20Error},
};

/// Represents a single HID++2.0 device connected to a [`HidppChannel`].
///
/// Feature indices are resolved lazily through the Root feature the first
/// time a feature is requested and cached afterwards.
pub struct Device {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The index of the device on the HID++ channel.
    pub device_index: u8,

    /// The supported protocol version reported by the device.
    pub protocol_version: ProtocolVersion,

    root: RootFeature,

    /// Resolved feature information per feature ID. [`None`] marks features
    /// the device does not support.
    feature_infos: Mutex<HashMap<u16, Option<FeatureInformation>>>,

    /// The instantiated feature implementations.
    features: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Device {
    /// Tries to initialize a device on a HID++ channel.
    ///
    /// This pings the device to determine the protocol version it supports.
    ///
    /// Returns [`DeviceError::UnsupportedProtocolVersion`] if the device only
    /// supports [`ProtocolVersion::V10`].
    pub async fn new(chan: Arc<HidppChannel>, device_index: u8) -> Result<Self, DeviceError> {
        let root = RootFeature::new(Arc::clone(&chan), device_index, 0);

        let protocol_version = match root.ping(rand::random()).await {
            Ok((protocol_num, target_sw, _)) => ProtocolVersion::V20 {
                protocol_num,
                target_sw,
            },
            Err(Hidpp20Error::Hidpp10(_)) => ProtocolVersion::V10,
            Err(err) => return Err(err.into()),
        };

        if protocol_version == ProtocolVersion::V10 {
            return Err(DeviceError::UnsupportedProtocolVersion);
        }

        info!(device_index, ?protocol_version, "initialized HID++ device");

        Ok(Self {
            chan,
            device_index,
            protocol_version,
            root,
            feature_infos: Mutex::new(HashMap::new()),
            features: Mutex::new(HashMap::new()),
        })
    }

    /// The Root feature every HID++2.0 device supports.
    pub fn root(&self) -> &RootFeature {
        &self.root
    }

    /// The channel the device is connected to.
    pub fn channel(&self) -> &Arc<HidppChannel> {
        &self.chan
    }

    /// Looks up information about a feature, asking the device only the first
    /// time a feature ID is requested.
    ///
    /// Returns [`None`] if the device does not support the feature.
    pub async fn feature_info(&self, id: u16) -> Result<Option<FeatureInformation>, Hidpp20Error> {
        if let Some(info) = lock(&self.feature_infos).get(&id) {
            return Ok(*info);
        }

        let info = self.root.get_feature(id).await?;
        lock(&self.feature_infos).insert(id, info);

        Ok(info)
    }

    /// Retrieves the implementation of a feature, instantiating it the first
    /// time it is requested.
    ///
    /// Returns [`None`] if the device does not support the feature, or only
    /// in a version older than the one the implementation starts with.
    pub async fn feature<F: CreatableFeature>(&self) -> Result<Option<Arc<F>>, Hidpp20Error> {
        if let Some(feat) = self.cached_feature::<F>() {
            return Ok(Some(feat));
        }

        let Some(info) = self.feature_info(F::ID).await? else {
            return Ok(None);
        };

        if info.version < F::STARTING_VERSION {
            debug!(
                device_index = self.device_index,
                feature = registry::name(F::ID),
                version = info.version,
                "feature version is not implemented"
            );
            return Ok(None);
        }

        debug!(
            device_index = self.device_index,
            feature = registry::name(F::ID),
            feature_index = info.index,
            "instantiating feature"
        );

        // Another task may have instantiated the feature in the meantime.
        let mut features = lock(&self.features);
        let instance = features
            .entry(TypeId::of::<F>())
            .or_insert_with(|| -> Arc<dyn Any + Send + Sync> {
                Arc::new(F::new(Arc::clone(&self.chan), self.device_index, info.index))
            })
            .clone();

        Ok(instance.downcast::<F>().ok())
    }

    fn cached_feature<F: CreatableFeature>(&self) -> Option<Arc<F>> {
        lock(&self.features)
            .get(&TypeId::of::<F>())
            .cloned()
            .and_then(|feat| feat.downcast::<F>().ok())
    }
}

/// Represents a device-specific error.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Indicates that the device could not be reached or answered with an
    /// error.
    #[error("the device could not be initialized")]
    Protocol(#[from] Hidpp20Error),

    /// Indicates that the addressed device does only support HID++1.0.
    #[error("the device does not support HID++2.0 or newer")]
    UnsupportedProtocolVersion,
}

impl From<ChannelError> for DeviceError {
    fn from(err: ChannelError) -> Self {
        Self::Protocol(err.into())
    }
}
