//! User-configured behavior triggered by diverted buttons.
//!
//! Every action supports `press`, `release` and `move_by`; variants ignore
//! what they have no use for. Failing device calls are logged and never
//! propagated beyond the action.

use std::sync::{Arc, Weak};

use futures::{FutureExt, future::BoxFuture};
use hidpp::device::Device;
use tracing::warn;

use crate::{
    config::{ActionConfig, ConfigError},
    sink::InputSink,
};

pub mod dpi;
pub mod gesture;
pub mod key;
pub mod toggle;

use dpi::{ChangeDpiAction, CycleDpiAction};
use gesture::GestureAction;
use key::KeyAction;

/// What an action needs to act on: the device it belongs to and the sink for
/// synthetic input.
///
/// The device is held weakly as it owns the actions, not vice versa.
#[derive(Clone)]
pub struct ActionContext {
    pub device: Weak<Device>,
    pub sink: Arc<dyn InputSink>,
}

impl ActionContext {
    pub fn new(device: &Arc<Device>, sink: Arc<dyn InputSink>) -> Self {
        Self {
            device: Arc::downgrade(device),
            sink,
        }
    }

    /// Returns the device, unless it was detached in the meantime.
    pub fn device(&self) -> Option<Arc<Device>> {
        let device = self.device.upgrade();
        if device.is_none() {
            warn!("the device of the action is no longer attached");
        }
        device
    }
}

pub enum Action {
    None,
    Keypress(KeyAction),
    Gestures(Box<GestureAction>),
    ToggleSmartShift(ActionContext),
    ToggleHiresScroll(ActionContext),
    CycleDpi(CycleDpiAction),
    ChangeDpi(ChangeDpiAction),
}

impl Action {
    /// Builds an action bound to the device and sink of `ctx`.
    pub fn from_config(config: &ActionConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        Ok(match config {
            ActionConfig::None => Self::None,
            ActionConfig::Keypress {
                keys,
            } => Self::Keypress(KeyAction::new(
                keys.iter().map(|key| key.key()).collect::<Result<_, _>>()?,
                Arc::clone(&ctx.sink),
            )),
            ActionConfig::Gestures {
                gestures,
            } => Self::Gestures(Box::new(GestureAction::from_config(gestures, ctx)?)),
            ActionConfig::ToggleSmartShift => Self::ToggleSmartShift(ctx.clone()),
            ActionConfig::ToggleHiresScroll => Self::ToggleHiresScroll(ctx.clone()),
            ActionConfig::CycleDpi {
                dpis,
            } => Self::CycleDpi(CycleDpiAction::new(dpis.clone(), ctx.clone())),
            ActionConfig::ChangeDpi {
                inc,
            } => Self::ChangeDpi(ChangeDpiAction::new(*inc, ctx.clone())),
        })
    }

    /// Creates an independent copy of the action bound to another device.
    ///
    /// Nested actions and gestures are copied as well; the accumulated state
    /// of the copy starts out fresh.
    pub fn duplicate(&self, ctx: &ActionContext) -> Self {
        match self {
            Self::None => Self::None,
            Self::Keypress(action) => {
                Self::Keypress(KeyAction::new(action.keys().to_vec(), Arc::clone(&ctx.sink)))
            },
            Self::Gestures(action) => Self::Gestures(Box::new(action.duplicate(ctx))),
            Self::ToggleSmartShift(_) => Self::ToggleSmartShift(ctx.clone()),
            Self::ToggleHiresScroll(_) => Self::ToggleHiresScroll(ctx.clone()),
            Self::CycleDpi(action) => {
                Self::CycleDpi(CycleDpiAction::new(action.dpis().to_vec(), ctx.clone()))
            },
            Self::ChangeDpi(action) => {
                Self::ChangeDpi(ChangeDpiAction::new(action.inc(), ctx.clone()))
            },
        }
    }

    /// Whether the action needs pointer motion while its button is held.
    pub fn consumes_motion(&self) -> bool {
        matches!(self, Self::Gestures(_))
    }

    pub fn press(&mut self) -> BoxFuture<'_, ()> {
        async move {
            match self {
                Self::None => {},
                Self::Keypress(action) => action.press(),
                Self::Gestures(action) => action.press(),
                Self::ToggleSmartShift(ctx) => toggle::toggle_smartshift(ctx).await,
                Self::ToggleHiresScroll(ctx) => toggle::toggle_hires_scroll(ctx).await,
                Self::CycleDpi(action) => action.press().await,
                Self::ChangeDpi(action) => action.press().await,
            }
        }
        .boxed()
    }

    pub fn release(&mut self) -> BoxFuture<'_, ()> {
        async move {
            match self {
                Self::Keypress(action) => action.release(),
                Self::Gestures(action) => action.release().await,
                _ => {},
            }
        }
        .boxed()
    }

    /// Feeds pointer motion to the action.
    pub fn move_by(&mut self, dx: i32, dy: i32) -> BoxFuture<'_, ()> {
        async move {
            if let Self::Gestures(action) = self {
                action.move_by(dx, dy).await;
            }
        }
        .boxed()
    }

    /// Fires the action once, as gestures do when they trigger.
    pub async fn trigger(&mut self) {
        self.press().await;
        self.release().await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use hidpp::{
        channel::HidppChannel,
        device::Device,
        mock::MockDevice,
    };

    use super::ActionContext;
    use crate::sink::testing::RecordingSink;

    /// Attaches to a mock device with index `0x01`.
    pub async fn device(mock: &MockDevice) -> Arc<Device> {
        let chan = Arc::new(HidppChannel::from_raw_channel(mock.clone()).await.unwrap());
        Arc::new(Device::new(chan, 0x01).await.unwrap())
    }

    pub async fn context(mock: &MockDevice) -> (Arc<Device>, Arc<RecordingSink>, ActionContext) {
        let device = device(mock).await;
        let sink = RecordingSink::new();
        let ctx = ActionContext::new(&device, sink.clone());
        (device, sink, ctx)
    }
}
