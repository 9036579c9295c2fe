//! Emits synthetic input events through a virtual uinput device.

use std::{
    io,
    str::FromStr,
    sync::{Mutex, PoisonError},
};

use evdev::{
    AttributeSet,
    EventType,
    InputEvent,
    Key,
    RelativeAxisType,
    uinput::{VirtualDevice, VirtualDeviceBuilder},
};
use tracing::info;

/// The `EV_KEY` event type.
pub const EV_KEY: u16 = 0x01;

/// The highest key code registered on the virtual device (`KEY_MAX`).
const KEY_MAX: u16 = 0x2ff;

/// The highest relative axis code registered on the virtual device
/// (`REL_MAX`).
const REL_MAX: u16 = 0x0f;

/// A consumer of synthetic input events.
///
/// Actions receive their sink at construction, which allows tests to record
/// emitted events instead of creating a virtual device.
pub trait InputSink: Send + Sync {
    /// Emits a single discrete event, e.g. a key press (`value = 1`) or
    /// release (`value = 0`).
    fn send_event(&self, event_type: u16, code: u16, value: i32) -> io::Result<()>;

    /// Emits motion on a relative axis.
    fn move_axis(&self, axis: u16, amount: i32) -> io::Result<()>;
}

/// An [`InputSink`] backed by a uinput virtual device.
pub struct UinputSink {
    device: Mutex<VirtualDevice>,
}

impl UinputSink {
    /// Creates a virtual device supporting every key and relative axis.
    pub fn new(name: &str) -> io::Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 1..=KEY_MAX {
            keys.insert(Key::new(code));
        }

        let mut axes = AttributeSet::<RelativeAxisType>::new();
        for code in 0..=REL_MAX {
            axes.insert(RelativeAxisType(code));
        }

        let device = VirtualDeviceBuilder::new()?
            .name(name)
            .with_keys(&keys)?
            .with_relative_axes(&axes)?
            .build()?;

        info!(name, "created virtual input device");

        Ok(Self {
            device: Mutex::new(device),
        })
    }

    fn emit(&self, event: InputEvent) -> io::Result<()> {
        // `emit` terminates the batch with a SYN_REPORT.
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .emit(&[event])
    }
}

impl InputSink for UinputSink {
    fn send_event(&self, event_type: u16, code: u16, value: i32) -> io::Result<()> {
        self.emit(InputEvent::new(EventType(event_type), code, value))
    }

    fn move_axis(&self, axis: u16, amount: i32) -> io::Result<()> {
        self.emit(InputEvent::new(EventType::RELATIVE, axis, amount))
    }
}

/// Resolves a key name like `KEY_A` or `BTN_LEFT` to its code.
pub fn key_code(name: &str) -> Option<u16> {
    Key::from_str(name).ok().map(|key| key.code())
}

/// Resolves a relative axis name like `REL_WHEEL` to its code.
pub fn axis_code(name: &str) -> Option<u16> {
    RelativeAxisType::from_str(name).ok().map(|axis| axis.0)
}
