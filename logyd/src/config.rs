//! The daemon configuration, read from a TOML file.
//!
//! ```toml
//! [[devices]]
//! name = "MX Master 3"
//! vendor_id = 0x046d
//! product_id = 0xb023
//! dpi = 1600
//!
//! [[devices.buttons]]
//! cid = 0xc3
//! action = { type = "Gestures", gestures = [
//!     { direction = "Up", mode = "OnRelease", action = { type = "Keypress", keys = ["KEY_UP"] } },
//!     { direction = "None", mode = "OnRelease", action = { type = "ToggleSmartShift" } },
//! ] }
//!
//! [devices.thumbwheel]
//! left = { mode = "Axis", axis = "REL_HWHEEL", axis_multiplier = -1 }
//! right = { mode = "Axis", axis = "REL_HWHEEL" }
//! ```

use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    action::gesture::Direction,
    sink::{axis_code, key_code},
};

/// The device index of devices directly connected via USB or Bluetooth.
pub const DIRECT_DEVICE_INDEX: u8 = 0xff;

#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    /// Reads and parses the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("could not read configuration file {}", path.display()))?;

        toml::from_str(&raw)
            .with_context(|| format!("could not parse configuration file {}", path.display()))
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    /// A name used in log messages.
    #[serde(default)]
    pub name: Option<String>,

    pub vendor_id: u16,
    pub product_id: u16,

    /// The HID++ device index, `0xff` for directly connected devices.
    #[serde(default = "default_device_index")]
    pub device_index: u8,

    /// The DPI applied to every sensor when the device is attached.
    #[serde(default)]
    pub dpi: Option<u16>,

    #[serde(default)]
    pub buttons: Vec<ButtonConfig>,

    #[serde(default)]
    pub thumbwheel: Option<ThumbwheelConfig>,
}

impl DeviceConfig {
    /// The name used to refer to the device in log messages.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            format!("{:04x}:{:04x}", self.vendor_id, self.product_id)
        })
    }
}

fn default_device_index() -> u8 {
    DIRECT_DEVICE_INDEX
}

/// Binds an action to a reprogrammable control.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ButtonConfig {
    /// The control ID of the button.
    pub cid: u16,
    pub action: ActionConfig,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ActionConfig {
    None,
    Keypress {
        keys: Vec<Code>,
    },
    Gestures {
        gestures: Vec<GestureConfig>,
    },
    ToggleSmartShift,
    ToggleHiresScroll,
    #[serde(rename = "CycleDPI")]
    CycleDpi {
        dpis: Vec<u16>,
    },
    #[serde(rename = "ChangeDPI")]
    ChangeDpi {
        inc: i32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum GestureMode {
    OnRelease,
    #[serde(alias = "OnInterval", alias = "OnFewPixels")]
    PerPixel,
    Axis,
    OnThreshold,
    NoPress,
}

/// A gesture bound to a direction of a `Gestures` action, or to a
/// thumbwheel direction.
///
/// Which of the optional fields are required depends on the mode.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GestureConfig {
    /// Only used inside `Gestures` actions.
    #[serde(default)]
    pub direction: Option<Direction>,

    pub mode: GestureMode,

    /// The motion it takes to fire a `PerPixel` gesture.
    #[serde(default)]
    pub pixels: Option<u32>,

    /// The motion it takes to fire an `OnThreshold` gesture.
    #[serde(default)]
    pub threshold: Option<i32>,

    /// The relative axis moved by an `Axis` gesture.
    #[serde(default)]
    pub axis: Option<Code>,

    #[serde(default)]
    pub axis_multiplier: Option<i32>,

    #[serde(default)]
    pub action: Option<ActionConfig>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ThumbwheelConfig {
    /// Inverts the rotation reported by the device.
    #[serde(default)]
    pub invert: bool,

    #[serde(default)]
    pub left: Option<GestureConfig>,

    #[serde(default)]
    pub right: Option<GestureConfig>,

    /// Fired when the thumbwheel is tapped.
    #[serde(default)]
    pub tap: Option<ActionConfig>,

    /// Pressed while the thumbwheel is touched.
    #[serde(default)]
    pub touch: Option<ActionConfig>,
}

/// An input code given either by name (`"KEY_A"`) or by number.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Code {
    Number(u16),
    Name(String),
}

impl Code {
    /// Resolves the code as a key.
    pub fn key(&self) -> Result<u16, ConfigError> {
        match self {
            Self::Number(code) => Ok(*code),
            Self::Name(name) => key_code(name).ok_or_else(|| ConfigError::UnknownKey(name.clone())),
        }
    }

    /// Resolves the code as a relative axis.
    pub fn axis(&self) -> Result<u16, ConfigError> {
        match self {
            Self::Number(code) => Ok(*code),
            Self::Name(name) => {
                axis_code(name).ok_or_else(|| ConfigError::UnknownAxis(name.clone()))
            },
        }
    }
}

/// Represents a configuration that parsed but cannot be turned into actions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown key {0:?}")]
    UnknownKey(String),

    #[error("unknown relative axis {0:?}")]
    UnknownAxis(String),

    #[error("gestures of mode {mode:?} require the `{field}` field")]
    MissingField {
        mode: GestureMode,
        field: &'static str,
    },

    #[error("gestures inside a `Gestures` action require a direction")]
    MissingDirection,

    #[error("the {0:?} direction is bound more than once")]
    DuplicateDirection(Direction),

    #[error("`pixels` must be greater than zero")]
    ZeroPixels,

    #[error("gestures of mode {0:?} cannot be bound to the thumbwheel")]
    NotWheelCompatible(GestureMode),
}
