//! Pointer gestures performed while a diverted button is held.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use serde::Deserialize;
use tracing::{trace, warn};

use super::{Action, ActionContext};
use crate::{
    config::{ConfigError, GestureConfig, GestureMode},
    sink::InputSink,
};

pub mod threshold;

use threshold::ThresholdGesture;

/// The accumulated motion an axis needs before gestures bound to it react.
pub const GESTURE_THRESHOLD: i32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,

    /// The button was released without moving the pointer noticeably.
    None,
}

impl Direction {
    /// Classifies accumulated motion, preferring the vertical axis on ties.
    pub fn classify(x: i32, y: i32) -> Self {
        if x.abs() < GESTURE_THRESHOLD && y.abs() < GESTURE_THRESHOLD {
            Self::None
        } else if y.abs() >= x.abs() {
            Self::vertical(y)
        } else {
            Self::horizontal(x)
        }
    }

    fn vertical(dy: i32) -> Self {
        if dy > 0 { Self::Down } else { Self::Up }
    }

    fn horizontal(dx: i32) -> Self {
        if dx > 0 { Self::Right } else { Self::Left }
    }
}

/// A single gesture bound to a direction.
pub enum Gesture {
    /// Fires the action when the button is released after moving in the
    /// direction of the gesture.
    OnRelease(Action),

    /// Fires the action every `pixels` units of motion.
    PerPixel {
        pixels: u32,
        remainder: u32,
        action: Action,
    },

    /// Translates motion into a relative axis.
    Axis {
        axis: u16,
        multiplier: i32,
        sink: Arc<dyn InputSink>,
    },

    /// Fires the action once per press when enough motion accumulated.
    Threshold(ThresholdGesture),

    /// Claims the direction without doing anything.
    NoPress,
}

fn required<T: Clone>(
    value: &Option<T>,
    mode: GestureMode,
    field: &'static str,
) -> Result<T, ConfigError> {
    value.clone().ok_or(ConfigError::MissingField {
        mode,
        field,
    })
}

impl Gesture {
    pub fn from_config(config: &GestureConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        let action = |ctx: &ActionContext| {
            let action = required(&config.action, config.mode, "action")?;
            Action::from_config(&action, ctx)
        };

        Ok(match config.mode {
            GestureMode::OnRelease => Self::OnRelease(action(ctx)?),
            GestureMode::PerPixel => {
                let pixels = required(&config.pixels, config.mode, "pixels")?;
                if pixels == 0 {
                    return Err(ConfigError::ZeroPixels);
                }

                Self::PerPixel {
                    pixels,
                    remainder: 0,
                    action: action(ctx)?,
                }
            },
            GestureMode::Axis => Self::Axis {
                axis: required(&config.axis, config.mode, "axis")?.axis()?,
                multiplier: config.axis_multiplier.unwrap_or(1),
                sink: Arc::clone(&ctx.sink),
            },
            GestureMode::OnThreshold => Self::Threshold(ThresholdGesture::new(
                required(&config.threshold, config.mode, "threshold")?,
                action(ctx)?,
            )),
            GestureMode::NoPress => Self::NoPress,
        })
    }

    /// Builds a gesture that will be driven by a wheel instead of a held
    /// button.
    pub fn for_wheel(config: &GestureConfig, ctx: &ActionContext) -> Result<Self, ConfigError> {
        let gesture = Self::from_config(config, ctx)?;
        if !gesture.wheel_compatible() {
            return Err(ConfigError::NotWheelCompatible(config.mode));
        }

        Ok(gesture)
    }

    pub fn duplicate(&self, ctx: &ActionContext) -> Self {
        match self {
            Self::OnRelease(action) => Self::OnRelease(action.duplicate(ctx)),
            Self::PerPixel {
                pixels,
                action,
                ..
            } => Self::PerPixel {
                pixels: *pixels,
                remainder: 0,
                action: action.duplicate(ctx),
            },
            Self::Axis {
                axis,
                multiplier,
                ..
            } => Self::Axis {
                axis: *axis,
                multiplier: *multiplier,
                sink: Arc::clone(&ctx.sink),
            },
            Self::Threshold(gesture) => Self::Threshold(gesture.duplicate(ctx)),
            Self::NoPress => Self::NoPress,
        }
    }

    /// Whether the gesture can be driven by a free-spinning wheel, which has
    /// no notion of press and release.
    pub fn wheel_compatible(&self) -> bool {
        match self {
            Self::PerPixel {
                ..
            }
            | Self::Axis {
                ..
            } => true,
            Self::Threshold(gesture) => gesture.wheel_compatible(),
            Self::OnRelease(_) | Self::NoPress => false,
        }
    }

    /// Forgets motion accumulated since the last reset.
    pub fn reset(&mut self) {
        match self {
            Self::PerPixel {
                remainder,
                ..
            } => *remainder = 0,
            Self::Threshold(gesture) => gesture.press(false),
            _ => {},
        }
    }

    /// Feeds motion along the direction of the gesture. Only the magnitude of
    /// `delta` is considered.
    pub async fn feed(&mut self, delta: i32) {
        match self {
            Self::Axis {
                axis,
                multiplier,
                sink,
            } => {
                let amount = delta.saturating_abs().saturating_mul(*multiplier);
                if let Err(err) = sink.move_axis(*axis, amount) {
                    warn!(axis = *axis, amount, "could not emit axis motion: {err}");
                }
            },
            Self::PerPixel {
                pixels,
                remainder,
                action,
            } => {
                *remainder = remainder.saturating_add(delta.unsigned_abs());
                while *pixels > 0 && *remainder >= *pixels {
                    *remainder -= *pixels;
                    action.trigger().await;
                }
            },
            Self::Threshold(gesture) => gesture.move_by(delta.saturating_abs()).await,
            Self::OnRelease(_) | Self::NoPress => {},
        }
    }

    /// The motion carried over towards the next firing of a `PerPixel`
    /// gesture.
    pub fn remainder(&self) -> Option<u32> {
        match self {
            Self::PerPixel {
                remainder,
                ..
            } => Some(*remainder),
            _ => None,
        }
    }
}

/// Recognizes the direction the pointer is moved in while a button is held.
pub struct GestureAction {
    gestures: HashMap<Direction, Gesture>,
    x: i32,
    y: i32,
    held: bool,
}

impl GestureAction {
    pub fn from_config(
        configs: &[GestureConfig],
        ctx: &ActionContext,
    ) -> Result<Self, ConfigError> {
        let mut gestures = HashMap::new();
        for config in configs {
            let direction = config.direction.ok_or(ConfigError::MissingDirection)?;
            match gestures.entry(direction) {
                Entry::Occupied(_) => return Err(ConfigError::DuplicateDirection(direction)),
                Entry::Vacant(entry) => {
                    entry.insert(Gesture::from_config(config, ctx)?);
                },
            }
        }

        Ok(Self::new(gestures))
    }

    pub fn new(gestures: HashMap<Direction, Gesture>) -> Self {
        Self {
            gestures,
            x: 0,
            y: 0,
            held: false,
        }
    }

    pub fn duplicate(&self, ctx: &ActionContext) -> Self {
        Self::new(
            self.gestures
                .iter()
                .map(|(direction, gesture)| (*direction, gesture.duplicate(ctx)))
                .collect(),
        )
    }

    pub fn gesture(&self, direction: Direction) -> Option<&Gesture> {
        self.gestures.get(&direction)
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn press(&mut self) {
        for gesture in self.gestures.values_mut() {
            gesture.reset();
        }

        self.held = true;
        self.x = 0;
        self.y = 0;
    }

    pub async fn move_by(&mut self, dx: i32, dy: i32) {
        self.x = self.x.saturating_add(dx);
        self.y = self.y.saturating_add(dy);

        if dy != 0 && self.y.abs() > GESTURE_THRESHOLD {
            if let Some(gesture) = self.gestures.get_mut(&Direction::vertical(dy)) {
                gesture.feed(dy).await;
            }
        }

        if dx != 0 && self.x.abs() > GESTURE_THRESHOLD {
            if let Some(gesture) = self.gestures.get_mut(&Direction::horizontal(dx)) {
                gesture.feed(dx).await;
            }
        }
    }

    pub async fn release(&mut self) {
        let direction = Direction::classify(self.x, self.y);
        trace!(?direction, x = self.x, y = self.y, "gesture released");

        self.held = false;
        self.x = 0;
        self.y = 0;

        match self.gestures.get_mut(&direction) {
            Some(Gesture::OnRelease(action)) => action.trigger().await,
            Some(Gesture::Threshold(gesture)) if direction == Direction::None => {
                gesture.press(true);
                gesture.move_by(0).await;
            },
            _ => {},
        }

        for gesture in self.gestures.values_mut() {
            if let Gesture::Threshold(gesture) = gesture {
                gesture.release();
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use hidpp::mock::MockDevice;

    use super::*;
    use crate::{
        action::testing,
        config::{ActionConfig, Code},
        sink::testing::Recorded,
    };

    pub fn gesture(direction: Direction, mode: GestureMode) -> GestureConfig {
        GestureConfig {
            direction: Some(direction),
            mode,
            pixels: None,
            threshold: None,
            axis: None,
            axis_multiplier: None,
            action: Some(ActionConfig::Keypress {
                keys: vec![Code::Number(30)],
            }),
        }
    }

    #[test]
    fn classifies_directions() {
        assert_eq!(Direction::classify(49, -49), Direction::None);
        assert_eq!(Direction::classify(10, 60), Direction::Down);
        assert_eq!(Direction::classify(10, -60), Direction::Up);
        assert_eq!(Direction::classify(-80, 60), Direction::Left);
        assert_eq!(Direction::classify(80, 0), Direction::Right);
        assert_eq!(Direction::classify(60, -60), Direction::Up);
    }

    #[tokio::test]
    async fn per_pixel_fires_and_carries_remainder() {
        let mock = MockDevice::new(0x01);
        let (_device, sink, ctx) = testing::context(&mock).await;

        let mut config = gesture(Direction::Down, GestureMode::PerPixel);
        config.pixels = Some(10);
        let mut action = GestureAction::from_config(&[config], &ctx).unwrap();

        action.press();
        action.move_by(0, 50).await;
        for dy in [10, 10, 5] {
            action.move_by(0, dy).await;
        }

        assert_eq!(sink.presses(30), 2);
        assert_eq!(action.gesture(Direction::Down).unwrap().remainder(), Some(5));

        action.press();
        assert_eq!(action.gesture(Direction::Down).unwrap().remainder(), Some(0));
    }

    #[tokio::test]
    async fn per_pixel_fires_repeatedly_for_large_motion() {
        let mock = MockDevice::new(0x01);
        let (_device, sink, ctx) = testing::context(&mock).await;

        let mut config = gesture(Direction::Right, GestureMode::PerPixel);
        config.pixels = Some(10);
        let mut action = GestureAction::from_config(&[config], &ctx).unwrap();

        action.press();
        action.move_by(75, 0).await;

        assert_eq!(sink.presses(30), 7);
        assert_eq!(action.gesture(Direction::Right).unwrap().remainder(), Some(5));
    }

    #[tokio::test]
    async fn axis_emits_scaled_motion() {
        let mock = MockDevice::new(0x01);
        let (_device, sink, ctx) = testing::context(&mock).await;

        let mut config = gesture(Direction::Up, GestureMode::Axis);
        config.axis = Some(Code::Name("REL_WHEEL".into()));
        config.axis_multiplier = Some(2);
        config.action = None;
        let mut action = GestureAction::from_config(&[config], &ctx).unwrap();

        action.press();
        action.move_by(0, -70).await;

        assert_eq!(sink.take(), vec![Recorded::Axis {
            axis: 8,
            amount: 140
        }]);
    }

    #[tokio::test]
    async fn on_release_fires_for_dominant_direction() {
        let mock = MockDevice::new(0x01);
        let (_device, sink, ctx) = testing::context(&mock).await;

        let mut none = gesture(Direction::None, GestureMode::OnRelease);
        none.action = Some(ActionConfig::Keypress {
            keys: vec![Code::Number(48)],
        });
        let mut action = GestureAction::from_config(
            &[gesture(Direction::Left, GestureMode::OnRelease), none],
            &ctx,
        )
        .unwrap();

        action.press();
        assert!(action.is_held());
        action.move_by(-40, 5).await;
        action.move_by(-40, 5).await;
        assert_eq!(sink.presses(30), 0);
        action.release().await;
        assert!(!action.is_held());
        assert_eq!(sink.presses(30), 1);

        action.press();
        action.move_by(10, 10).await;
        action.release().await;
        assert_eq!(sink.presses(30), 1);
        assert_eq!(sink.presses(48), 1);
    }

    #[tokio::test]
    async fn threshold_in_none_slot_fires_on_plain_click() {
        let mock = MockDevice::new(0x01);
        let (_device, sink, ctx) = testing::context(&mock).await;

        let mut config = gesture(Direction::None, GestureMode::OnThreshold);
        config.threshold = Some(100);
        let mut action = GestureAction::from_config(&[config], &ctx).unwrap();

        action.press();
        action.release().await;
        assert_eq!(sink.presses(30), 1);

        action.press();
        action.move_by(0, 120).await;
        action.release().await;
        assert_eq!(sink.presses(30), 1);
    }

    #[tokio::test]
    async fn invalid_configurations_are_rejected() {
        let mock = MockDevice::new(0x01);
        let (_device, _, ctx) = testing::context(&mock).await;

        let mut missing = gesture(Direction::Up, GestureMode::PerPixel);
        assert!(matches!(
            GestureAction::from_config(std::slice::from_ref(&missing), &ctx),
            Err(ConfigError::MissingField {
                field: "pixels",
                ..
            })
        ));

        missing.pixels = Some(0);
        assert!(matches!(
            GestureAction::from_config(&[missing], &ctx),
            Err(ConfigError::ZeroPixels)
        ));

        let up = gesture(Direction::Up, GestureMode::OnRelease);
        assert!(matches!(
            GestureAction::from_config(&[up.clone(), up.clone()], &ctx),
            Err(ConfigError::DuplicateDirection(Direction::Up))
        ));

        let mut undirected = up;
        undirected.direction = None;
        assert!(matches!(
            GestureAction::from_config(&[undirected.clone()], &ctx),
            Err(ConfigError::MissingDirection)
        ));

        assert!(matches!(
            Gesture::for_wheel(&undirected, &ctx),
            Err(ConfigError::NotWheelCompatible(GestureMode::OnRelease))
        ));
    }
}
