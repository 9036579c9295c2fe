//! Drives a single configured device: diverts its controls and turns the
//! resulting notifications into actions.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use hidpp::{
    channel::HidppChannel,
    device::Device,
    feature::{
        EmittingFeature,
        adjustable_dpi::v0::AdjustableDpiFeatureV0,
        reprog_controls::v4::{
            CidReportingChange,
            DivertedButtons,
            ReprogControlsEvent,
            ReprogControlsV4Feature,
        },
        thumbwheel::v0::{
            ThumbwheelEvent,
            ThumbwheelFeatureV0,
            ThumbwheelReportingMode,
            ThumbwheelRotationStatus,
            ThumbwheelStatusUpdate,
        },
    },
    protocol::v20::Hidpp20Error,
};
use tracing::{debug, error, info, warn};

use crate::{
    action::{Action, ActionContext, gesture::Gesture},
    config::{ActionConfig, DeviceConfig, GestureConfig, ThumbwheelConfig},
    sink::InputSink,
};

/// How often the event loop checks whether the channel was closed.
const CLOSED_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The actions bound to the thumbwheel.
struct ThumbwheelBinding {
    left: Option<Gesture>,
    right: Option<Gesture>,
    tap: Option<Action>,
    touch: Option<Action>,
    touched: bool,
}

impl ThumbwheelBinding {
    fn from_config(config: &ThumbwheelConfig, ctx: &ActionContext) -> Result<Self> {
        let gesture = |config: &Option<GestureConfig>| {
            config
                .as_ref()
                .map(|config| Gesture::for_wheel(config, ctx))
                .transpose()
        };
        let action = |config: &Option<ActionConfig>| {
            config
                .as_ref()
                .map(|config| Action::from_config(config, ctx))
                .transpose()
        };

        Ok(Self {
            left: gesture(&config.left).context("invalid left thumbwheel gesture")?,
            right: gesture(&config.right).context("invalid right thumbwheel gesture")?,
            tap: action(&config.tap).context("invalid thumbwheel tap action")?,
            touch: action(&config.touch).context("invalid thumbwheel touch action")?,
            touched: false,
        })
    }
}

/// A device attached according to its configuration.
pub struct ManagedDevice {
    name: String,
    device: Arc<Device>,

    /// The actions per control ID.
    buttons: HashMap<u16, Action>,

    /// The controls held down according to the last notification.
    held: HashSet<u16>,

    thumbwheel: Option<ThumbwheelBinding>,
    reprog_controls: Option<Arc<ReprogControlsV4Feature>>,
    thumbwheel_feature: Option<Arc<ThumbwheelFeatureV0>>,

    /// Subscribed before diverting so no notification is missed until
    /// [`Self::run`] starts polling.
    control_events: Option<flume::Receiver<ReprogControlsEvent>>,
    thumbwheel_events: Option<flume::Receiver<ThumbwheelEvent>>,
}

impl ManagedDevice {
    /// Initializes the device behind `chan` and applies `config` to it.
    ///
    /// Failing to set up a single control only gets logged; the device stays
    /// usable with the remaining ones.
    pub async fn attach(
        config: &DeviceConfig,
        chan: Arc<HidppChannel>,
        sink: Arc<dyn InputSink>,
    ) -> Result<Self> {
        let name = config.display_name();
        chan.set_rotating_sw_id(true);
        let device = Arc::new(
            Device::new(chan, config.device_index)
                .await
                .with_context(|| format!("could not initialize {name}"))?,
        );
        let ctx = ActionContext::new(&device, sink);

        let mut buttons = HashMap::new();
        for button in &config.buttons {
            let action = Action::from_config(&button.action, &ctx)
                .with_context(|| format!("invalid action for control {:#06x}", button.cid))?;
            if buttons.insert(button.cid, action).is_some() {
                warn!(
                    device = %name,
                    cid = button.cid,
                    "control bound more than once, using the last binding"
                );
            }
        }

        let thumbwheel = config
            .thumbwheel
            .as_ref()
            .map(|config| ThumbwheelBinding::from_config(config, &ctx))
            .transpose()?;

        let mut managed = Self {
            name,
            device,
            buttons,
            held: HashSet::new(),
            thumbwheel,
            reprog_controls: None,
            thumbwheel_feature: None,
            control_events: None,
            thumbwheel_events: None,
        };

        if let Some(dpi) = config.dpi {
            if let Err(err) = managed.apply_dpi(dpi).await {
                error!(device = %managed.name, dpi, "could not set the startup DPI: {err}");
            }
        }

        if let Err(err) = managed.divert_controls().await {
            error!(device = %managed.name, "could not divert controls: {err}");
        }

        if let Some(config) = &config.thumbwheel {
            if let Err(err) = managed.divert_thumbwheel(config.invert).await {
                error!(device = %managed.name, "could not divert the thumbwheel: {err}");
            }
        }

        info!(device = %managed.name, controls = managed.buttons.len(), "attached device");

        Ok(managed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn apply_dpi(&self, dpi: u16) -> Result<(), Hidpp20Error> {
        let Some(feature) = self.device.feature::<AdjustableDpiFeatureV0>().await? else {
            warn!(device = %self.name, "the device does not support DPI changes");
            return Ok(());
        };

        for sensor in 0..feature.get_sensor_count().await? {
            feature.set_sensor_dpi(sensor, dpi).await?;
            debug!(device = %self.name, sensor, dpi, "set startup DPI");
        }

        Ok(())
    }

    async fn divert_controls(&mut self) -> Result<(), Hidpp20Error> {
        if self.buttons.is_empty() {
            return Ok(());
        }

        let Some(feature) = self.device.feature::<ReprogControlsV4Feature>().await? else {
            warn!(device = %self.name, "the device does not support reprogrammable controls");
            return Ok(());
        };
        self.control_events = Some(feature.listen());

        for (&cid, action) in &self.buttons {
            let change = CidReportingChange {
                divert: Some(true),
                raw_xy: Some(action.consumes_motion()),
                ..Default::default()
            };

            match feature.set_cid_reporting(cid, change).await {
                Ok(()) => debug!(device = %self.name, cid, "diverted control"),
                Err(err) => error!(device = %self.name, cid, "could not divert control: {err}"),
            }
        }

        self.reprog_controls = Some(feature);
        Ok(())
    }

    async fn divert_thumbwheel(&mut self, invert: bool) -> Result<(), Hidpp20Error> {
        let Some(feature) = self.device.feature::<ThumbwheelFeatureV0>().await? else {
            warn!(device = %self.name, "the device does not have a thumbwheel");
            return Ok(());
        };
        self.thumbwheel_events = Some(feature.listen());

        feature
            .set_thumbwheel_reporting(ThumbwheelReportingMode::Diverted, invert)
            .await?;
        debug!(device = %self.name, invert, "diverted thumbwheel");

        self.thumbwheel_feature = Some(feature);
        Ok(())
    }

    /// Processes notifications until the underlying channel is closed.
    pub async fn run(mut self) {
        let controls = self.control_events.take();
        let thumbwheel = self.thumbwheel_events.take();
        let mut closed_check = tokio::time::interval(CLOSED_POLL_INTERVAL);

        loop {
            tokio::select! {
                Some(event) = next_event(controls.as_ref()) => {
                    self.handle_controls(event).await;
                },
                Some(event) = next_event(thumbwheel.as_ref()) => {
                    self.handle_thumbwheel(event).await;
                },
                _ = closed_check.tick() => {
                    if self.device.channel().is_closed() {
                        break;
                    }
                },
            }
        }

        info!(device = %self.name, "device disconnected");
    }

    pub(crate) async fn handle_controls(&mut self, event: ReprogControlsEvent) {
        match event {
            ReprogControlsEvent::DivertedButtons(buttons) => self.handle_buttons(buttons).await,
            ReprogControlsEvent::RawXy {
                dx,
                dy,
            } => {
                for cid in &self.held {
                    if let Some(action) = self.buttons.get_mut(cid) {
                        if action.consumes_motion() {
                            action.move_by(i32::from(dx), i32::from(dy)).await;
                        }
                    }
                }
            },
            _ => {},
        }
    }

    async fn handle_buttons(&mut self, buttons: DivertedButtons) {
        let pressed: HashSet<u16> = buttons.pressed().collect();
        let released: Vec<u16> = self.held.difference(&pressed).copied().collect();
        let newly_pressed: Vec<u16> =
            buttons.pressed().filter(|cid| !self.held.contains(cid)).collect();
        self.held = pressed;

        for cid in released {
            if let Some(action) = self.buttons.get_mut(&cid) {
                debug!(device = %self.name, cid, "control released");
                action.release().await;
            }
        }

        for cid in newly_pressed {
            if let Some(action) = self.buttons.get_mut(&cid) {
                debug!(device = %self.name, cid, "control pressed");
                action.press().await;
            }
        }
    }

    pub(crate) async fn handle_thumbwheel(&mut self, event: ThumbwheelEvent) {
        let ThumbwheelEvent::StatusUpdate(update) = event else {
            return;
        };

        if let Some(binding) = &mut self.thumbwheel {
            handle_thumbwheel_update(binding, &update).await;
        }
    }
}

async fn handle_thumbwheel_update(
    binding: &mut ThumbwheelBinding,
    update: &ThumbwheelStatusUpdate,
) {
    if update.rotation_status == ThumbwheelRotationStatus::Start {
        for gesture in [&mut binding.left, &mut binding.right].into_iter().flatten() {
            gesture.reset();
        }
    }

    let rotation = i32::from(update.rotation);
    let gesture = match rotation {
        1.. => binding.right.as_mut(),
        ..0 => binding.left.as_mut(),
        0 => None,
    };
    if let Some(gesture) = gesture {
        gesture.feed(rotation).await;
    }

    if update.single_tap {
        if let Some(action) = &mut binding.tap {
            action.trigger().await;
        }
    }

    if update.touch != binding.touched {
        binding.touched = update.touch;
        if let Some(action) = &mut binding.touch {
            if update.touch {
                action.press().await;
            } else {
                action.release().await;
            }
        }
    }
}

/// Waits for the next event of an optional receiver. Yields [`None`] once the
/// receiver is disconnected and never resolves if there is no receiver.
async fn next_event<T>(rx: Option<&flume::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv_async().await.ok(),
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use hidpp::{
        feature::reprog_controls::v4::MAX_DIVERTED_BUTTONS,
        mock::{MockDevice, MockReply},
    };

    use super::*;
    use crate::{
        config::Config,
        sink::{
            EV_KEY,
            testing::{Recorded, RecordingSink},
        },
    };

    const CONFIG: &str = r#"
        [[devices]]
        vendor_id = 0x046d
        product_id = 0xb023
        device_index = 0x01
        dpi = 1200

        [[devices.buttons]]
        cid = 0x56
        action = { type = "Keypress", keys = ["KEY_A"] }

        [[devices.buttons]]
        cid = 0xc3
        action = { type = "Gestures", gestures = [
            { direction = "Up", mode = "Axis", axis = "REL_WHEEL", axis_multiplier = 2 },
        ] }

        [devices.thumbwheel]
        invert = true
        right = { mode = "PerPixel", pixels = 10, action = { type = "Keypress", keys = ["KEY_B"] } }
        tap = { type = "Keypress", keys = ["KEY_C"] }
    "#;

    fn mock() -> MockDevice {
        let dpi = Arc::new(Mutex::new(800u16));
        MockDevice::new(0x01)
            .with_feature(0x1b04, |_, _| MockReply::Ok(vec![]))
            .with_feature(0x2150, |_, _| MockReply::Ok(vec![]))
            .with_feature(0x2201, move |function, params| match function.to_lo() {
                0 => MockReply::Ok(vec![1]),
                3 => {
                    *dpi.lock().unwrap() = u16::from_be_bytes([params[1], params[2]]);
                    MockReply::Ok(vec![])
                },
                _ => MockReply::Err(0x07),
            })
    }

    async fn attach(mock: &MockDevice) -> (ManagedDevice, Arc<RecordingSink>) {
        let config: Config = toml::from_str(CONFIG).unwrap();
        let chan = Arc::new(HidppChannel::from_raw_channel(mock.clone()).await.unwrap());
        let sink = RecordingSink::new();
        let device = ManagedDevice::attach(&config.devices[0], chan, sink.clone())
            .await
            .unwrap();
        (device, sink)
    }

    fn buttons(cids: &[u16]) -> ReprogControlsEvent {
        let mut raw = [0u16; MAX_DIVERTED_BUTTONS];
        raw[..cids.len()].copy_from_slice(cids);
        ReprogControlsEvent::DivertedButtons(DivertedButtons(raw))
    }

    fn thumbwheel(rotation: i16, status: u8, flags: u8) -> ThumbwheelEvent {
        let mut payload = [0u8; 16];
        payload[..2].copy_from_slice(&rotation.to_be_bytes());
        payload[4] = status;
        payload[5] = flags;
        ThumbwheelEvent::StatusUpdate(ThumbwheelStatusUpdate::parse(&payload).unwrap())
    }

    #[tokio::test]
    async fn attach_configures_the_device() {
        let mock = mock();
        let _ = attach(&mock).await;

        let mut diverted: Vec<Vec<u8>> = mock
            .requests_to(0x1b04, 3)
            .iter()
            .map(|report| report.params()[..5].to_vec())
            .collect();
        diverted.sort();
        assert_eq!(diverted, vec![
            vec![0x00, 0x56, 0x23, 0x00, 0x00],
            vec![0x00, 0xc3, 0x33, 0x00, 0x00],
        ]);

        let reporting = mock.requests_to(0x2150, 2);
        assert_eq!(reporting.len(), 1);
        assert_eq!(reporting[0].params()[..2], [0x01, 0x01]);

        let dpi = mock.requests_to(0x2201, 3);
        assert_eq!(dpi.len(), 1);
        assert_eq!(dpi[0].params()[..3], [0x00, 0x04, 0xb0]);
    }

    #[tokio::test]
    async fn button_sets_become_press_and_release_edges() {
        let mock = mock();
        let (mut device, sink) = attach(&mock).await;

        device.handle_controls(buttons(&[0x56])).await;
        device.handle_controls(buttons(&[0x56, 0xc3])).await;
        device.handle_controls(buttons(&[0xc3])).await;
        device.handle_controls(buttons(&[])).await;

        assert_eq!(sink.take(), vec![
            Recorded::Event {
                event_type: EV_KEY,
                code: 30,
                value: 1
            },
            Recorded::Event {
                event_type: EV_KEY,
                code: 30,
                value: 0
            },
        ]);
    }

    #[tokio::test]
    async fn motion_drives_held_gestures_only() {
        let mock = mock();
        let (mut device, sink) = attach(&mock).await;

        device.handle_controls(ReprogControlsEvent::RawXy {
            dx: 0,
            dy: -70,
        })
        .await;
        assert!(sink.take().is_empty());

        device.handle_controls(buttons(&[0xc3])).await;
        device.handle_controls(ReprogControlsEvent::RawXy {
            dx: 0,
            dy: -70,
        })
        .await;
        device.handle_controls(buttons(&[])).await;

        assert_eq!(sink.take(), vec![Recorded::Axis {
            axis: 8,
            amount: 140
        }]);
    }

    #[tokio::test]
    async fn thumbwheel_drives_gestures_and_taps() {
        let mock = mock();
        let (mut device, sink) = attach(&mock).await;

        device.handle_thumbwheel(thumbwheel(6, 1, 0)).await;
        device.handle_thumbwheel(thumbwheel(6, 2, 0)).await;
        device.handle_thumbwheel(thumbwheel(-30, 2, 0)).await;
        assert_eq!(sink.presses(48), 1);

        device.handle_thumbwheel(thumbwheel(0, 0, 1 << 3)).await;
        assert_eq!(sink.presses(46), 1);
    }

    #[tokio::test]
    async fn notifications_reach_the_event_loop() {
        let mock = mock();
        let (device, sink) = attach(&mock).await;
        let task = tokio::spawn(device.run());

        mock.emit_event(0x1b04, 0, &[0x00, 0x56]);
        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.presses(30) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        task.abort();
    }

    #[tokio::test]
    async fn requests_use_rotating_software_ids() {
        let mock = mock();
        let _ = attach(&mock).await;

        let ids: HashSet<u8> = mock
            .requests_to(0x1b04, 3)
            .iter()
            .map(|request| request.software_id().to_lo())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(!ids.contains(&0));
    }

    #[tokio::test]
    async fn notifications_before_the_event_loop_are_kept() {
        let mock = mock();
        let (device, sink) = attach(&mock).await;

        mock.emit_event(0x1b04, 0, &[0x00, 0x56]);
        mock.emit_event(0x1b04, 0, &[]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let task = tokio::spawn(device.run());

        tokio::time::timeout(Duration::from_secs(2), async {
            while sink.releases(30) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sink.presses(30), 1);

        task.abort();
    }
}
