//! An in-memory HID++2.0 device implementing [`RawHidChannel`].
//!
//! The device answers Root feature lookups and pings on its own. All other
//! features are backed by handler closures registered via
//! [`MockDevice::with_feature`]; their index in the feature table is their
//! registration order, starting at `1`.

use std::{
    error::Error,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use crate::{
    channel::RawHidChannel,
    nibble::{self, U4},
    protocol::v20::ErrorCode,
    report::{LONG_REPORT_LENGTH, Report},
};

/// The protocol version the mock device reports when pinged.
pub const MOCK_PROTOCOL_VERSION: (u8, u8) = (4, 5);

/// The answer of a feature handler to a single request.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MockReply {
    /// Answer with a regular response carrying these parameters.
    Ok(Vec<u8>),

    /// Answer with a HID++2.0 error report carrying this error code.
    Err(u8),

    /// Answer with a HID++1.0 error report carrying this error code, like
    /// devices not speaking HID++2.0 do.
    Hidpp10Err(u8),

    /// Do not answer at all.
    Silent,
}

type Handler = Box<dyn FnMut(U4, &[u8]) -> MockReply + Send>;

struct State {
    root: Option<Handler>,
    features: Vec<(u16, Handler)>,
    written: Vec<Report>,
    hold: usize,
    held: Vec<Vec<u8>>,
}

/// A scriptable HID++2.0 device.
///
/// Clones share their state, so a clone can be handed to
/// [`crate::channel::HidppChannel::from_raw_channel`] while the original is
/// used to inspect written requests and inject events.
#[derive(Clone)]
pub struct MockDevice {
    device_index: u8,
    state: Arc<Mutex<State>>,
    tx: flume::Sender<Vec<u8>>,
    rx: flume::Receiver<Vec<u8>>,
}

impl MockDevice {
    /// Creates a device answering requests addressed to `device_index`.
    pub fn new(device_index: u8) -> Self {
        let (tx, rx) = flume::unbounded();

        Self {
            device_index,
            state: Arc::new(Mutex::new(State {
                root: None,
                features: Vec::new(),
                written: Vec::new(),
                hold: 0,
                held: Vec::new(),
            })),
            tx,
            rx,
        }
    }

    /// Adds a feature backed by `handler`, which receives the function ID and
    /// parameters of every request to the feature.
    ///
    /// Registering feature ID `0x0000` replaces the built-in Root
    /// implementation.
    pub fn with_feature(
        self,
        id: u16,
        handler: impl FnMut(U4, &[u8]) -> MockReply + Send + 'static,
    ) -> Self {
        {
            let mut state = self.lock();
            if id == 0x0000 {
                state.root = Some(Box::new(handler));
            } else {
                state.features.push((id, Box::new(handler)));
            }
        }
        self
    }

    /// Holds back replies until `count` of them accumulated and then
    /// delivers them in reverse order.
    pub fn hold_replies(self, count: usize) -> Self {
        self.lock().hold = count;
        self
    }

    /// Looks up the index of a registered feature.
    pub fn feature_index(&self, id: u16) -> Option<u8> {
        if id == 0x0000 {
            return Some(0);
        }

        self.lock()
            .features
            .iter()
            .position(|(feature_id, _)| *feature_id == id)
            .map(|pos| pos as u8 + 1)
    }

    /// Returns all requests written to the device so far.
    pub fn written(&self) -> Vec<Report> {
        self.lock().written.clone()
    }

    /// Returns all requests written to a specific function of a feature.
    pub fn requests_to(&self, id: u16, function: u8) -> Vec<Report> {
        let Some(index) = self.feature_index(id) else {
            return Vec::new();
        };

        self.written()
            .into_iter()
            .filter(|report| {
                report.feature_index() == index && report.function_id() == U4::from_lo(function)
            })
            .collect()
    }

    /// Emits a notification (software ID `0`) of a registered feature.
    pub fn emit_event(&self, id: u16, function: u8, params: &[u8]) {
        let Some(index) = self.feature_index(id) else {
            return;
        };

        let function_and_sw_id = nibble::combine(U4::from_lo(function), U4::from_lo(0));
        let raw = self.long_report(index, function_and_sw_id, params);
        self.inject_raw(&raw);
    }

    /// Makes the device deliver arbitrary raw bytes to the reader.
    pub fn inject_raw(&self, raw: &[u8]) {
        let _ = self.tx.send(raw.to_vec());
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn long_report(&self, feature_index: u8, function_and_sw_id: u8, params: &[u8]) -> Vec<u8> {
        let mut raw = vec![0u8; LONG_REPORT_LENGTH];
        raw[0] = 0x11;
        raw[1] = self.device_index;
        raw[2] = feature_index;
        raw[3] = function_and_sw_id;
        let len = params.len().min(LONG_REPORT_LENGTH - 4);
        raw[4..4 + len].copy_from_slice(&params[..len]);
        raw
    }

    fn error_report(&self, request: &Report, code: u8) -> Vec<u8> {
        let header = request.as_bytes();
        self.long_report(0xff, header[2], &[header[3], code])
    }

    /// Computes the reply to a request, if any.
    fn reply(&self, state: &mut State, request: &Report) -> Option<Vec<u8>> {
        if request.device_index() != self.device_index {
            return None;
        }

        let function = request.function_id();
        let params = request.params();
        let index = request.feature_index();

        let reply = if index == 0 {
            match state.root.as_mut() {
                Some(handler) => handler(function, params),
                None => root_reply(&state.features, function, params),
            }
        } else {
            match state.features.get_mut(index as usize - 1) {
                Some((_, handler)) => handler(function, params),
                None => MockReply::Err(ErrorCode::InvalidFeatureIndex.into()),
            }
        };

        match reply {
            MockReply::Ok(response) => {
                Some(self.long_report(index, request.as_bytes()[3], &response))
            },
            MockReply::Err(code) => Some(self.error_report(request, code)),
            MockReply::Hidpp10Err(code) => {
                let header = request.as_bytes();
                Some(vec![0x10, self.device_index, 0x8f, header[2], header[3], code, 0x00])
            },
            MockReply::Silent => None,
        }
    }
}

/// The built-in implementation of the Root feature.
fn root_reply(features: &[(u16, Handler)], function: U4, params: &[u8]) -> MockReply {
    match function.to_lo() {
        0 => {
            let id = u16::from_be_bytes([params[0], params[1]]);
            let index = features
                .iter()
                .position(|(feature_id, _)| *feature_id == id)
                .map_or(0, |pos| pos as u8 + 1);
            MockReply::Ok(vec![index, 0x00, 0x00])
        },
        1 => MockReply::Ok(vec![
            MOCK_PROTOCOL_VERSION.0,
            MOCK_PROTOCOL_VERSION.1,
            params[2],
        ]),
        _ => MockReply::Err(ErrorCode::InvalidFunctionId.into()),
    }
}

#[async_trait]
impl RawHidChannel for MockDevice {
    fn vendor_id(&self) -> u16 {
        0x046d
    }

    fn product_id(&self) -> u16 {
        0xb023
    }

    async fn write_report(&self, src: &[u8]) -> Result<usize, Box<dyn Error + Sync + Send>> {
        let request = Report::decode(src)?;

        let mut state = self.lock();
        state.written.push(request);

        let Some(reply) = self.reply(&mut state, &request) else {
            return Ok(src.len());
        };

        if state.hold == 0 {
            let _ = self.tx.send(reply);
            return Ok(src.len());
        }

        state.held.push(reply);
        if state.held.len() >= state.hold {
            for reply in state.held.drain(..).rev() {
                let _ = self.tx.send(reply);
            }
        }

        Ok(src.len())
    }

    async fn read_report(&self, buf: &mut [u8]) -> Result<usize, Box<dyn Error + Sync + Send>> {
        let raw = self.rx.recv_async().await?;
        let len = raw.len().min(buf.len());
        buf[..len].copy_from_slice(&raw[..len]);
        Ok(len)
    }

    fn supports_short_long_hidpp(&self) -> Option<(bool, bool)> {
        Some((true, true))
    }

    async fn get_report_descriptor(
        &self,
        _buf: &mut [u8],
    ) -> Result<usize, Box<dyn Error + Sync + Send>> {
        Ok(0)
    }
}
