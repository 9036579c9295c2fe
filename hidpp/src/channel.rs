//! Implements basic messaging across HID and HID++ channels.
//!
//! This includes mapping incoming reports to previously sent requests and
//! distributing unsolicited reports (notifications) to registered listeners.

use std::{
    collections::{HashMap, VecDeque},
    error::Error,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use async_trait::async_trait;
use futures::{FutureExt, channel::oneshot, select};
use hidreport::{Field, Report as _, ReportDescriptor, Usage, UsageId, UsagePage};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    nibble::U4,
    protocol::v20::Hidpp20Error,
    report::{LONG_REPORT_ID, Report, ReportError, ReportType, SHORT_REPORT_ID},
};

/// hidapi defines this as the maximum EXPECTED size of report descriptors.
/// We will trust this for now, but a workaround may be required if devices do
/// in fact return longer descriptors.
const MAX_REPORT_DESCRIPTOR_LENGTH: usize = 4096;

/// The size of the buffer incoming reports are read into.
///
/// Non-HID++ reports may share the channel and be longer than any HID++
/// report, so this leaves some headroom to reject them by length.
const READ_BUFFER_LENGTH: usize = 64;

const SHORT_REPORT_USAGE_PAGE: u16 = 0xff00;
const SHORT_REPORT_USAGE: u16 = 0x0001;

const LONG_REPORT_USAGE_PAGE: u16 = 0xff00;
const LONG_REPORT_USAGE: u16 = 0x0002;

/// The software ID used if none is set explicitly.
pub const DEFAULT_SW_ID: u8 = 0x01;

/// The time to wait for a response before a request is considered failed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Represents an arbitrary HID communication channel that is both readable and
/// writable. It has to support async I/O.
///
/// Any type this trait is implemented for can be used for HID(++)
/// communication. If a specific channel supports HID++ is determined at a later
/// stage and is not directly related to potential implementations of this
/// trait.
#[async_trait]
pub trait RawHidChannel: Send + Sync + 'static {
    /// The USB vendor ID of the underlying device.
    fn vendor_id(&self) -> u16;

    /// The USB product ID of the underlying device.
    fn product_id(&self) -> u16;

    /// Writes a raw report to the channel.
    ///
    /// Returns the exact amount of written bytes on success.
    async fn write_report(&self, src: &[u8]) -> Result<usize, Box<dyn Error + Sync + Send>>;

    /// Reads a raw report from the channel.
    ///
    /// If the buffer is not large enough to fit the whole report, its remainder
    /// should be discarded and must not be returned by any succeeding call to
    /// [`Self::read_report`].
    ///
    /// Returns the exact amount or read bytes on success.
    async fn read_report(&self, buf: &mut [u8]) -> Result<usize, Box<dyn Error + Sync + Send>>;

    /// If the implementation already knows whether the underlying HID channel
    /// supports HID++ messages, it should return `Some((supports_short,
    /// supports_long))` from this method.
    ///
    /// In this case, the report descriptor will not be read and parsed.
    fn supports_short_long_hidpp(&self) -> Option<(bool, bool)>;

    /// Retrieves the raw HID report descriptor from the channel.
    ///
    /// This is used to determine whether the channel supports HID++.
    ///
    /// Returns the exact size of the report descriptor on success.
    async fn get_report_descriptor(
        &self,
        buf: &mut [u8],
    ) -> Result<usize, Box<dyn Error + Sync + Send>>;
}

/// Checks whether a parsed report descriptor declares a vendor input report
/// with the given ID and usage.
fn declares_report(descriptor: &ReportDescriptor, report_id: u8, page: u16, usage: u16) -> bool {
    descriptor
        .find_input_report(&[report_id])
        .and_then(|report| report.fields().first())
        .and_then(|field| match field {
            Field::Array(arr) => Some(arr.usage_range()),
            _ => None,
        })
        .is_some_and(|range| {
            range
                .lookup_usage(&Usage::from_page_and_id(
                    UsagePage::from(page),
                    UsageId::from(usage),
                ))
                .is_some()
        })
}

/// Checks whether a raw channel supports short or long HID++ messages.
async fn supports_short_long_hidpp(
    chan: &dyn RawHidChannel,
) -> Result<(bool, bool), ChannelError> {
    if let Some(support) = chan.supports_short_long_hidpp() {
        return Ok(support);
    }

    let mut raw_descriptor = vec![0u8; MAX_REPORT_DESCRIPTOR_LENGTH];
    let descriptor_size = chan
        .get_report_descriptor(&mut raw_descriptor)
        .await
        .map_err(ChannelError::Implementation)?;

    let descriptor = ReportDescriptor::try_from(&raw_descriptor[..descriptor_size])
        .map_err(ChannelError::ReportDescriptor)?;

    Ok((
        declares_report(
            &descriptor,
            SHORT_REPORT_ID,
            SHORT_REPORT_USAGE_PAGE,
            SHORT_REPORT_USAGE,
        ),
        declares_report(
            &descriptor,
            LONG_REPORT_ID,
            LONG_REPORT_USAGE_PAGE,
            LONG_REPORT_USAGE,
        ),
    ))
}

/// A function that is called for every incoming report.
///
/// The second argument is `true` if the report was matched to a pending
/// request.
pub type MessageListener = Box<dyn Fn(Report, bool) + Send + Sync>;

/// Represents a request that was sent and is waiting for a response.
struct PendingMessage {
    /// An ID unique among all requests sent over the channel.
    id: u64,

    /// The sent request. Incoming reports are matched against it using
    /// [`Report::answers`].
    request: Report,

    /// The oneshot sender used to provide the response to the waiting
    /// caller.
    sender: oneshot::Sender<Report>,
}

/// The state shared between the channel and its read thread.
struct Shared {
    pending: Mutex<VecDeque<PendingMessage>>,
    listeners: Mutex<HashMap<u32, MessageListener>>,
    closed: AtomicBool,
}

impl Shared {
    /// Routes a single decoded report to the oldest matching pending request
    /// and afterwards to all listeners.
    fn dispatch(&self, report: Report) {
        let waiting = {
            let mut pending = lock(&self.pending);
            pending
                .iter()
                .position(|elem| report.answers(&elem.request))
                .and_then(|pos| pending.remove(pos))
        };

        let matched = match waiting {
            Some(waiting) => {
                // The caller may have timed out in the meantime.
                let _ = waiting.sender.send(report);
                true
            },
            None => false,
        };

        for listener in lock(&self.listeners).values() {
            listener(report, matched);
        }
    }

    /// Marks the channel as closed and fails all pending requests.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.pending).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Represents a HID communication channel supporting HID++.
pub struct HidppChannel {
    /// Whether the channel supports short (7 bytes) HID++ messages.
    pub supports_short: bool,

    /// Whether the channel supports long (20 bytes) HID++ messages.
    pub supports_long: bool,

    /// The USB vendor ID of the underlying device.
    pub vendor_id: u16,

    /// The USB product ID of the underlying device.
    pub product_id: u16,

    /// The underlying raw HID channel.
    raw_channel: Arc<dyn RawHidChannel>,

    /// The state shared with the read thread.
    shared: Arc<Shared>,

    /// The software ID included in sent requests.
    sw_id: AtomicU8,

    /// Whether to rotate [`Self::sw_id`] after every request.
    rotating_sw_id: AtomicBool,

    /// The response timeout in milliseconds.
    timeout_ms: AtomicU64,

    next_pending_id: AtomicU64,
    next_listener_hdl: AtomicU32,

    /// The sender signaling the read thread to stop.
    read_thread_close: Option<oneshot::Sender<()>>,

    /// The handle to the read thread. Should be joined after signaling
    /// [`Self::read_thread_close`].
    read_thread_hdl: Option<JoinHandle<()>>,
}

impl Drop for HidppChannel {
    fn drop(&mut self) {
        if let Some(read_thread_close) = self.read_thread_close.take() {
            // This only fails if the read thread already stopped on its own.
            let _ = read_thread_close.send(());
        }

        if let Some(read_thread_hdl) = self.read_thread_hdl.take() {
            let _ = read_thread_hdl.join();
        }
    }
}

impl HidppChannel {
    /// Tries to construct a HID++ channel from a raw HID channel.
    ///
    /// If the given HID channel does not support HID++,
    /// [`ChannelError::HidppNotSupported`] will be returned.
    pub async fn from_raw_channel(raw: impl RawHidChannel) -> Result<Self, ChannelError> {
        let (supports_short, supports_long) = supports_short_long_hidpp(&raw).await?;

        if !supports_short && !supports_long {
            return Err(ChannelError::HidppNotSupported);
        }

        let vendor_id = raw.vendor_id();
        let product_id = raw.product_id();
        let raw_channel: Arc<dyn RawHidChannel> = Arc::new(raw);
        let shared = Arc::new(Shared {
            pending: Mutex::new(VecDeque::new()),
            listeners: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let (close_sender, mut close_receiver) = oneshot::channel::<()>();

        let read_thread_hdl = thread::spawn({
            let raw_channel = Arc::clone(&raw_channel);
            let shared = Arc::clone(&shared);

            move || {
                futures::executor::block_on(async {
                    let mut buf = [0u8; READ_BUFFER_LENGTH];

                    loop {
                        let res = select! {
                            _ = close_receiver => {
                                break;
                            },
                            res = raw_channel.read_report(&mut buf).fuse() => res
                        };

                        let len = match res {
                            Ok(len) => len,
                            Err(err) => {
                                warn!(
                                    error = %err,
                                    "reading from the HID channel failed, closing it"
                                );
                                shared.close();
                                break;
                            },
                        };

                        match Report::decode(&buf[..len]) {
                            Ok(report) => {
                                trace!(?report, "HID++ RX");
                                shared.dispatch(report);
                            },
                            Err(ReportError::InvalidReportId(id)) => {
                                trace!(report_id = id, "ignoring non-HID++ report");
                            },
                            Err(err) => {
                                warn!(error = %err, "dropping malformed HID++ report");
                            },
                        }
                    }
                });
            }
        });

        Ok(Self {
            supports_short,
            supports_long,
            vendor_id,
            product_id,
            raw_channel,
            shared,
            sw_id: AtomicU8::new(DEFAULT_SW_ID),
            rotating_sw_id: AtomicBool::new(false),
            timeout_ms: AtomicU64::new(DEFAULT_TIMEOUT.as_millis() as u64),
            next_pending_id: AtomicU64::new(0),
            next_listener_hdl: AtomicU32::new(0),
            read_thread_close: Some(close_sender),
            read_thread_hdl: Some(read_thread_hdl),
        })
    }

    /// Retrieves the software ID to include in the next request.
    ///
    /// If rotation is enabled via [`Self::set_rotating_sw_id`], every call
    /// yields the next ID in `0x1..=0xf`.
    pub fn get_sw_id(&self) -> U4 {
        if !self.rotating_sw_id.load(Ordering::Relaxed) {
            return U4::from_lo(self.sw_id.load(Ordering::Relaxed));
        }

        let current = self
            .sw_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id >= 0x0f {
                    0x01
                } else {
                    id + 1
                })
            })
            .unwrap_or_else(|id| id);

        U4::from_lo(current)
    }

    /// Sets the software ID to include in requests.
    ///
    /// Software ID `0` is used by devices for notifications, so requests
    /// using it cannot be told apart from events.
    pub fn set_sw_id(&self, sw_id: U4) {
        self.sw_id.store(sw_id.to_lo(), Ordering::Relaxed);
    }

    /// Enables or disables software ID rotation.
    ///
    /// Rotation allows multiple requests with otherwise identical headers to
    /// be in flight at the same time. It starts at a random ID.
    pub fn set_rotating_sw_id(&self, rotating: bool) {
        if rotating {
            self.sw_id
                .store(rand::random_range(0x01..=0x0f), Ordering::Relaxed);
        }
        self.rotating_sw_id.store(rotating, Ordering::Relaxed);
    }

    /// Returns the time to wait for a response.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Sets the time to wait for a response.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    /// Checks whether the read side of the channel failed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Checks whether the channel supports the given report type.
    pub fn supports_type(&self, typ: ReportType) -> bool {
        match typ {
            ReportType::Short => self.supports_short,
            ReportType::Long => self.supports_long,
        }
    }

    /// Registers a listener that is called for every incoming report.
    ///
    /// Listeners are called on the read thread and must neither block nor
    /// register or remove listeners themselves.
    ///
    /// Returns a handle to be passed to [`Self::remove_msg_listener`].
    pub fn add_msg_listener(&self, listener: impl Fn(Report, bool) + Send + Sync + 'static) -> u32 {
        let hdl = self.next_listener_hdl.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.listeners).insert(hdl, Box::new(listener));
        hdl
    }

    /// Removes a listener previously registered via
    /// [`Self::add_msg_listener`].
    pub fn remove_msg_listener(&self, hdl: u32) {
        lock(&self.shared.listeners).remove(&hdl);
    }

    /// Sends a report across the channel and waits for the report answering
    /// it.
    ///
    /// The answer may be an error report; use [`Self::send_v20`] to have
    /// those converted into errors.
    pub async fn send(&self, msg: Report) -> Result<Report, ChannelError> {
        if !self.supports_type(msg.report_type()) {
            return Err(ChannelError::MessageTypeNotSupported);
        }

        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let (sender, receiver) = oneshot::channel::<Report>();
        let id = self.next_pending_id.fetch_add(1, Ordering::Relaxed);

        lock(&self.shared.pending).push_back(PendingMessage {
            id,
            request: msg,
            sender,
        });

        if let Err(err) = self.send_and_forget(msg).await {
            self.remove_pending(id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout(), receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ChannelError::Closed),
            Err(_) => {
                self.remove_pending(id);
                debug!(request = ?msg, "HID++ request timed out");
                Err(ChannelError::Timeout)
            },
        }
    }

    /// Sends a HID++2.0 request and waits for its response.
    ///
    /// Error reports answering the request are converted into
    /// [`Hidpp20Error::Feature`] or [`Hidpp20Error::Hidpp10`].
    pub async fn send_v20(&self, msg: Report) -> Result<Report, Hidpp20Error> {
        let response = self.send(msg).await?;

        if let Some(err) = response.error20() {
            debug!(request = ?msg, error_code = err.error_code, "HID++2.0 error response");
            return Err(Hidpp20Error::Feature(err));
        }

        if let Some((_, _, code)) = response.error10() {
            debug!(request = ?msg, error_code = code, "HID++1.0 error response");
            return Err(Hidpp20Error::Hidpp10(code));
        }

        Ok(response)
    }

    /// Sends a report across the channel and does not wait for a response.
    ///
    /// If a response is expected, use [`Self::send`],
    pub async fn send_and_forget(&self, msg: Report) -> Result<(), ChannelError> {
        if !self.supports_type(msg.report_type()) {
            return Err(ChannelError::MessageTypeNotSupported);
        }

        trace!(report = ?msg, "HID++ TX");
        self.raw_channel
            .write_report(msg.as_bytes())
            .await
            .map(|_| ())
            .map_err(ChannelError::Implementation)
    }

    fn remove_pending(&self, id: u64) {
        lock(&self.shared.pending).retain(|elem| elem.id != id);
    }
}

/// Represents an error that occurred when creating or interacting with a HID or
/// HID++ communication channel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// Indicates that the concrete implementation of [`RawHidChannel`]
    /// returned an error.
    #[error("the HID channel implementation returned an error")]
    Implementation(#[source] Box<dyn Error + Sync + Send>),

    /// Indicates that the HID report descriptor could not be parsed.
    #[error("the report descriptor could not be parsed")]
    ReportDescriptor(hidreport::ParserError),

    /// Indicates that the channel in question does not support HID++.
    #[error("the HID channel does not support HID++")]
    HidppNotSupported,

    /// Indicates that the HID++ channel does not support messages of the given
    /// type (short/long).
    #[error("the channel does not support the given HID++ message type")]
    MessageTypeNotSupported,

    /// Indicates that no response arrived in time.
    #[error("the device did not respond in time")]
    Timeout,

    /// Indicates that the channel stopped reading, usually because the
    /// device was disconnected.
    #[error("the HID channel is closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::mock::{MockDevice, MockReply};

    const DPI_FEATURE_ID: u16 = 0x2201;

    async fn channel(mock: &MockDevice) -> HidppChannel {
        HidppChannel::from_raw_channel(mock.clone()).await.unwrap()
    }

    fn request(feature_index: u8, function: u8, sw_id: u8, params: &[u8]) -> Report {
        Report::with_params(
            ReportType::Long,
            0x01,
            feature_index,
            U4::from_lo(function),
            U4::from_lo(sw_id),
            params,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn send_returns_matching_response() {
        let mock = MockDevice::new(0x01).with_feature(DPI_FEATURE_ID, |_, params| {
            MockReply::Ok(vec![params[0], 0x03, 0x20])
        });
        let chan = channel(&mock).await;
        let index = mock.feature_index(DPI_FEATURE_ID).unwrap();

        let response = chan.send_v20(request(index, 2, 1, &[0x00])).await.unwrap();
        assert_eq!(response.feature_index(), index);
        assert_eq!(response.function_id(), U4::from_lo(2));
        assert_eq!(&response.params()[..3], &[0x00, 0x03, 0x20]);
    }

    #[tokio::test]
    async fn error_reports_become_feature_errors() {
        let mock = MockDevice::new(0x01)
            .with_feature(DPI_FEATURE_ID, |_, _| MockReply::Err(0x03));
        let chan = channel(&mock).await;
        let index = mock.feature_index(DPI_FEATURE_ID).unwrap();

        let err = chan
            .send_v20(request(index, 3, 1, &[0x00, 0xff, 0xff]))
            .await
            .unwrap_err();

        assert_eq!(err.device_code(), Some(0x03));
        let Hidpp20Error::Feature(report) = err else {
            panic!("expected a feature error, got {err:?}");
        };
        assert_eq!(report.feature_index, index);
        assert_eq!(report.function_id, U4::from_lo(3));
        assert_eq!(
            report.code(),
            Some(crate::protocol::v20::ErrorCode::OutOfRange)
        );
    }

    #[tokio::test]
    async fn missing_responses_time_out() {
        let mock = MockDevice::new(0x01).with_feature(DPI_FEATURE_ID, |_, _| MockReply::Silent);
        let chan = channel(&mock).await;
        chan.set_timeout(Duration::from_millis(50));
        let index = mock.feature_index(DPI_FEATURE_ID).unwrap();

        let err = chan.send_v20(request(index, 0, 1, &[])).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn concurrent_requests_are_told_apart_by_sw_id() {
        // Answers are held back until both requests were written and then
        // delivered in reverse order.
        let mock = MockDevice::new(0x01)
            .with_feature(DPI_FEATURE_ID, |_, params| MockReply::Ok(vec![params[0]]))
            .hold_replies(2);
        let chan = channel(&mock).await;
        chan.set_rotating_sw_id(true);
        let index = mock.feature_index(DPI_FEATURE_ID).unwrap();

        let first = request(index, 2, chan.get_sw_id().to_lo(), &[0xaa]);
        let second = request(index, 2, chan.get_sw_id().to_lo(), &[0xbb]);
        assert_ne!(first.software_id(), second.software_id());

        let (a, b) = tokio::join!(chan.send_v20(first), chan.send_v20(second));
        assert_eq!(a.unwrap().params()[0], 0xaa);
        assert_eq!(b.unwrap().params()[0], 0xbb);
    }

    #[tokio::test]
    async fn unsolicited_reports_reach_listeners() {
        let mock = MockDevice::new(0x01).with_feature(0x2150, |_, _| MockReply::Silent);
        let chan = channel(&mock).await;
        let (tx, rx) = flume::unbounded();
        let hdl = chan.add_msg_listener(move |report, matched| {
            let _ = tx.send((report, matched));
        });

        mock.emit_event(0x2150, 0, &[0x00, 0x05]);
        let (report, matched) = rx.recv_async().await.unwrap();
        assert!(!matched);
        assert_eq!(report.software_id(), U4::from_lo(0));
        assert_eq!(report.params()[1], 0x05);

        chan.remove_msg_listener(hdl);
    }

    #[tokio::test]
    async fn malformed_reports_are_dropped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mock = MockDevice::new(0x01);
        let chan = channel(&mock).await;
        chan.add_msg_listener({
            let calls = Arc::clone(&calls);
            move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            }
        });

        mock.inject_raw(&[0x10, 0x01, 0x00, 0x00, 0x00, 0x00]);
        mock.inject_raw(&[0x42, 0x01, 0x02]);
        mock.inject_raw(&[0x10, 0x01, 0x00, 0x10, 0x04, 0x05, 0x00]);

        // The ping answer is only read after the malformed reports.
        let response = chan.send(request(0x00, 1, 1, &[])).await.unwrap();
        assert_eq!(response.function_id(), U4::from_lo(1));
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn sw_id_rotation_skips_zero() {
        let chan = channel(&MockDevice::new(0x01)).await;

        assert_eq!(chan.get_sw_id(), U4::from_lo(DEFAULT_SW_ID));
        assert_eq!(chan.get_sw_id(), U4::from_lo(DEFAULT_SW_ID));

        chan.set_rotating_sw_id(true);
        for _ in 0..40 {
            assert_ne!(chan.get_sw_id().to_lo(), 0);
        }
    }
}
