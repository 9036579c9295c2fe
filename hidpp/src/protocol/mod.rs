//! Protocol generations and their error handling.

pub mod v20;

/// The protocol generation a device answered a root ping with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ProtocolVersion {
    /// HID++1.0, answering pings with an error report. Only receivers still
    /// speak it.
    V10,

    /// HID++2.0 and later.
    ///
    /// The two bytes once were major and minor version numbers and now only
    /// hint at which host software the device targets.
    V20 {
        /// `2` targets SetPoint, `3` and `4` defer to `target_sw`.
        protocol_num: u8,

        /// Zero unless `protocol_num` is at least `3`.
        target_sw: u8,
    },
}
