//! Implements functionality specific to HID++2.0.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::{
    channel::ChannelError,
    report::{FeatureErrorReport, ReportError},
};

/// Represents the error codes a HID++2.0 device may report in an error
/// report.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorCode {
    /// No error.
    NoError = 0x00,

    /// The error is not further specified.
    Unknown = 0x01,

    /// A parameter of the request is invalid.
    InvalidArgument = 0x02,

    /// A parameter of the request is out of the supported range.
    OutOfRange = 0x03,

    /// The hardware failed to process the request.
    HardwareError = 0x04,

    /// Reserved for Logitech-internal use.
    LogitechInternal = 0x05,

    /// The feature index of the request is unknown to the device.
    InvalidFeatureIndex = 0x06,

    /// The function ID of the request is unknown to the feature.
    InvalidFunctionId = 0x07,

    /// The device is busy and cannot process the request right now.
    Busy = 0x08,

    /// The request is not supported by the device.
    Unsupported = 0x09,
}

impl FeatureErrorReport {
    /// Maps the raw error code to a known [`ErrorCode`].
    pub fn code(&self) -> Option<ErrorCode> {
        ErrorCode::try_from(self.error_code).ok()
    }
}

/// Represents an error that occurred when calling a HID++2.0 feature
/// function.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Hidpp20Error {
    /// Indicates that the underlying channel failed, including timeouts.
    #[error("the HID++ channel returned an error")]
    Channel(#[from] ChannelError),

    /// Indicates that the request could not be built.
    #[error("the request could not be built")]
    Report(#[from] ReportError),

    /// Indicates that the device answered the request with an error report.
    #[error("the device reported error code {:#04x}", .0.error_code)]
    Feature(FeatureErrorReport),

    /// Indicates that the device answered with a HID++1.0 error, meaning it
    /// does not speak HID++2.0.
    #[error("the device answered with HID++1.0 error code {0:#04x}")]
    Hidpp10(u8),

    /// Indicates that the device responded with data this implementation does
    /// not understand.
    #[error("the device returned an unsupported response")]
    UnsupportedResponse,
}

impl Hidpp20Error {
    /// Returns the error code reported by the device, if the device reported
    /// one.
    pub fn device_code(&self) -> Option<u8> {
        match self {
            Self::Feature(report) => Some(report.error_code),
            Self::Hidpp10(code) => Some(*code),
            _ => None,
        }
    }

    /// Checks whether the error was caused by a missing response.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Channel(ChannelError::Timeout))
    }
}
