//! Implements the fixed-layout binary frame every HID++ transaction consists
//! of.
//!
//! A report is either short (7 bytes) or long (20 bytes) and always starts
//! with the same 4-byte header:
//!
//! | Offset | Content                                          |
//! |--------|--------------------------------------------------|
//! | 0      | report type (`0x10` short, `0x11` long)          |
//! | 1      | device index                                     |
//! | 2      | feature index                                    |
//! | 3      | function ID (high nibble), software ID (low nibble) |
//! | 4..    | parameters                                       |

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::nibble::{self, U4};

/// The report ID of short HID++ reports.
pub const SHORT_REPORT_ID: u8 = 0x10;

/// The total length of a short HID++ report, including the report ID.
pub const SHORT_REPORT_LENGTH: usize = 7;

/// The report ID of long HID++ reports.
pub const LONG_REPORT_ID: u8 = 0x11;

/// The total length of a long HID++ report, including the report ID.
pub const LONG_REPORT_LENGTH: usize = 20;

/// The length of the header every report starts with.
pub const HEADER_LENGTH: usize = 4;

/// The maximum amount of parameter bytes a report can carry.
pub const MAX_PARAMS_LENGTH: usize = LONG_REPORT_LENGTH - HEADER_LENGTH;

/// The feature index HID++2.0 devices use to signal an error.
const HIDPP20_ERROR_FEATURE_INDEX: u8 = 0xff;

/// The sub ID HID++1.0 devices use to signal an error.
const HIDPP10_ERROR_SUB_ID: u8 = 0x8f;

/// Represents the type (and thereby the length) of a report.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ReportType {
    /// A report carrying 3 bytes of parameters.
    Short = 0x10,

    /// A report carrying 16 bytes of parameters.
    Long = 0x11,
}

impl ReportType {
    /// The total length mandated for reports of this type.
    pub const fn length(self) -> usize {
        match self {
            Self::Short => SHORT_REPORT_LENGTH,
            Self::Long => LONG_REPORT_LENGTH,
        }
    }

    /// The amount of parameter bytes reports of this type carry.
    pub const fn params_capacity(self) -> usize {
        self.length() - HEADER_LENGTH
    }
}

/// Represents a single HID++ report.
///
/// The report is stored in a buffer large enough for a long report; only the
/// first [`ReportType::length`] bytes are meaningful.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Report {
    typ: ReportType,
    data: [u8; LONG_REPORT_LENGTH],
}

impl Report {
    /// Creates a report with the given header and all parameters set to
    /// zero.
    pub fn new(
        typ: ReportType,
        device_index: u8,
        feature_index: u8,
        function_id: U4,
        software_id: U4,
    ) -> Self {
        let mut data = [0u8; LONG_REPORT_LENGTH];
        data[0] = typ.into();
        data[1] = device_index;
        data[2] = feature_index;
        data[3] = nibble::combine(function_id, software_id);

        Self { typ, data }
    }

    /// Creates a report with the given header and parameters.
    ///
    /// Fails if `params` does not fit into the report type.
    pub fn with_params(
        typ: ReportType,
        device_index: u8,
        feature_index: u8,
        function_id: U4,
        software_id: U4,
        params: &[u8],
    ) -> Result<Self, ReportError> {
        let mut report = Self::new(typ, device_index, feature_index, function_id, software_id);
        report.set_params(params)?;
        Ok(report)
    }

    /// Decodes a report from its raw byte form.
    ///
    /// The first byte has to be a known report ID and the total length has
    /// to match the length mandated by it exactly.
    pub fn decode(raw: &[u8]) -> Result<Self, ReportError> {
        let Some(&id) = raw.first() else {
            return Err(ReportError::InvalidReportLength {
                expected: SHORT_REPORT_LENGTH,
                actual: 0,
            });
        };

        let typ = ReportType::try_from(id).map_err(|_| ReportError::InvalidReportId(id))?;
        if raw.len() != typ.length() {
            return Err(ReportError::InvalidReportLength {
                expected: typ.length(),
                actual: raw.len(),
            });
        }

        let mut data = [0u8; LONG_REPORT_LENGTH];
        data[..raw.len()].copy_from_slice(raw);

        Ok(Self { typ, data })
    }

    /// Returns the raw byte form of the report.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.typ.length()]
    }

    /// Returns the type of the report.
    pub fn report_type(&self) -> ReportType {
        self.typ
    }

    /// Changes the type (and thereby the length) of the report.
    ///
    /// Converting a long report to a short one fails if any of the discarded
    /// parameter bytes is non-zero.
    pub fn set_report_type(&mut self, typ: ReportType) -> Result<(), ReportError> {
        let end = self.typ.length();
        if typ.length() < end && self.data[typ.length()..end].iter().any(|&b| b != 0) {
            return Err(ReportError::ParamsTooLong {
                capacity: typ.params_capacity(),
                len: self.params_used(),
            });
        }

        // Bytes past the new end are kept zeroed so growing again yields
        // zero parameters.
        if typ.length() < end {
            self.data[typ.length()..].fill(0);
        }

        self.typ = typ;
        self.data[0] = typ.into();
        Ok(())
    }

    pub fn device_index(&self) -> u8 {
        self.data[1]
    }

    pub fn set_device_index(&mut self, device_index: u8) {
        self.data[1] = device_index;
    }

    pub fn feature_index(&self) -> u8 {
        self.data[2]
    }

    pub fn set_feature_index(&mut self, feature_index: u8) {
        self.data[2] = feature_index;
    }

    pub fn function_id(&self) -> U4 {
        U4::from_hi(self.data[3])
    }

    pub fn set_function_id(&mut self, function_id: U4) {
        self.data[3] = nibble::combine(function_id, self.software_id());
    }

    pub fn software_id(&self) -> U4 {
        U4::from_lo(self.data[3])
    }

    pub fn set_software_id(&mut self, software_id: U4) {
        self.data[3] = nibble::combine(self.function_id(), software_id);
    }

    /// Returns the parameters of the report.
    pub fn params(&self) -> &[u8] {
        &self.data[HEADER_LENGTH..self.typ.length()]
    }

    /// Returns the parameters of the report mutably.
    pub fn params_mut(&mut self) -> &mut [u8] {
        let end = self.typ.length();
        &mut self.data[HEADER_LENGTH..end]
    }

    /// Replaces the parameters of the report.
    ///
    /// Slices shorter than the capacity of the report type are padded with
    /// zeroes. Longer slices are rejected and leave the report untouched.
    pub fn set_params(&mut self, params: &[u8]) -> Result<(), ReportError> {
        let capacity = self.typ.params_capacity();
        if params.len() > capacity {
            return Err(ReportError::ParamsTooLong {
                capacity,
                len: params.len(),
            });
        }

        let dst = self.params_mut();
        dst.fill(0);
        dst[..params.len()].copy_from_slice(params);
        Ok(())
    }

    /// Extracts the parameters and fits them into an array capable of
    /// containing the longest possible parameter list, filling the rest up
    /// with zeroes.
    pub fn extend_params(&self) -> [u8; MAX_PARAMS_LENGTH] {
        let mut params = [0u8; MAX_PARAMS_LENGTH];
        params[..self.typ.params_capacity()].copy_from_slice(self.params());
        params
    }

    /// Interprets the report as a HID++2.0 error report.
    ///
    /// Returns [`None`] if the report does not signal an error.
    pub fn error20(&self) -> Option<FeatureErrorReport> {
        if self.feature_index() != HIDPP20_ERROR_FEATURE_INDEX {
            return None;
        }

        // The failed request's feature index takes the place of the
        // function/software ID byte, shifting its header by one byte.
        let params = self.params();
        let (function_id, software_id) = nibble::split(params[0]);

        Some(FeatureErrorReport {
            feature_index: self.data[3],
            function_id,
            software_id,
            error_code: params[1],
        })
    }

    /// Interprets the report as a HID++1.0 error report, which is what a
    /// HID++1.0-only device answers HID++2.0 requests with.
    ///
    /// Returns `(sub_id, address, error_code)`, or [`None`] if the report
    /// does not signal an error.
    pub fn error10(&self) -> Option<(u8, u8, u8)> {
        if self.feature_index() != HIDPP10_ERROR_SUB_ID {
            return None;
        }

        let params = self.params();
        Some((self.data[3], params[0], params[1]))
    }

    /// Checks whether this report answers `request`, either as a regular
    /// response or as an error report referring to it.
    pub fn answers(&self, request: &Report) -> bool {
        if self.device_index() != request.device_index() {
            return false;
        }

        if self.feature_index() == request.feature_index() && self.data[3] == request.data[3] {
            return true;
        }

        if let Some(err) = self.error20() {
            return err.feature_index == request.feature_index()
                && err.function_id == request.function_id()
                && err.software_id == request.software_id();
        }

        if let Some((sub_id, address, _)) = self.error10() {
            return sub_id == request.feature_index() && address == request.data[3];
        }

        false
    }

    /// The amount of parameter bytes up to and including the last non-zero
    /// one.
    fn params_used(&self) -> usize {
        self.params()
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |pos| pos + 1)
    }
}

impl std::fmt::Debug for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Report")
            .field("type", &self.typ)
            .field("device_index", &self.device_index())
            .field("feature_index", &self.feature_index())
            .field("function_id", &self.function_id())
            .field("software_id", &self.software_id())
            .field("params", &format_args!("{:02x?}", self.params()))
            .finish()
    }
}

impl TryFrom<&[u8]> for Report {
    type Error = ReportError;

    fn try_from(raw: &[u8]) -> Result<Self, Self::Error> {
        Self::decode(raw)
    }
}

/// Represents the content of a HID++2.0 error report.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureErrorReport {
    /// The feature index of the failed request.
    pub feature_index: u8,

    /// The function ID of the failed request.
    pub function_id: U4,

    /// The software ID of the failed request.
    pub software_id: U4,

    /// The raw error code reported by the device.
    pub error_code: u8,
}

/// Represents an error that occurred when decoding or modifying a report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ReportError {
    /// Indicates that the first byte is no known HID++ report ID.
    #[error("{0:#04x} is no valid HID++ report ID")]
    InvalidReportId(u8),

    /// Indicates that the length of a raw report does not match the length
    /// mandated by its report ID.
    #[error("invalid report length {actual}, expected {expected}")]
    InvalidReportLength { expected: usize, actual: usize },

    /// Indicates that parameters do not fit into the report.
    #[error("{len} parameter bytes exceed the report capacity of {capacity}")]
    ParamsTooLong { capacity: usize, len: usize },
}
