//! UDS negative response codes (ISO 14229-1 Annex A)

use std::fmt;

/// Negative response codes the flashing sequence reacts to.
///
/// Every other code is carried as [`NegativeResponseCode::Other`]; its
/// text still comes from the full Annex A table in [`describe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeResponseCode {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLengthOrFormat,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestSequenceError,
    RequestOutOfRange,
    SecurityAccessDenied,
    InvalidKey,
    ExceededNumberOfAttempts,
    RequiredTimeDelayNotExpired,
    UploadDownloadNotAccepted,
    TransferDataSuspended,
    GeneralProgrammingFailure,
    WrongBlockSequenceCounter,
    ResponsePending,
    SubFunctionNotSupportedInActiveSession,
    ServiceNotSupportedInActiveSession,
    Other(u8),
}

impl NegativeResponseCode {
    pub fn code(self) -> u8 {
        match self {
            Self::GeneralReject => 0x10,
            Self::ServiceNotSupported => 0x11,
            Self::SubFunctionNotSupported => 0x12,
            Self::IncorrectMessageLengthOrFormat => 0x13,
            Self::BusyRepeatRequest => 0x21,
            Self::ConditionsNotCorrect => 0x22,
            Self::RequestSequenceError => 0x24,
            Self::RequestOutOfRange => 0x31,
            Self::SecurityAccessDenied => 0x33,
            Self::InvalidKey => 0x35,
            Self::ExceededNumberOfAttempts => 0x36,
            Self::RequiredTimeDelayNotExpired => 0x37,
            Self::UploadDownloadNotAccepted => 0x70,
            Self::TransferDataSuspended => 0x71,
            Self::GeneralProgrammingFailure => 0x72,
            Self::WrongBlockSequenceCounter => 0x73,
            Self::ResponsePending => 0x78,
            Self::SubFunctionNotSupportedInActiveSession => 0x7E,
            Self::ServiceNotSupportedInActiveSession => 0x7F,
            Self::Other(code) => code,
        }
    }

    /// Human-readable Annex A text
    pub fn description(self) -> &'static str {
        describe(self.code())
    }
}

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupported,
            0x13 => Self::IncorrectMessageLengthOrFormat,
            0x21 => Self::BusyRepeatRequest,
            0x22 => Self::ConditionsNotCorrect,
            0x24 => Self::RequestSequenceError,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x35 => Self::InvalidKey,
            0x36 => Self::ExceededNumberOfAttempts,
            0x37 => Self::RequiredTimeDelayNotExpired,
            0x70 => Self::UploadDownloadNotAccepted,
            0x71 => Self::TransferDataSuspended,
            0x72 => Self::GeneralProgrammingFailure,
            0x73 => Self::WrongBlockSequenceCounter,
            0x78 => Self::ResponsePending,
            0x7E => Self::SubFunctionNotSupportedInActiveSession,
            0x7F => Self::ServiceNotSupportedInActiveSession,
            other => Self::Other(other),
        }
    }
}

impl From<NegativeResponseCode> for u8 {
    fn from(nrc: NegativeResponseCode) -> Self {
        nrc.code()
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.code())
    }
}

/// Annex A text for any NRC byte
pub fn describe(code: u8) -> &'static str {
    match code {
        0x00 => "positive response",
        0x10 => "general reject",
        0x11 => "service not supported",
        0x12 => "sub-function not supported",
        0x13 => "incorrect message length or invalid format",
        0x14 => "response too long",
        0x21 => "busy, repeat request",
        0x22 => "conditions not correct",
        0x24 => "request sequence error",
        0x25 => "no response from sub-net component",
        0x26 => "failure prevents execution of requested action",
        0x31 => "request out of range",
        0x33 => "security access denied",
        0x34 => "authentication required",
        0x35 => "invalid key",
        0x36 => "exceeded number of attempts",
        0x37 => "required time delay not expired",
        0x38..=0x4F => "reserved by extended data link security",
        0x70 => "upload/download not accepted",
        0x71 => "transfer data suspended",
        0x72 => "general programming failure",
        0x73 => "wrong block sequence counter",
        0x78 => "request correctly received, response pending",
        0x7E => "sub-function not supported in active session",
        0x7F => "service not supported in active session",
        0x81 => "rpm too high",
        0x82 => "rpm too low",
        0x83 => "engine is running",
        0x84 => "engine is not running",
        0x85 => "engine run time too low",
        0x86 => "temperature too high",
        0x87 => "temperature too low",
        0x88 => "vehicle speed too high",
        0x89 => "vehicle speed too low",
        0x8A => "throttle/pedal too high",
        0x8B => "throttle/pedal too low",
        0x8C => "transmission range not in neutral",
        0x8D => "transmission range not in gear",
        0x8F => "brake switch(es) not closed",
        0x90 => "shifter lever not in park",
        0x91 => "torque converter clutch locked",
        0x92 => "voltage too high",
        0x93 => "voltage too low",
        0x94..=0xEF => "reserved for specific conditions not correct",
        0xF0..=0xFE => "vehicle manufacturer specific conditions not correct",
        _ => "ISO SAE reserved",
    }
}

impl fmt::UpperHex for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.code(), f)
    }
}
