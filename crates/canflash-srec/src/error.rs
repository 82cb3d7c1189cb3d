//! S-record parse errors

use thiserror::Error;

/// Errors raised while reading an S-record image.
///
/// Every parse variant carries the 1-based source line so the message can be
/// shown to the user verbatim.
#[derive(Debug, Error)]
pub enum SrecError {
    #[error("line {line}: checksum mismatch, expected 0x{expected:02X}, found 0x{actual:02X}")]
    ChecksumMismatch { line: usize, expected: u8, actual: u8 },

    #[error("line {line}: malformed record: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("line {line}: unsupported record type S{kind}")]
    UnsupportedRecordType { line: usize, kind: char },

    #[error("line {line}: duplicate S{kind} record")]
    DuplicateRecord { line: usize, kind: char },

    #[error(
        "line {line}: address 0x{address:08X} is not above the previous record end 0x{previous_end:08X}"
    )]
    NonMonotonicAddress {
        line: usize,
        address: u32,
        previous_end: u32,
    },

    #[error("line {line}: data record at 0x{address:08X} carries no data")]
    EmptyDataRecord { line: usize, address: u32 },

    #[error("line {line}: data record does not directly follow the previous data record on line {previous_line}")]
    NonContiguousLines { line: usize, previous_line: usize },

    #[error("line {line}: missing S{kind} record")]
    MissingRecord { line: usize, kind: char },

    #[error("line {line}: image contains no data records")]
    Empty { line: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for S-record operations
pub type SrecResult<T> = Result<T, SrecError>;
