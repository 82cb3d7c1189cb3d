//! Error types for value conversion

use thiserror::Error;

/// Errors that can occur while converting a single value
#[derive(Debug, Error)]
pub enum ConvError {
    /// Data type name not one of the supported A2L types
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// Conversion method or coefficient set not supported
    #[error("item '{item}': unsupported conversion: {reason}")]
    UnsupportedConversion { item: String, reason: String },

    /// Data too short for the expected type
    #[error("item '{item}': data too short, expected {expected} bytes, got {actual}")]
    DataTooShort {
        item: String,
        expected: usize,
        actual: usize,
    },

    /// Raw value has no entry in the verbal table
    #[error("item '{item}': raw value {raw} not found in value table")]
    TableValueNotFound { item: String, raw: f64 },

    /// Display string has no entry in the verbal table
    #[error("item '{item}': '{label}' not found in value table")]
    TableLabelNotFound { item: String, label: String },

    /// Physical value could not be parsed as a number
    #[error("item '{item}': '{value}' is not a number")]
    InvalidNumber { item: String, value: String },

    /// Physical value outside the item's limits
    #[error("item '{item}': value {value} out of range [{lower}, {upper}]")]
    OutOfRange {
        item: String,
        value: f64,
        lower: f64,
        upper: f64,
    },

    /// Converted raw value does not fit the item's data type
    #[error("item '{item}': raw value {raw} does not fit {data_type}")]
    RawOutOfRange {
        item: String,
        raw: f64,
        data_type: String,
    },

    /// Invalid display format string
    #[error("invalid display format: {0}")]
    InvalidFormat(String),

    /// Item not found in store
    #[error("unknown item: {0}")]
    UnknownItem(String),

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for conversion operations
pub type ConvResult<T> = Result<T, ConvError>;

/// Errors reading or writing the selection history file
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type HistoryResult<T> = Result<T, HistoryError>;
