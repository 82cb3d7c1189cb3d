//! DAQ scheduling errors

use thiserror::Error;

/// Raised by [`crate::allocate_daq`] before any device I/O happens
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("No measurement items selected")]
    NoItems,

    #[error("Unsupported conversion for DAQ measurement: {}", .items.join(", "))]
    UnsupportedConversion { items: Vec<String> },

    #[error("DAQ list {daq_number} is not available on the device (items: {})", .items.join(", "))]
    UnknownDaqList { daq_number: u8, items: Vec<String> },

    #[error(
        "ODT capacity exceeded on DAQ list(s) {}; items that do not fit: {}",
        .daq_numbers.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", "),
        .items.join(", ")
    )]
    CapacityExceeded { daq_numbers: Vec<u8>, items: Vec<String> },
}

pub type SchedulingResult<T> = Result<T, SchedulingError>;
