//! Error types shared by the transport and both protocol sessions

use std::time::Duration;

use canflash_conv::ConvError;
use thiserror::Error;

/// Errors raised by a CAN transport
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("Failed to open channel {channel}: {reason}")]
    OpenFailed { channel: String, reason: String },

    #[error("Device not open")]
    NotOpen,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("No frame received within {0:?}")]
    Timeout(Duration),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),

    #[error("No CAN-ID mapping installed for {0}")]
    NoMapping(String),
}

/// Errors from a seed/key algorithm
#[derive(Debug, Error, Clone)]
pub enum SeedKeyError {
    #[error("seed is empty")]
    EmptySeed,

    #[error("invalid secret: {0}")]
    InvalidSecret(String),

    #[error("key computation failed: {0}")]
    Failed(String),
}

/// Errors raised by a CCP or UDS protocol session
///
/// All of these abort the current connect or flashing operation.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Timeout after {timeout:?} waiting for response to {operation}")]
    Timeout { operation: String, timeout: Duration },

    #[error("No connection acknowledge within {0:?}")]
    ConnectTimeout(Duration),

    #[error("{service} rejected: {description} (0x{code:02X})")]
    NegativeResponse {
        service: String,
        code: u8,
        description: String,
    },

    #[error("Unexpected response to {operation}: {}", hex::encode_upper(.actual))]
    UnexpectedResponse { operation: String, actual: Vec<u8> },

    #[error(
        "Verification failed for segment {segment}: device checksum 0x{device:04X}, local checksum 0x{local:04X}"
    )]
    VerificationFailed { segment: usize, device: u32, local: u32 },

    #[error("Routine {name} (0x{routine:04X}) reported status 0x{status:02X}")]
    RoutineFailed {
        name: String,
        routine: u16,
        status: u8,
    },

    #[error("Security access failed: {0}")]
    SecurityAccess(String),

    #[error("{operation} not allowed in state {state}")]
    InvalidState { operation: String, state: String },

    #[error("EPK mismatch: device '{device}', expected '{expected}'")]
    EpkMismatch { device: String, expected: String },

    #[error("Seed/key error: {0}")]
    SeedKey(#[from] SeedKeyError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConvError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProtocolError {
    pub fn unexpected(operation: impl Into<String>, actual: &[u8]) -> Self {
        ProtocolError::UnexpectedResponse {
            operation: operation.into(),
            actual: actual.to_vec(),
        }
    }

    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Debug) -> Self {
        ProtocolError::InvalidState {
            operation: operation.into(),
            state: format!("{:?}", state),
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
