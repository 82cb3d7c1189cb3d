//! CAN transport contract
//!
//! The CAN driver is an external collaborator. Sessions only need to open and
//! close a channel, send a frame, and wait for the next frame with a timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Maximum classic CAN payload
pub const MAX_FRAME_LEN: usize = 8;

/// A received or transmitted CAN frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub data: Vec<u8>,
    pub timestamp: Instant,
}

impl CanFrame {
    pub fn new(id: u32, data: &[u8]) -> Result<Self, TransportError> {
        if data.len() > MAX_FRAME_LEN {
            return Err(TransportError::InvalidFrame(format!(
                "{} bytes exceed CAN payload of {}",
                data.len(),
                MAX_FRAME_LEN
            )));
        }
        Ok(Self {
            id,
            data: data.to_vec(),
            timestamp: Instant::now(),
        })
    }
}

/// Frame-level access to a CAN channel
#[async_trait]
pub trait CanTransport: Send + Sync {
    /// Initialize the channel
    fn open(&self, channel: &str, bitrate: u32) -> Result<(), TransportError>;

    /// Release the channel
    fn close(&self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Queue one frame with up to 8 data bytes
    async fn send_frame(&self, id: u32, data: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next frame from any ID
    async fn recv_frame(&self, timeout: Duration) -> Result<CanFrame, TransportError>;

    /// Human-readable text for a driver status code
    fn error_text(&self, code: i32) -> String;
}

/// Scoped device acquisition: the channel is closed when the guard drops,
/// on success and failure paths alike.
pub struct DeviceGuard {
    transport: Arc<dyn CanTransport>,
    closed: bool,
}

impl DeviceGuard {
    pub fn open(
        transport: Arc<dyn CanTransport>,
        channel: &str,
        bitrate: u32,
    ) -> Result<Self, TransportError> {
        transport.open(channel, bitrate)?;
        debug!(channel, bitrate, "CAN device opened");
        Ok(Self {
            transport,
            closed: false,
        })
    }

    pub fn transport(&self) -> &Arc<dyn CanTransport> {
        &self.transport
    }

    /// Close explicitly and report the result
    pub fn close(mut self) -> Result<(), TransportError> {
        self.closed = true;
        self.transport.close()
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.transport.close() {
                warn!(error = %e, "Failed to close CAN device");
            }
        }
    }
}

/// Receive frames until one with `id` arrives or `timeout` elapses.
///
/// Frames with other IDs are discarded.
pub async fn recv_from(
    transport: &dyn CanTransport,
    id: u32,
    timeout: Duration,
) -> Result<CanFrame, TransportError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::Timeout(timeout));
        }
        let frame = match transport.recv_frame(remaining).await {
            Ok(frame) => frame,
            Err(TransportError::Timeout(_)) => return Err(TransportError::Timeout(timeout)),
            Err(e) => return Err(e),
        };
        if frame.id == id {
            return Ok(frame);
        }
        debug!(
            id = format!("0x{:X}", frame.id),
            expected = format!("0x{:X}", id),
            "Ignoring frame"
        );
    }
}
