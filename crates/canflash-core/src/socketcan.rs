//! SocketCAN transport (Linux raw CAN sockets)
//!
//! The bitrate is a property of the network interface on Linux and is
//! configured with `ip link`; `open` only logs the requested value.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use socketcan::{
    CanFrame as RawFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId,
};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::transport::{CanFrame, CanTransport, MAX_FRAME_LEN};

#[derive(Default)]
pub struct SocketCanTransport {
    socket: Arc<Mutex<Option<CanSocket>>>,
}

impl SocketCanTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_frame(id: u32, data: &[u8]) -> Result<RawFrame, TransportError> {
        if data.len() > MAX_FRAME_LEN {
            return Err(TransportError::InvalidFrame(format!(
                "{} bytes exceed CAN payload of {}",
                data.len(),
                MAX_FRAME_LEN
            )));
        }
        let frame = if id <= 0x7FF {
            let std_id = StandardId::new(id as u16).ok_or_else(|| {
                TransportError::InvalidFrame(format!("Invalid standard CAN ID: 0x{:X}", id))
            })?;
            RawFrame::new(std_id, data)
        } else {
            let ext_id = ExtendedId::new(id).ok_or_else(|| {
                TransportError::InvalidFrame(format!("Invalid extended CAN ID: 0x{:X}", id))
            })?;
            RawFrame::new(ext_id, data)
        };
        frame.ok_or_else(|| TransportError::InvalidFrame(format!("Cannot build frame 0x{:X}", id)))
    }
}

#[async_trait]
impl CanTransport for SocketCanTransport {
    fn open(&self, channel: &str, bitrate: u32) -> Result<(), TransportError> {
        let socket = CanSocket::open(channel).map_err(|e| TransportError::OpenFailed {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::OpenFailed {
                channel: channel.to_string(),
                reason: format!("Failed to set non-blocking: {}", e),
            })?;

        // Drain stale frames from a previous run
        while let Ok(frame) = socket.read_frame() {
            debug!(id = format!("0x{:X}", frame.raw_id()), "Drained stale frame");
        }

        info!(channel, bitrate, "SocketCAN channel opened");
        *self.socket.lock() = Some(socket);
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.socket.lock().take().is_some() {
            debug!("SocketCAN channel closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.socket.lock().is_some()
    }

    async fn send_frame(&self, id: u32, data: &[u8]) -> Result<(), TransportError> {
        let frame = Self::build_frame(id, data)?;
        let guard = self.socket.lock();
        let socket = guard.as_ref().ok_or(TransportError::NotOpen)?;
        socket
            .write_frame(&frame)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv_frame(&self, timeout: Duration) -> Result<CanFrame, TransportError> {
        let socket = self.socket.clone();
        tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + timeout;
            loop {
                {
                    let guard = socket.lock();
                    let socket = guard.as_ref().ok_or(TransportError::NotOpen)?;
                    match socket.read_frame() {
                        Ok(RawFrame::Data(frame)) => {
                            return Ok(CanFrame {
                                id: frame.raw_id(),
                                data: frame.data().to_vec(),
                                timestamp: Instant::now(),
                            });
                        }
                        Ok(_) => {
                            // remote and error frames are not part of either protocol
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
                    }
                }
                if Instant::now() >= deadline {
                    return Err(TransportError::Timeout(timeout));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        })
        .await
        .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?
    }

    fn error_text(&self, code: i32) -> String {
        std::io::Error::from_raw_os_error(code).to_string()
    }
}
