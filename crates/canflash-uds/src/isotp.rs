//! ISO 15765-2 (ISO-TP) segmentation over a frame-level CAN transport
//!
//! Classic CAN with normal addressing: single frames carry up to 7 bytes,
//! longer messages go out as a first frame plus consecutive frames paced by
//! the receiver's flow control.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use canflash_core::{recv_from, CanTransport, DeviceConfig, TransportError, MAX_FRAME_LEN};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::config::IsoTpConfig;
use crate::link::{AddressRole, CanMapping, DiagTransport};

/// Largest message a 12-bit first-frame length can announce
pub const MAX_MESSAGE_LEN: usize = 4095;

const MAX_SINGLE_FRAME: usize = 7;
const FIRST_FRAME_PAYLOAD: usize = 6;
const CONSECUTIVE_PAYLOAD: usize = 7;
/// Flow-control WAIT frames accepted in a row before giving up
const MAX_WAIT_FRAMES: usize = 10;

mod pci {
    pub const SINGLE: u8 = 0x00;
    pub const FIRST: u8 = 0x10;
    pub const CONSECUTIVE: u8 = 0x20;
    pub const FLOW_CONTROL: u8 = 0x30;

    pub const FC_CONTINUE: u8 = 0x00;
    pub const FC_WAIT: u8 = 0x01;
    pub const FC_OVERFLOW: u8 = 0x02;
}

/// Decode an STmin byte into a delay
pub fn st_min_duration(raw: u8) -> Duration {
    match raw {
        0x00..=0x7F => Duration::from_millis(raw as u64),
        0xF1..=0xF9 => Duration::from_micros((raw - 0xF0) as u64 * 100),
        // reserved values are treated as the largest millisecond value
        _ => Duration::from_millis(0x7F),
    }
}

/// ISO-TP link on top of a [`CanTransport`]
pub struct IsoTpTransport {
    can: Arc<dyn CanTransport>,
    device: DeviceConfig,
    config: IsoTpConfig,
    mappings: RwLock<HashMap<AddressRole, CanMapping>>,
}

impl IsoTpTransport {
    pub fn new(can: Arc<dyn CanTransport>, device: DeviceConfig, config: IsoTpConfig) -> Self {
        Self {
            can,
            device,
            config,
            mappings: RwLock::new(HashMap::new()),
        }
    }

    fn mapping(&self, role: AddressRole) -> Result<CanMapping, TransportError> {
        self.mappings
            .read()
            .get(&role)
            .copied()
            .ok_or_else(|| TransportError::NoMapping(role.to_string()))
    }

    fn response_id(&self, role: AddressRole) -> Result<u32, TransportError> {
        self.mapping(role)?
            .response_id
            .ok_or_else(|| TransportError::NoMapping(format!("{} responses", role)))
    }

    async fn send_padded(&self, id: u32, mut frame: Vec<u8>) -> Result<(), TransportError> {
        frame.resize(MAX_FRAME_LEN, self.config.padding);
        trace!(id = format!("0x{:X}", id), data = %hex::encode_upper(&frame), "ISO-TP tx");
        self.can.send_frame(id, &frame).await
    }

    /// Wait for a CTS flow-control frame; returns (block size, STmin)
    async fn wait_flow_control(&self, rx_id: u32) -> Result<(u8, Duration), TransportError> {
        let mut waits = 0;
        loop {
            let frame = recv_from(self.can.as_ref(), rx_id, self.config.frame_timeout()).await?;
            let first = frame.data.first().copied().unwrap_or(0xFF);
            if first & 0xF0 != pci::FLOW_CONTROL {
                return Err(TransportError::InvalidFrame(format!(
                    "expected flow control, got {}",
                    hex::encode_upper(&frame.data)
                )));
            }
            match first & 0x0F {
                pci::FC_CONTINUE => {
                    let block_size = frame.data.get(1).copied().unwrap_or(0);
                    let st_min = st_min_duration(frame.data.get(2).copied().unwrap_or(0));
                    return Ok((block_size, st_min));
                }
                pci::FC_WAIT => {
                    waits += 1;
                    if waits > MAX_WAIT_FRAMES {
                        return Err(TransportError::Timeout(self.config.frame_timeout()));
                    }
                }
                pci::FC_OVERFLOW => {
                    return Err(TransportError::SendFailed(
                        "receiver reported buffer overflow".to_string(),
                    ))
                }
                other => {
                    return Err(TransportError::InvalidFrame(format!(
                        "invalid flow status {}",
                        other
                    )))
                }
            }
        }
    }

    async fn send_flow_control(&self, tx_id: u32) -> Result<(), TransportError> {
        let frame = vec![
            pci::FLOW_CONTROL | pci::FC_CONTINUE,
            self.config.block_size,
            self.config.st_min,
        ];
        self.send_padded(tx_id, frame).await
    }

    async fn send_segmented(
        &self,
        mapping: CanMapping,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let rx_id = mapping.response_id.ok_or_else(|| {
            TransportError::SendFailed(format!(
                "{} byte message needs flow control; {} addressing has no response ID",
                data.len(),
                mapping.role
            ))
        })?;

        let len = data.len();
        let mut first = vec![pci::FIRST | ((len >> 8) as u8 & 0x0F), (len & 0xFF) as u8];
        first.extend_from_slice(&data[..FIRST_FRAME_PAYLOAD]);
        self.send_padded(mapping.request_id, first).await?;

        let (mut block_size, mut st_min) = self.wait_flow_control(rx_id).await?;
        let mut sent_in_block = 0u8;
        let mut sequence = 1u8;

        let mut chunks = data[FIRST_FRAME_PAYLOAD..].chunks(CONSECUTIVE_PAYLOAD).peekable();
        while let Some(chunk) = chunks.next() {
            let mut frame = vec![pci::CONSECUTIVE | sequence];
            frame.extend_from_slice(chunk);
            self.send_padded(mapping.request_id, frame).await?;
            sequence = (sequence + 1) & 0x0F;

            if chunks.peek().is_none() {
                break;
            }
            if block_size > 0 {
                sent_in_block += 1;
                if sent_in_block == block_size {
                    (block_size, st_min) = self.wait_flow_control(rx_id).await?;
                    sent_in_block = 0;
                    continue;
                }
            }
            if !st_min.is_zero() {
                tokio::time::sleep(st_min).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DiagTransport for IsoTpTransport {
    fn open(&self) -> Result<(), TransportError> {
        self.can.open(&self.device.channel, self.device.bitrate)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.mappings.write().clear();
        self.can.close()
    }

    fn add_mapping(&self, mapping: CanMapping) -> Result<(), TransportError> {
        self.mappings.write().insert(mapping.role, mapping);
        Ok(())
    }

    fn remove_mapping(&self, role: AddressRole) -> Result<(), TransportError> {
        self.mappings
            .write()
            .remove(&role)
            .map(|_| ())
            .ok_or_else(|| TransportError::NoMapping(role.to_string()))
    }

    async fn send(&self, role: AddressRole, request: &[u8]) -> Result<(), TransportError> {
        let mapping = self.mapping(role)?;
        if request.is_empty() || request.len() > MAX_MESSAGE_LEN {
            return Err(TransportError::InvalidFrame(format!(
                "message length {} outside 1..={}",
                request.len(),
                MAX_MESSAGE_LEN
            )));
        }
        debug!(role = %role, request = %hex::encode_upper(request), "UDS tx");

        if request.len() <= MAX_SINGLE_FRAME {
            let mut frame = vec![pci::SINGLE | request.len() as u8];
            frame.extend_from_slice(request);
            self.send_padded(mapping.request_id, frame).await
        } else {
            self.send_segmented(mapping, request).await
        }
    }

    async fn receive(
        &self,
        role: AddressRole,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let rx_id = self.response_id(role)?;
        let tx_id = self.mapping(role)?.request_id;

        let frame = recv_from(self.can.as_ref(), rx_id, timeout).await?;
        let data = frame.data;
        let first = data
            .first()
            .copied()
            .ok_or_else(|| TransportError::InvalidFrame("empty frame".to_string()))?;

        let message = match first & 0xF0 {
            pci::SINGLE => {
                let len = (first & 0x0F) as usize;
                if len == 0 || len > MAX_SINGLE_FRAME || data.len() < 1 + len {
                    return Err(TransportError::InvalidFrame(format!(
                        "bad single frame {}",
                        hex::encode_upper(&data)
                    )));
                }
                data[1..1 + len].to_vec()
            }
            pci::FIRST => {
                if data.len() < MAX_FRAME_LEN {
                    return Err(TransportError::InvalidFrame(format!(
                        "short first frame {}",
                        hex::encode_upper(&data)
                    )));
                }
                let total = (((first & 0x0F) as usize) << 8) | data[1] as usize;
                let mut message = Vec::with_capacity(total);
                message.extend_from_slice(&data[2..MAX_FRAME_LEN]);
                self.send_flow_control(tx_id).await?;

                let mut expected = 1u8;
                let mut received_in_block = 0u8;
                while message.len() < total {
                    let cf = recv_from(self.can.as_ref(), rx_id, self.config.frame_timeout()).await?;
                    let cf_pci = cf.data.first().copied().unwrap_or(0xFF);
                    if cf_pci & 0xF0 != pci::CONSECUTIVE {
                        return Err(TransportError::InvalidFrame(format!(
                            "expected consecutive frame, got {}",
                            hex::encode_upper(&cf.data)
                        )));
                    }
                    if cf_pci & 0x0F != expected {
                        return Err(TransportError::InvalidFrame(format!(
                            "sequence number {} where {} was expected",
                            cf_pci & 0x0F,
                            expected
                        )));
                    }
                    message.extend_from_slice(&cf.data[1..]);
                    expected = (expected + 1) & 0x0F;

                    if self.config.block_size > 0 && message.len() < total {
                        received_in_block += 1;
                        if received_in_block == self.config.block_size {
                            self.send_flow_control(tx_id).await?;
                            received_in_block = 0;
                        }
                    }
                }
                message.truncate(total);
                message
            }
            _ => {
                return Err(TransportError::InvalidFrame(format!(
                    "unexpected frame {}",
                    hex::encode_upper(&data)
                )))
            }
        };

        debug!(role = %role, response = %hex::encode_upper(&message), "UDS rx");
        Ok(message)
    }
}
