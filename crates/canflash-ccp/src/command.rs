//! CCP 2.1 command codes, return codes and message layout
//!
//! Every command (CRO) and reply (DTO) is one 8-byte CAN frame:
//!
//! ```text
//! CRO: [CMD] [CTR] [parameters, 6 bytes]
//! CRM: [0xFF] [ERR] [CTR] [data, 5 bytes]
//! ```

use canflash_core::{ProtocolError, ProtocolResult};

/// Command codes
pub mod code {
    pub const CONNECT: u8 = 0x01;
    pub const SET_MTA: u8 = 0x02;
    pub const DNLOAD: u8 = 0x03;
    pub const UPLOAD: u8 = 0x04;
    pub const START_STOP: u8 = 0x06;
    pub const DISCONNECT: u8 = 0x07;
    pub const START_STOP_ALL: u8 = 0x08;
    pub const SET_S_STATUS: u8 = 0x0C;
    pub const BUILD_CHKSUM: u8 = 0x0E;
    pub const CLEAR_MEMORY: u8 = 0x10;
    pub const GET_SEED: u8 = 0x12;
    pub const UNLOCK: u8 = 0x13;
    pub const GET_DAQ_SIZE: u8 = 0x14;
    pub const SET_DAQ_PTR: u8 = 0x15;
    pub const WRITE_DAQ: u8 = 0x16;
    pub const EXCHANGE_ID: u8 = 0x17;
    pub const PROGRAM: u8 = 0x18;
    pub const GET_CCP_VERSION: u8 = 0x1B;
}

/// Packet IDs in the first DTO byte
pub mod pid {
    pub const COMMAND_RETURN: u8 = 0xFF;
    pub const EVENT: u8 = 0xFE;
}

/// Resource masks for GET_SEED / UNLOCK
pub mod resource {
    pub const CAL: u8 = 0x01;
    pub const DAQ: u8 = 0x02;
    pub const PGM: u8 = 0x40;
}

/// SET_S_STATUS session status bits
pub mod session_status {
    pub const CAL: u8 = 0x01;
    pub const DAQ: u8 = 0x02;
    pub const RESUME: u8 = 0x04;
    pub const STORE: u8 = 0x40;
    pub const RUN: u8 = 0x80;
}

/// START_STOP modes
pub mod start_stop {
    pub const STOP: u8 = 0x00;
    pub const START: u8 = 0x01;
    pub const PREPARE: u8 = 0x02;
}

/// DISCONNECT types
pub mod disconnect {
    pub const TEMPORARY: u8 = 0x00;
    pub const END_OF_SESSION: u8 = 0x01;
}

pub const FRAME_LEN: usize = 8;
/// Parameter bytes after CMD and CTR
pub const MAX_PARAMS: usize = 6;
/// Data bytes carried by DNLOAD / PROGRAM / UPLOAD
pub const MAX_PAYLOAD: usize = 5;
pub const CRM_DATA_LEN: usize = 5;

pub fn command_name(cmd: u8) -> &'static str {
    match cmd {
        code::CONNECT => "CONNECT",
        code::SET_MTA => "SET_MTA",
        code::DNLOAD => "DNLOAD",
        code::UPLOAD => "UPLOAD",
        code::START_STOP => "START_STOP",
        code::DISCONNECT => "DISCONNECT",
        code::START_STOP_ALL => "START_STOP_ALL",
        code::SET_S_STATUS => "SET_S_STATUS",
        code::BUILD_CHKSUM => "BUILD_CHKSUM",
        code::CLEAR_MEMORY => "CLEAR_MEMORY",
        code::GET_SEED => "GET_SEED",
        code::UNLOCK => "UNLOCK",
        code::GET_DAQ_SIZE => "GET_DAQ_SIZE",
        code::SET_DAQ_PTR => "SET_DAQ_PTR",
        code::WRITE_DAQ => "WRITE_DAQ",
        code::EXCHANGE_ID => "EXCHANGE_ID",
        code::PROGRAM => "PROGRAM",
        code::GET_CCP_VERSION => "GET_CCP_VERSION",
        _ => "USER_COMMAND",
    }
}

/// Text for a CRM return code
pub fn describe_return_code(err: u8) -> &'static str {
    match err {
        0x00 => "acknowledge",
        0x01 => "DAQ processor overload",
        0x10 => "command processor busy",
        0x11 => "DAQ processor busy",
        0x12 => "internal timeout",
        0x18 => "key request",
        0x19 => "session status request",
        0x20 => "cold start request",
        0x21 => "calibration data initialization request",
        0x22 => "DAQ list initialization request",
        0x23 => "code update request",
        0x30 => "unknown command",
        0x31 => "command syntax",
        0x32 => "parameter(s) out of range",
        0x33 => "access denied",
        0x34 => "overload",
        0x35 => "access locked",
        0x36 => "resource/function not available",
        _ => "unknown return code",
    }
}

/// Build a CRO frame, zero-padded to 8 bytes
pub fn build_cro(cmd: u8, ctr: u8, params: &[u8]) -> ProtocolResult<[u8; FRAME_LEN]> {
    if params.len() > MAX_PARAMS {
        return Err(ProtocolError::InvalidConfig(format!(
            "{} takes at most {} parameter bytes, got {}",
            command_name(cmd),
            MAX_PARAMS,
            params.len()
        )));
    }
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = cmd;
    frame[1] = ctr;
    frame[2..2 + params.len()].copy_from_slice(params);
    Ok(frame)
}

/// A parsed command return message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crm {
    pub err: u8,
    pub ctr: u8,
    pub data: [u8; CRM_DATA_LEN],
}

impl Crm {
    /// Parse a DTO whose PID is 0xFF; `None` for other packet types
    pub fn parse(dto: &[u8]) -> Option<Self> {
        if dto.len() < 3 || dto[0] != pid::COMMAND_RETURN {
            return None;
        }
        let mut data = [0u8; CRM_DATA_LEN];
        let available = dto.len().saturating_sub(3).min(CRM_DATA_LEN);
        data[..available].copy_from_slice(&dto[3..3 + available]);
        Some(Self {
            err: dto[1],
            ctr: dto[2],
            data,
        })
    }
}

/// 32-bit address as sent on the wire (little-endian, independent of host order)
pub fn address_bytes(address: u32) -> [u8; 4] {
    address.to_le_bytes()
}
