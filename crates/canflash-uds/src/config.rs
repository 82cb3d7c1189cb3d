//! UDS session configuration
//!
//! CAN IDs, ISO-TP link options, timing and the routine identifiers used by
//! the flashing sequence. Every field has a default so a partial TOML table
//! is enough.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a UDS flashing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdsConfig {
    /// Physical request CAN ID (tester -> ECU)
    #[serde(default = "default_request_id")]
    pub request_id: u32,
    /// Physical response CAN ID (ECU -> tester)
    #[serde(default = "default_response_id")]
    pub response_id: u32,
    /// Functional (broadcast) request CAN ID
    #[serde(default = "default_functional_id")]
    pub functional_id: u32,
    #[serde(default)]
    pub isotp: IsoTpConfig,
    /// P2 timeout per request in milliseconds
    #[serde(default = "default_p2_timeout_ms")]
    pub p2_timeout_ms: u64,
    /// Upper bound on repeated "response pending" (NRC 0x78) replies
    #[serde(default = "default_pending_timeout_ms")]
    pub pending_timeout_ms: u64,
    /// Overall deadline for the connect loop
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Security access level; the seed sub-function is `2 * level - 1`
    #[serde(default = "default_security_level")]
    pub security_level: u8,
    /// Hex secret for the built-in XOR seed/key resolver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default)]
    pub routines: RoutineIds,
    /// addressAndLengthFormatIdentifier for RequestDownload
    #[serde(default = "default_address_and_length_format")]
    pub address_and_length_format: u8,
    /// dataFormatIdentifier for RequestDownload (0x00 = no compression/encryption)
    #[serde(default)]
    pub data_format: u8,
}

/// Routine identifiers used by the flashing sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineIds {
    #[serde(default = "default_erase_routine")]
    pub erase_memory: u16,
    #[serde(default = "default_check_integrity_routine")]
    pub check_integrity: u16,
    #[serde(default = "default_check_dependencies_routine")]
    pub check_dependencies: u16,
}

/// ISO-TP link options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsoTpConfig {
    /// Padding byte for unused frame bytes
    #[serde(default = "default_padding")]
    pub padding: u8,
    /// Block size we advertise in our flow-control frames (0 = unlimited)
    #[serde(default)]
    pub block_size: u8,
    /// STmin we advertise, raw ISO 15765-2 encoding
    #[serde(default)]
    pub st_min: u8,
    /// N_Bs / N_Cr: wait for flow control or the next consecutive frame
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
}

fn default_request_id() -> u32 {
    0x7E0
}

fn default_response_id() -> u32 {
    0x7E8
}

fn default_functional_id() -> u32 {
    0x7DF
}

fn default_p2_timeout_ms() -> u64 {
    1000
}

fn default_pending_timeout_ms() -> u64 {
    30000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_security_level() -> u8 {
    1
}

fn default_address_and_length_format() -> u8 {
    0x44
}

fn default_erase_routine() -> u16 {
    0xFF00
}

fn default_check_integrity_routine() -> u16 {
    0x0202
}

fn default_check_dependencies_routine() -> u16 {
    0xFF01
}

fn default_padding() -> u8 {
    0xCC
}

fn default_frame_timeout_ms() -> u64 {
    1000
}

impl Default for UdsConfig {
    fn default() -> Self {
        Self {
            request_id: default_request_id(),
            response_id: default_response_id(),
            functional_id: default_functional_id(),
            isotp: IsoTpConfig::default(),
            p2_timeout_ms: default_p2_timeout_ms(),
            pending_timeout_ms: default_pending_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            security_level: default_security_level(),
            secret: None,
            routines: RoutineIds::default(),
            address_and_length_format: default_address_and_length_format(),
            data_format: 0x00,
        }
    }
}

impl Default for RoutineIds {
    fn default() -> Self {
        Self {
            erase_memory: default_erase_routine(),
            check_integrity: default_check_integrity_routine(),
            check_dependencies: default_check_dependencies_routine(),
        }
    }
}

impl Default for IsoTpConfig {
    fn default() -> Self {
        Self {
            padding: default_padding(),
            block_size: 0,
            st_min: 0,
            frame_timeout_ms: default_frame_timeout_ms(),
        }
    }
}

impl UdsConfig {
    pub fn p2_timeout(&self) -> Duration {
        Duration::from_millis(self.p2_timeout_ms)
    }

    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl IsoTpConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}
