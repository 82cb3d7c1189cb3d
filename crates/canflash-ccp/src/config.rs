//! CCP session configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::resource;

/// Configuration for a CCP session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CcpConfig {
    /// Command Receive Object CAN ID (tester -> ECU)
    #[serde(default = "default_cro_id")]
    pub cro_id: u32,
    /// Data Transmission Object CAN ID (ECU -> tester)
    #[serde(default = "default_dto_id")]
    pub dto_id: u32,
    /// Station address sent with CONNECT / DISCONNECT
    #[serde(default)]
    pub station_address: u16,
    /// Command code used for the station connect
    #[serde(default = "default_connect_command")]
    pub connect_command: u8,
    /// User command that starts the flashed program at its start address
    #[serde(default = "default_launch_command")]
    pub launch_command: u8,
    /// Acknowledge timeout for ordinary commands
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Overall deadline for the connect loop
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// CLEAR_MEMORY can take seconds on large flash sectors
    #[serde(default = "default_clear_timeout_ms")]
    pub clear_timeout_ms: u64,
    #[serde(default = "default_checksum_timeout_ms")]
    pub checksum_timeout_ms: u64,
    /// Resource mask unlocked before programming
    #[serde(default = "default_program_resource")]
    pub program_resource: u8,
    /// Receive poll interval of the DAQ loop; also bounds how long a stop takes
    #[serde(default = "default_daq_poll_ms")]
    pub daq_poll_ms: u64,
    /// Display refresh tick
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
    /// Hex secret for the built-in XOR seed/key resolver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default = "default_daq_lists")]
    pub daq_lists: Vec<DaqListConfig>,
}

/// Sampling channel of one DAQ list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaqListConfig {
    pub daq_number: u8,
    /// ECU event channel that triggers this list (e.g. the 10 ms task)
    #[serde(default)]
    pub event_channel: u8,
    #[serde(default = "default_prescaler")]
    pub prescaler: u16,
}

fn default_cro_id() -> u32 {
    0x7E0
}

fn default_dto_id() -> u32 {
    0x7E1
}

fn default_connect_command() -> u8 {
    0x01
}

fn default_launch_command() -> u8 {
    0x21
}

fn default_command_timeout_ms() -> u64 {
    500
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_clear_timeout_ms() -> u64 {
    30000
}

fn default_checksum_timeout_ms() -> u64 {
    10000
}

fn default_program_resource() -> u8 {
    resource::PGM
}

fn default_daq_poll_ms() -> u64 {
    50
}

fn default_refresh_ms() -> u64 {
    100
}

fn default_prescaler() -> u16 {
    1
}

fn default_daq_lists() -> Vec<DaqListConfig> {
    vec![
        DaqListConfig {
            daq_number: 0,
            event_channel: 0,
            prescaler: 1,
        },
        DaqListConfig {
            daq_number: 1,
            event_channel: 1,
            prescaler: 1,
        },
    ]
}

impl Default for CcpConfig {
    fn default() -> Self {
        Self {
            cro_id: default_cro_id(),
            dto_id: default_dto_id(),
            station_address: 0,
            connect_command: default_connect_command(),
            launch_command: default_launch_command(),
            command_timeout_ms: default_command_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            clear_timeout_ms: default_clear_timeout_ms(),
            checksum_timeout_ms: default_checksum_timeout_ms(),
            program_resource: default_program_resource(),
            daq_poll_ms: default_daq_poll_ms(),
            refresh_ms: default_refresh_ms(),
            secret: None,
            daq_lists: default_daq_lists(),
        }
    }
}

impl CcpConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn clear_timeout(&self) -> Duration {
        Duration::from_millis(self.clear_timeout_ms)
    }

    pub fn checksum_timeout(&self) -> Duration {
        Duration::from_millis(self.checksum_timeout_ms)
    }

    pub fn daq_poll(&self) -> Duration {
        Duration::from_millis(self.daq_poll_ms)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }

    pub fn daq_list(&self, daq_number: u8) -> Option<&DaqListConfig> {
        self.daq_lists.iter().find(|l| l.daq_number == daq_number)
    }
}
