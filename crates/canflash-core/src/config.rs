//! CAN device configuration shared by both protocols

use serde::{Deserialize, Serialize};

/// CAN channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Driver channel or interface name (e.g., "can0", "PCAN_USBBUS1")
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Bus bitrate in bit/s
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,
}

fn default_channel() -> String {
    "can0".to_string()
}

fn default_bitrate() -> u32 {
    500_000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            bitrate: default_bitrate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: DeviceConfig = toml::from_str("channel = \"vcan0\"").unwrap();
        assert_eq!(config.channel, "vcan0");
        assert_eq!(config.bitrate, 500_000);
    }
}
