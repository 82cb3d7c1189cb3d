//! Configuration file handling for canflash
//!
//! The TOML file has one table per group (`[device]`, `[uds]`, `[ccp]`).
//! Single options are overridden on the command line with
//! `--set group.option=value`; each group lists its options explicitly in an
//! option table of getter/setter pairs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use canflash_ccp::CcpConfig;
use canflash_core::DeviceConfig;
use canflash_uds::UdsConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Expected group.option=value, got '{0}'")]
    Malformed(String),

    #[error("Unknown option group '{0}' (expected device, uds or ccp)")]
    UnknownGroup(String),

    #[error("Unknown option '{group}.{option}'")]
    UnknownOption { group: String, option: String },

    #[error("Invalid value '{value}' for {group}.{option}: {reason}")]
    InvalidValue {
        group: String,
        option: String,
        value: String,
        reason: String,
    },
}

/// Configuration for the CLI tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub uds: UdsConfig,
    #[serde(default)]
    pub ccp: CcpConfig,
    /// Where measurement selections are remembered between runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("canflash");

        Ok(config_dir.join("config.toml"))
    }

    pub fn history_path(&self) -> Result<PathBuf> {
        match &self.history {
            Some(path) => Ok(path.clone()),
            None => Ok(dirs::data_dir()
                .context("Could not determine data directory")?
                .join("canflash")
                .join("history.json")),
        }
    }

    /// Apply one `group.option=value` override
    pub fn apply_override(&mut self, assignment: &str) -> Result<(), ConfigError> {
        let (key, value) = assignment
            .split_once('=')
            .ok_or_else(|| ConfigError::Malformed(assignment.to_string()))?;
        let (group, option) = split_key(key.trim())
            .ok_or_else(|| ConfigError::Malformed(assignment.to_string()))?;
        let value = value.trim();

        let set = |result: Result<(), String>| {
            result.map_err(|reason| ConfigError::InvalidValue {
                group: group.to_string(),
                option: option.to_string(),
                value: value.to_string(),
                reason,
            })
        };

        match group {
            "device" => set((find(&device_options(), group, option)?.set)(&mut self.device, value)),
            "uds" => set((find(&uds_options(), group, option)?.set)(&mut self.uds, value)),
            "ccp" => set((find(&ccp_options(), group, option)?.set)(&mut self.ccp, value)),
            other => Err(ConfigError::UnknownGroup(other.to_string())),
        }
    }

    /// Current value of `group.option`
    pub fn get(&self, key: &str) -> Result<String, ConfigError> {
        let (group, option) =
            split_key(key).ok_or_else(|| ConfigError::Malformed(key.to_string()))?;
        match group {
            "device" => Ok((find(&device_options(), group, option)?.get)(&self.device)),
            "uds" => Ok((find(&uds_options(), group, option)?.get)(&self.uds)),
            "ccp" => Ok((find(&ccp_options(), group, option)?.get)(&self.ccp)),
            other => Err(ConfigError::UnknownGroup(other.to_string())),
        }
    }

    /// Every option of every group with its current value
    pub fn entries(&self) -> Vec<(String, String)> {
        fn collect<T>(group: &str, options: &[OptionSpec<T>], config: &T) -> Vec<(String, String)> {
            options
                .iter()
                .map(|o| (format!("{}.{}", group, o.name), (o.get)(config)))
                .collect()
        }

        let mut entries = collect("device", &device_options(), &self.device);
        entries.extend(collect("uds", &uds_options(), &self.uds));
        entries.extend(collect("ccp", &ccp_options(), &self.ccp));
        entries
    }
}

fn split_key(key: &str) -> Option<(&str, &str)> {
    let (group, option) = key.split_once('.')?;
    if group.is_empty() || option.is_empty() {
        return None;
    }
    Some((group, option))
}

// ============================================================================
// Option tables
// ============================================================================

/// One settable option of a config group
pub struct OptionSpec<T> {
    pub name: &'static str,
    pub get: fn(&T) -> String,
    pub set: fn(&mut T, &str) -> Result<(), String>,
}

fn find<'a, T>(
    options: &'a [OptionSpec<T>],
    group: &str,
    option: &str,
) -> Result<&'a OptionSpec<T>, ConfigError> {
    options
        .iter()
        .find(|o| o.name == option)
        .ok_or_else(|| ConfigError::UnknownOption {
            group: group.to_string(),
            option: option.to_string(),
        })
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer
pub fn parse_int<T: TryFrom<u64>>(value: &str) -> Result<T, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(digits) => u64::from_str_radix(digits, 16),
        None => value.parse::<u64>(),
    }
    .map_err(|e| e.to_string())?;
    T::try_from(parsed).map_err(|_| format!("{} is out of range", value))
}

fn parse_secret(value: &str) -> Result<Option<String>, String> {
    if value.is_empty() {
        return Ok(None);
    }
    hex::decode(value).map_err(|e| format!("secret must be hex: {}", e))?;
    Ok(Some(value.to_string()))
}

fn show_secret(secret: Option<&str>) -> String {
    match secret {
        Some(_) => "<set>".to_string(),
        None => "<unset>".to_string(),
    }
}

/// Builds an option table entry for a field parsed with [`parse_int`]
macro_rules! int_option {
    ($ty:ty, $name:literal, $($field:ident).+, hex) => {
        OptionSpec {
            name: $name,
            get: |c: &$ty| format!("0x{:X}", c.$($field).+),
            set: |c: &mut $ty, v: &str| -> Result<(), String> {
                c.$($field).+ = parse_int(v)?;
                Ok(())
            },
        }
    };
    ($ty:ty, $name:literal, $($field:ident).+) => {
        OptionSpec {
            name: $name,
            get: |c: &$ty| c.$($field).+.to_string(),
            set: |c: &mut $ty, v: &str| -> Result<(), String> {
                c.$($field).+ = parse_int(v)?;
                Ok(())
            },
        }
    };
}

pub fn device_options() -> Vec<OptionSpec<DeviceConfig>> {
    vec![
        OptionSpec {
            name: "channel",
            get: |c: &DeviceConfig| c.channel.clone(),
            set: |c: &mut DeviceConfig, v: &str| -> Result<(), String> {
                if v.is_empty() {
                    return Err("channel must not be empty".to_string());
                }
                c.channel = v.to_string();
                Ok(())
            },
        },
        int_option!(DeviceConfig, "bitrate", bitrate),
    ]
}

pub fn uds_options() -> Vec<OptionSpec<UdsConfig>> {
    vec![
        int_option!(UdsConfig, "request_id", request_id, hex),
        int_option!(UdsConfig, "response_id", response_id, hex),
        int_option!(UdsConfig, "functional_id", functional_id, hex),
        int_option!(UdsConfig, "p2_timeout_ms", p2_timeout_ms),
        int_option!(UdsConfig, "pending_timeout_ms", pending_timeout_ms),
        int_option!(UdsConfig, "connect_timeout_ms", connect_timeout_ms),
        int_option!(UdsConfig, "security_level", security_level),
        OptionSpec {
            name: "secret",
            get: |c: &UdsConfig| show_secret(c.secret.as_deref()),
            set: |c: &mut UdsConfig, v: &str| -> Result<(), String> {
                c.secret = parse_secret(v)?;
                Ok(())
            },
        },
        int_option!(UdsConfig, "address_and_length_format", address_and_length_format, hex),
        int_option!(UdsConfig, "data_format", data_format, hex),
        int_option!(UdsConfig, "isotp.padding", isotp.padding, hex),
        int_option!(UdsConfig, "isotp.block_size", isotp.block_size),
        int_option!(UdsConfig, "isotp.st_min", isotp.st_min, hex),
        int_option!(UdsConfig, "isotp.frame_timeout_ms", isotp.frame_timeout_ms),
        int_option!(UdsConfig, "routines.erase_memory", routines.erase_memory, hex),
        int_option!(UdsConfig, "routines.check_integrity", routines.check_integrity, hex),
        int_option!(UdsConfig, "routines.check_dependencies", routines.check_dependencies, hex),
    ]
}

pub fn ccp_options() -> Vec<OptionSpec<CcpConfig>> {
    vec![
        int_option!(CcpConfig, "cro_id", cro_id, hex),
        int_option!(CcpConfig, "dto_id", dto_id, hex),
        int_option!(CcpConfig, "station_address", station_address, hex),
        int_option!(CcpConfig, "connect_command", connect_command, hex),
        int_option!(CcpConfig, "launch_command", launch_command, hex),
        int_option!(CcpConfig, "command_timeout_ms", command_timeout_ms),
        int_option!(CcpConfig, "connect_timeout_ms", connect_timeout_ms),
        int_option!(CcpConfig, "clear_timeout_ms", clear_timeout_ms),
        int_option!(CcpConfig, "checksum_timeout_ms", checksum_timeout_ms),
        int_option!(CcpConfig, "program_resource", program_resource, hex),
        int_option!(CcpConfig, "daq_poll_ms", daq_poll_ms),
        int_option!(CcpConfig, "refresh_ms", refresh_ms),
        OptionSpec {
            name: "secret",
            get: |c: &CcpConfig| show_secret(c.secret.as_deref()),
            set: |c: &mut CcpConfig, v: &str| -> Result<(), String> {
                c.secret = parse_secret(v)?;
                Ok(())
            },
        },
    ]
}
