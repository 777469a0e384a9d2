// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network configuration.
//!
//! Loaded from TOML; every field has a default so a partial file is valid.
//!
//! ```toml
//! [radio]
//! frequency_hz = 868000000
//! power_dbm = 10
//!
//! [arq]
//! max_retries = 2
//! ack_timeout_ms = 160
//!
//! [oad]
//! block_request_period_ms = 200
//! ```

use crate::arq::ArqSettings;
use crate::oad::{OadSettings, OAD_BLOCK_SIZE};
use crate::packet::{max_data_len, PacketOptions, CONCENTRATOR_ADDRESS};
use crate::radio::{self, BROADCAST_ADDRESS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration for a concentrator or a node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WsnConfig {
    #[serde(default)]
    pub radio: RadioConfig,

    #[serde(default)]
    pub arq: ArqConfig,

    #[serde(default)]
    pub concentrator: ConcentratorConfig,

    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub oad: OadConfig,
}

/// Transceiver parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioConfig {
    /// Carrier frequency (Hz).
    #[serde(default = "default_frequency")]
    pub frequency_hz: u32,

    /// TX power (dBm).
    #[serde(default = "default_power")]
    pub power_dbm: i8,
}

fn default_frequency() -> u32 {
    868_000_000
}

fn default_power() -> i8 {
    10
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            frequency_hz: default_frequency(),
            power_dbm: default_power(),
        }
    }
}

/// Acknowledged-send parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArqConfig {
    #[serde(default = "default_arq_retries")]
    pub max_retries: u8,

    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Window for the frame announced by a pending ack.
    #[serde(default = "default_ack_timeout")]
    pub follow_up_timeout_ms: u64,

    /// Append a CRC to outgoing frames.
    #[serde(default = "default_true")]
    pub use_crc: bool,
}

fn default_arq_retries() -> u8 {
    2
}

fn default_ack_timeout() -> u64 {
    160
}

fn default_true() -> bool {
    true
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            max_retries: default_arq_retries(),
            ack_timeout_ms: default_ack_timeout(),
            follow_up_timeout_ms: default_ack_timeout(),
            use_crc: true,
        }
    }
}

/// Concentrator runtime parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentratorConfig {
    /// How long the radio task waits for the application's ack content.
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,

    /// Application task tick (OAD abort polling).
    #[serde(default = "default_tick")]
    pub tick_ms: u64,
}

fn default_reply_timeout() -> u64 {
    20
}

fn default_tick() -> u64 {
    50
}

impl Default for ConcentratorConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: default_reply_timeout(),
            tick_ms: default_tick(),
        }
    }
}

/// Sensor node parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Fixed node address; a random one is drawn when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u8>,

    #[serde(default = "default_sample_period")]
    pub sample_period_ms: u64,

    /// Sampling pause after the queue overruns.
    #[serde(default = "default_overrun_sleep")]
    pub overrun_sleep_ms: u64,

    /// Raw sample length produced by simulated sensors (bytes).
    #[serde(default = "default_sample_length")]
    pub sample_length: usize,

    /// Sample from boot; otherwise wait for a TransferStart command.
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

fn default_sample_period() -> u64 {
    1000
}

fn default_overrun_sleep() -> u64 {
    5000
}

fn default_sample_length() -> usize {
    20
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: None,
            sample_period_ms: default_sample_period(),
            overrun_sleep_ms: default_overrun_sleep(),
            sample_length: default_sample_length(),
            auto_start: true,
        }
    }
}

/// Firmware download parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OadConfig {
    #[serde(default = "default_block_period")]
    pub block_request_period_ms: u64,

    #[serde(default = "default_oad_retries")]
    pub max_retries: u8,

    /// Slack on top of the retry window before a stalled transfer aborts.
    #[serde(default = "default_abort_grace")]
    pub abort_grace_ms: u64,

    /// Flash erase page size (bytes).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Size of the image slot (bytes).
    #[serde(default = "default_slot")]
    pub image_slot_bytes: usize,
}

fn default_block_period() -> u64 {
    200
}

fn default_oad_retries() -> u8 {
    3
}

fn default_abort_grace() -> u64 {
    500
}

fn default_page_size() -> usize {
    4096
}

fn default_slot() -> usize {
    0x1F000
}

impl Default for OadConfig {
    fn default() -> Self {
        Self {
            block_request_period_ms: default_block_period(),
            max_retries: default_oad_retries(),
            abort_grace_ms: default_abort_grace(),
            page_size: default_page_size(),
            image_slot_bytes: default_slot(),
        }
    }
}

impl WsnConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        radio::check_frequency(self.radio.frequency_hz)
            .and_then(|_| radio::check_power(self.radio.power_dbm))
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.arq.ack_timeout_ms == 0 {
            return Err(ConfigError::Invalid("arq.ack_timeout_ms must be > 0".into()));
        }
        if self.arq.follow_up_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "arq.follow_up_timeout_ms must be > 0".into(),
            ));
        }
        if self.concentrator.reply_timeout_ms == 0 || self.concentrator.tick_ms == 0 {
            return Err(ConfigError::Invalid(
                "concentrator timings must be > 0".into(),
            ));
        }

        if let Some(address) = self.node.address {
            if address == CONCENTRATOR_ADDRESS || address == BROADCAST_ADDRESS {
                return Err(ConfigError::Invalid(format!(
                    "node.address {:#04x} is reserved",
                    address
                )));
            }
        }
        if self.node.sample_period_ms == 0 {
            return Err(ConfigError::Invalid("node.sample_period_ms must be > 0".into()));
        }
        let max_sample = max_data_len(PacketOptions::CRC);
        if self.node.sample_length == 0 || self.node.sample_length > max_sample {
            return Err(ConfigError::Invalid(format!(
                "node.sample_length {} outside 1..={}",
                self.node.sample_length, max_sample
            )));
        }

        if self.oad.block_request_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "oad.block_request_period_ms must be > 0".into(),
            ));
        }
        if self.oad.page_size == 0 || self.oad.page_size % OAD_BLOCK_SIZE != 0 {
            return Err(ConfigError::Invalid(format!(
                "oad.page_size {} is not a multiple of {}",
                self.oad.page_size, OAD_BLOCK_SIZE
            )));
        }
        if self.oad.image_slot_bytes == 0 || self.oad.image_slot_bytes % self.oad.page_size != 0 {
            return Err(ConfigError::Invalid(format!(
                "oad.image_slot_bytes {:#x} is not a whole number of pages",
                self.oad.image_slot_bytes
            )));
        }

        Ok(())
    }

    pub fn arq_settings(&self) -> ArqSettings {
        ArqSettings {
            max_retries: self.arq.max_retries,
            ack_timeout: Duration::from_millis(self.arq.ack_timeout_ms),
            follow_up_timeout: Duration::from_millis(self.arq.follow_up_timeout_ms),
            use_crc: self.arq.use_crc,
        }
    }

    pub fn oad_settings(&self) -> OadSettings {
        OadSettings {
            block_request_period: Duration::from_millis(self.oad.block_request_period_ms),
            max_retries: self.oad.max_retries,
            abort_grace: Duration::from_millis(self.oad.abort_grace_ms),
        }
    }

    /// Pages in the image slot
    pub fn slot_pages(&self) -> usize {
        self.oad.image_slot_bytes / self.oad.page_size
    }
}
