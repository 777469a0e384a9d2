// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Radio collaborator
//!
//! The stack treats the transceiver as a byte transport with send, receive,
//! address filter and RSSI primitives. Received frames are pushed into the
//! owning task's inbox as [`RadioEvent`]s; nothing runs re-entrantly from
//! the receive path.
//!
//! ## Implementations
//!
//! - [`SimRadio`] - station on a shared in-process [`SimAir`] medium

pub mod sim;

pub use sim::{SimAir, SimRadio};

use crossbeam::channel::Sender;
use thiserror::Error;

/// Broadcast destination
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Lowest frequency accepted by the sub-GHz front end (Hz)
pub const MIN_FREQUENCY_HZ: u32 = 779_000_000;
/// Highest frequency accepted by the sub-GHz front end (Hz)
pub const MAX_FREQUENCY_HZ: u32 = 930_000_000;
/// Lowest TX power (dBm)
pub const MIN_POWER_DBM: i8 = -10;
/// Highest TX power (dBm)
pub const MAX_POWER_DBM: i8 = 14;

/// Radio errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("transmit failed")]
    TxFailed,

    #[error("radio closed")]
    Closed,

    #[error("invalid radio parameter: {0}")]
    InvalidParameter(String),
}

/// A frame delivered by the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioEvent {
    pub frame: Vec<u8>,
    pub rssi: i8,
}

/// Half-duplex transceiver
pub trait Radio: Send {
    /// Send one frame to `dest`
    fn transmit(&mut self, dest: u8, frame: &[u8]) -> Result<(), RadioError>;

    /// Deliver every received frame into `inbox` from now on
    fn receive_async(&mut self, inbox: Sender<RadioEvent>);

    /// Only accept frames addressed to `own_address` (or broadcast)
    fn enable_address_filter(&mut self, own_address: u8);

    /// RSSI of the last received frame (dBm)
    fn rssi(&self) -> i8;

    /// Carrier frequency (Hz)
    fn frequency(&self) -> u32;

    fn set_frequency(&mut self, hz: u32) -> Result<(), RadioError>;

    /// TX power (dBm)
    fn power(&self) -> i8;

    fn set_power(&mut self, dbm: i8) -> Result<(), RadioError>;
}

/// Range check shared by radio implementations
pub fn check_frequency(hz: u32) -> Result<(), RadioError> {
    if (MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&hz) {
        Ok(())
    } else {
        Err(RadioError::InvalidParameter(format!(
            "frequency {} Hz outside {}..={} Hz",
            hz, MIN_FREQUENCY_HZ, MAX_FREQUENCY_HZ
        )))
    }
}

/// Range check shared by radio implementations
pub fn check_power(dbm: i8) -> Result<(), RadioError> {
    if (MIN_POWER_DBM..=MAX_POWER_DBM).contains(&dbm) {
        Ok(())
    } else {
        Err(RadioError::InvalidParameter(format!(
            "power {} dBm outside {}..={} dBm",
            dbm, MIN_POWER_DBM, MAX_POWER_DBM
        )))
    }
}
