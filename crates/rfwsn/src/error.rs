// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for rfwsn

use crate::config::ConfigError;
use crate::oad::flash::FlashError;
use crate::packet::InvalidPacket;
use crate::radio::RadioError;
use thiserror::Error;

/// Result type for rfwsn operations
pub type Result<T> = core::result::Result<T, Error>;

/// Error type for rfwsn
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed header, unknown type or CRC mismatch
    #[error("invalid packet: {0}")]
    InvalidPacket(#[from] InvalidPacket),

    /// No ack within the receive window
    #[error("ack timeout")]
    AckTimeout,

    /// Retries exhausted for the current operation
    #[error("send failed after {retries} retries")]
    SendFailed { retries: u8 },

    /// Link has no assigned address yet
    #[error("radio link not connected")]
    NotConnected,

    /// Producer-side backpressure
    #[error("queue full")]
    QueueFull,

    /// Image CRC does not match the stored one
    #[error("image CRC mismatch (stored {expected:#06x}, computed {computed:#06x})")]
    CrcError { expected: u16, computed: u16 },

    /// Propagated from the flash device
    #[error("flash fault: {0}")]
    FlashFault(#[from] FlashError),

    /// Image header carries a sentinel CRC or no image is open
    #[error("no valid image")]
    NoImage,

    /// identify_write refused the proposed image
    #[error("image rejected: {0}")]
    ImageRejected(&'static str),

    /// Block index past the open image
    #[error("block {0} out of range")]
    BlockOutOfRange(u16),

    /// A transfer is already identifying or transferring
    #[error("transfer already in progress")]
    TransferBusy,

    /// Transfer stopped before completion
    #[error("transfer aborted")]
    TransferAborted,

    /// Radio collaborator error
    #[error("radio error: {0}")]
    Radio(#[from] RadioError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Owning task is gone
    #[error("task channel closed")]
    ChannelClosed,

    /// I/O error on a serial link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl<T> From<crossbeam::channel::SendError<T>> for Error {
    fn from(_: crossbeam::channel::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<crossbeam::channel::RecvError> for Error {
    fn from(_: crossbeam::channel::RecvError) -> Self {
        Error::ChannelClosed
    }
}
