// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Commands piggy-backed on acks from the concentrator to a node

use core::time::Duration;

/// Maximum parameter bytes carried by one ack command
pub const MAX_COMMAND_PARAMS: usize = 32;

/// Replies from a node to a concentrator command start at this code
pub const REPLY_TO_SERVER: u8 = 0x20;

/// Ping request
pub const CMD_PING: u8 = 0x03;
/// Opaque downlink payload
pub const CMD_DOWNLINK: u8 = 0x85;
/// Start sampling and reporting
pub const CMD_TRANSFER_START: u8 = 0xA5;
/// Stop sampling and reporting
pub const CMD_TRANSFER_STOP: u8 = 0xA6;
/// Ask the node how many samples it has queued
pub const CMD_DATA_COUNT: u8 = 0xA7;
/// Pause sampling for `u32 BE` milliseconds
pub const CMD_SLEEP: u8 = 0xA8;

/// Raw command carried in an ack payload
///
/// Wire layout: `device_id, command, [param_len, params...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckCommand {
    pub device_id: u8,
    pub command: u8,
    pub params: Vec<u8>,
}

impl AckCommand {
    pub fn new(device_id: u8, command: u8, params: &[u8]) -> Option<Self> {
        if params.len() > MAX_COMMAND_PARAMS {
            return None;
        }
        Some(Self {
            device_id,
            command,
            params: params.to_vec(),
        })
    }

    /// Bytes appended after the ack header
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.params.len());
        out.push(self.device_id);
        out.push(self.command);
        if !self.params.is_empty() {
            out.push(self.params.len() as u8);
            out.extend_from_slice(&self.params);
        }
        out
    }

    /// Parse an ack payload; `None` if it does not hold a well-formed command
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload.len() {
            0 | 1 => None,
            2 => Some(Self {
                device_id: payload[0],
                command: payload[1],
                params: Vec::new(),
            }),
            _ => {
                let len = payload[2] as usize;
                if len > MAX_COMMAND_PARAMS || payload.len() < 3 + len {
                    return None;
                }
                Some(Self {
                    device_id: payload[0],
                    command: payload[1],
                    params: payload[3..3 + len].to_vec(),
                })
            }
        }
    }
}

/// Decoded node command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    Ping,
    Downlink(Vec<u8>),
    TransferStart,
    TransferStop,
    DataCount,
    Sleep(Duration),
    Unknown(u8),
}

impl NodeCommand {
    pub fn code(&self) -> u8 {
        match self {
            NodeCommand::Ping => CMD_PING,
            NodeCommand::Downlink(_) => CMD_DOWNLINK,
            NodeCommand::TransferStart => CMD_TRANSFER_START,
            NodeCommand::TransferStop => CMD_TRANSFER_STOP,
            NodeCommand::DataCount => CMD_DATA_COUNT,
            NodeCommand::Sleep(_) => CMD_SLEEP,
            NodeCommand::Unknown(code) => *code,
        }
    }

    /// Reply code a node uses when answering this command
    pub fn reply_code(&self) -> u8 {
        REPLY_TO_SERVER + (self.code() & 0x0F)
    }

    pub fn from_ack(cmd: &AckCommand) -> Self {
        match cmd.command {
            CMD_PING => NodeCommand::Ping,
            CMD_DOWNLINK => NodeCommand::Downlink(cmd.params.clone()),
            CMD_TRANSFER_START => NodeCommand::TransferStart,
            CMD_TRANSFER_STOP => NodeCommand::TransferStop,
            CMD_DATA_COUNT => NodeCommand::DataCount,
            CMD_SLEEP if cmd.params.len() >= 4 => {
                let ms = u32::from_be_bytes([
                    cmd.params[0],
                    cmd.params[1],
                    cmd.params[2],
                    cmd.params[3],
                ]);
                NodeCommand::Sleep(Duration::from_millis(ms as u64))
            }
            other => NodeCommand::Unknown(other),
        }
    }

    /// Build the ack command; `None` when a downlink exceeds the parameter block
    pub fn to_ack(&self, device_id: u8) -> Option<AckCommand> {
        match self {
            NodeCommand::Downlink(data) => AckCommand::new(device_id, CMD_DOWNLINK, data),
            NodeCommand::Sleep(d) => {
                let ms = u32::try_from(d.as_millis()).unwrap_or(u32::MAX);
                AckCommand::new(device_id, CMD_SLEEP, &ms.to_be_bytes())
            }
            other => AckCommand::new(device_id, other.code(), &[]),
        }
    }
}
