// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Radio packet framing
//!
//! ## Frame Format
//!
//! ```text
//! +-----+------+------+-----+-----------+-----------------+
//! | SRC | TYPE | OPTS | LEN | CRC (opt) | DATA            |
//! +-----+------+------+-----+-----------+-----------------+
//!   1B    1B     1B    1B     2B BE       0..=56B
//! ```
//!
//! - SRC: source address (concentrator is 0x00)
//! - TYPE: [`PacketType`] code
//! - OPTS: [`PacketOptions`] bits
//! - LEN: number of DATA bytes
//! - CRC: CRC16 over DATA, present when `OPTS & CRC`
//!
//! A frame never exceeds [`MAX_PAYLOAD`] bytes.

pub mod command;
pub mod crc;

pub use command::{AckCommand, NodeCommand, MAX_COMMAND_PARAMS};
pub use crc::{crc16, crc16_update, Crc16};

use core::fmt;
use thiserror::Error;

/// Largest frame the radio accepts
pub const MAX_PAYLOAD: usize = 60;

/// SRC + TYPE + OPTS + LEN
pub const HEADER_SIZE: usize = 4;

/// Size of the optional CRC field
pub const CRC_SIZE: usize = 2;

/// Address of the concentrator
pub const CONCENTRATOR_ADDRESS: u8 = 0x00;

/// Why a frame was rejected
///
/// Every variant means "no useful data"; callers never use a partially
/// decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidPacket {
    #[error("frame truncated")]
    Truncated,

    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),

    #[error("length exceeds maximum payload")]
    LengthOverflow,

    #[error("payload does not match packet type")]
    Malformed,

    #[error("CRC mismatch (frame {expected:#06x}, computed {actual:#06x})")]
    CrcMismatch { expected: u16, actual: u16 },
}

/// Packet type carried in the TYPE byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PacketType {
    Ack = 0,
    #[default]
    RawData = 1,
    TestReset = 2,
    AdcSensor = 3,
    DualModeSensor = 4,
    OadFragment = 5,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PacketType::Ack),
            1 => Some(PacketType::RawData),
            2 => Some(PacketType::TestReset),
            3 => Some(PacketType::AdcSensor),
            4 => Some(PacketType::DualModeSensor),
            5 => Some(PacketType::OadFragment),
            _ => None,
        }
    }
}

/// Option bits carried in the OPTS byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketOptions(u8);

impl PacketOptions {
    pub const NONE: Self = Self(0);
    /// CRC16 field precedes the data
    pub const CRC: Self = Self(1 << 0);
    /// Ack only: the sender transmits another frame right after this one
    pub const PENDING: Self = Self(1 << 1);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl core::ops::BitOr for PacketOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.with(rhs)
    }
}

/// Largest data length for the given options
pub const fn max_data_len(options: PacketOptions) -> usize {
    if options.contains(PacketOptions::CRC) {
        MAX_PAYLOAD - HEADER_SIZE - CRC_SIZE
    } else {
        MAX_PAYLOAD - HEADER_SIZE
    }
}

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub source: u8,
    pub packet_type: PacketType,
    pub options: PacketOptions,
}

impl PacketHeader {
    pub const fn new(source: u8, packet_type: PacketType, options: PacketOptions) -> Self {
        Self {
            source,
            packet_type,
            options,
        }
    }
}

/// `AdcSensor` reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdcSensorData {
    pub adc_value: u16,
}

/// `DualModeSensor` reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DualModeSensorData {
    pub adc_value: u16,
    pub battery_mv: u16,
    pub time_100ms: u32,
    pub button: u8,
}

impl DualModeSensorData {
    pub const WIRE_SIZE: usize = 9;
}

/// Decoded packet contents, one variant per packet type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Ack(Option<AckCommand>),
    RawData(Vec<u8>),
    TestReset,
    AdcSensor(AdcSensorData),
    DualModeSensor(DualModeSensorData),
    /// Encoded [`crate::oad::OadMessage`]
    OadFragment(Vec<u8>),
}

impl PacketBody {
    pub fn packet_type(&self) -> PacketType {
        match self {
            PacketBody::Ack(_) => PacketType::Ack,
            PacketBody::RawData(_) => PacketType::RawData,
            PacketBody::TestReset => PacketType::TestReset,
            PacketBody::AdcSensor(_) => PacketType::AdcSensor,
            PacketBody::DualModeSensor(_) => PacketType::DualModeSensor,
            PacketBody::OadFragment(_) => PacketType::OadFragment,
        }
    }

    /// DATA bytes for this body
    pub fn to_payload(&self) -> Vec<u8> {
        match self {
            PacketBody::Ack(None) | PacketBody::TestReset => Vec::new(),
            PacketBody::Ack(Some(cmd)) => cmd.to_bytes(),
            PacketBody::RawData(data) | PacketBody::OadFragment(data) => data.clone(),
            PacketBody::AdcSensor(s) => s.adc_value.to_be_bytes().to_vec(),
            PacketBody::DualModeSensor(s) => {
                let mut out = Vec::with_capacity(DualModeSensorData::WIRE_SIZE);
                out.extend_from_slice(&s.adc_value.to_be_bytes());
                out.extend_from_slice(&s.battery_mv.to_be_bytes());
                out.extend_from_slice(&s.time_100ms.to_be_bytes());
                out.push(s.button);
                out
            }
        }
    }

    /// Validate DATA bytes against the layout of `packet_type`
    pub fn from_payload(packet_type: PacketType, data: &[u8]) -> Result<Self, InvalidPacket> {
        match packet_type {
            PacketType::Ack => {
                if data.is_empty() {
                    Ok(PacketBody::Ack(None))
                } else {
                    AckCommand::parse(data)
                        .map(|cmd| PacketBody::Ack(Some(cmd)))
                        .ok_or(InvalidPacket::Malformed)
                }
            }
            PacketType::RawData => Ok(PacketBody::RawData(data.to_vec())),
            PacketType::TestReset => Ok(PacketBody::TestReset),
            PacketType::AdcSensor => match data {
                [hi, lo] => Ok(PacketBody::AdcSensor(AdcSensorData {
                    adc_value: u16::from_be_bytes([*hi, *lo]),
                })),
                _ => Err(InvalidPacket::Malformed),
            },
            PacketType::DualModeSensor => {
                if data.len() != DualModeSensorData::WIRE_SIZE {
                    return Err(InvalidPacket::Malformed);
                }
                Ok(PacketBody::DualModeSensor(DualModeSensorData {
                    adc_value: u16::from_be_bytes([data[0], data[1]]),
                    battery_mv: u16::from_be_bytes([data[2], data[3]]),
                    time_100ms: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                    button: data[8],
                }))
            }
            PacketType::OadFragment => Ok(PacketBody::OadFragment(data.to_vec())),
        }
    }
}

/// A validated packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    /// RSSI reported by the radio for this frame
    pub rssi: i8,
    pub body: PacketBody,
}

impl Packet {
    pub fn new(source: u8, options: PacketOptions, body: PacketBody) -> Self {
        Self {
            header: PacketHeader::new(source, body.packet_type(), options),
            rssi: 0,
            body,
        }
    }

    pub fn source(&self) -> u8 {
        self.header.source
    }

    pub fn packet_type(&self) -> PacketType {
        self.header.packet_type
    }

    pub fn encode(&self) -> Result<Vec<u8>, InvalidPacket> {
        encode(&self.header, &self.body.to_payload())
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} from {:#04x} (opts {:#04x}, rssi {})",
            self.header.packet_type,
            self.header.source,
            self.header.options.bits(),
            self.rssi
        )
    }
}

/// Encode a frame
///
/// The CRC field is inserted before `payload` when `header.options`
/// carries [`PacketOptions::CRC`].
pub fn encode(header: &PacketHeader, payload: &[u8]) -> Result<Vec<u8>, InvalidPacket> {
    if payload.len() > max_data_len(header.options) {
        return Err(InvalidPacket::LengthOverflow);
    }

    let with_crc = header.options.contains(PacketOptions::CRC);
    let mut frame = Vec::with_capacity(HEADER_SIZE + CRC_SIZE + payload.len());
    frame.push(header.source);
    frame.push(header.packet_type as u8);
    frame.push(header.options.bits());
    frame.push(payload.len() as u8);

    if with_crc {
        frame.extend_from_slice(&crc16(payload).to_be_bytes());
    }
    frame.extend_from_slice(payload);

    Ok(frame)
}

/// Decode and validate a received frame
pub fn decode(bytes: &[u8], rssi: i8) -> Result<Packet, InvalidPacket> {
    if bytes.len() < HEADER_SIZE {
        return Err(InvalidPacket::Truncated);
    }
    if bytes.len() > MAX_PAYLOAD {
        return Err(InvalidPacket::LengthOverflow);
    }

    let source = bytes[0];
    let packet_type = PacketType::from_u8(bytes[1]).ok_or(InvalidPacket::UnknownType(bytes[1]))?;
    let options = PacketOptions::from_bits(bytes[2]);
    let length = bytes[3] as usize;

    if length > max_data_len(options) {
        return Err(InvalidPacket::LengthOverflow);
    }

    let data_start = if options.contains(PacketOptions::CRC) {
        HEADER_SIZE + CRC_SIZE
    } else {
        HEADER_SIZE
    };
    if bytes.len() < data_start + length {
        return Err(InvalidPacket::Truncated);
    }
    let data = &bytes[data_start..data_start + length];

    if options.contains(PacketOptions::CRC) {
        let expected = u16::from_be_bytes([bytes[HEADER_SIZE], bytes[HEADER_SIZE + 1]]);
        let actual = crc16(data);
        if expected != actual {
            return Err(InvalidPacket::CrcMismatch { expected, actual });
        }
    }

    let body = PacketBody::from_payload(packet_type, data)?;

    Ok(Packet {
        header: PacketHeader::new(source, packet_type, options),
        rssi,
        body,
    })
}
