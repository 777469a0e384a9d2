// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OAD messages carried in `OadFragment` packets
//!
//! ```text
//! +-----+-------------------------------------------+
//! | CMD | body                                      |
//! +-----+-------------------------------------------+
//!  0 FwVersionReq    -
//!  1 FwVersionRsp    version[16] (NUL padded)
//!  2 ImgIdentifyReq  img_id, metadata[16]
//!  3 ImgIdentifyRsp  status
//!  4 BlockReq        img_id, block u16 LE, multi_block u16 LE
//!  5 BlockRsp        img_id, block u16 LE, data[32]
//! ```

use super::image::IMAGE_HEADER_SIZE;
use crate::packet::InvalidPacket;

/// Bytes per OAD block
pub const OAD_BLOCK_SIZE: usize = 32;

/// Length of the version string field
pub const FW_VERSION_LEN: usize = 16;

/// Only image identifier in use
pub const OAD_IMG_ID: u8 = 0;

/// ImgIdentifyRsp status for an accepted image
pub const IDENTIFY_ACCEPTED: u8 = 0;
/// ImgIdentifyRsp status for a rejected image
pub const IDENTIFY_REJECTED: u8 = 1;

const CMD_FW_VERSION_REQ: u8 = 0;
const CMD_FW_VERSION_RSP: u8 = 1;
const CMD_IMG_IDENTIFY_REQ: u8 = 2;
const CMD_IMG_IDENTIFY_RSP: u8 = 3;
const CMD_BLOCK_REQ: u8 = 4;
const CMD_BLOCK_RSP: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OadMessage {
    FwVersionReq,
    FwVersionRsp {
        version: String,
    },
    ImgIdentifyReq {
        img_id: u8,
        metadata: [u8; IMAGE_HEADER_SIZE],
    },
    ImgIdentifyRsp {
        status: u8,
    },
    BlockReq {
        img_id: u8,
        block: u16,
        multi_block: u16,
    },
    BlockRsp {
        img_id: u8,
        block: u16,
        data: [u8; OAD_BLOCK_SIZE],
    },
}

impl OadMessage {
    pub fn block_request(block: u16) -> Self {
        OadMessage::BlockReq {
            img_id: OAD_IMG_ID,
            block,
            multi_block: 1,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            OadMessage::FwVersionReq => vec![CMD_FW_VERSION_REQ],
            OadMessage::FwVersionRsp { version } => {
                let mut out = vec![CMD_FW_VERSION_RSP];
                let mut field = [0u8; FW_VERSION_LEN];
                let bytes = version.as_bytes();
                let n = bytes.len().min(FW_VERSION_LEN);
                field[..n].copy_from_slice(&bytes[..n]);
                out.extend_from_slice(&field);
                out
            }
            OadMessage::ImgIdentifyReq { img_id, metadata } => {
                let mut out = vec![CMD_IMG_IDENTIFY_REQ, *img_id];
                out.extend_from_slice(metadata);
                out
            }
            OadMessage::ImgIdentifyRsp { status } => vec![CMD_IMG_IDENTIFY_RSP, *status],
            OadMessage::BlockReq {
                img_id,
                block,
                multi_block,
            } => {
                let mut out = vec![CMD_BLOCK_REQ, *img_id];
                out.extend_from_slice(&block.to_le_bytes());
                out.extend_from_slice(&multi_block.to_le_bytes());
                out
            }
            OadMessage::BlockRsp {
                img_id,
                block,
                data,
            } => {
                let mut out = vec![CMD_BLOCK_RSP, *img_id];
                out.extend_from_slice(&block.to_le_bytes());
                out.extend_from_slice(data);
                out
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, InvalidPacket> {
        let (&cmd, body) = bytes.split_first().ok_or(InvalidPacket::Truncated)?;
        match cmd {
            CMD_FW_VERSION_REQ => Ok(OadMessage::FwVersionReq),
            CMD_FW_VERSION_RSP => {
                let field = body.get(..FW_VERSION_LEN).ok_or(InvalidPacket::Truncated)?;
                let end = field.iter().position(|&b| b == 0).unwrap_or(FW_VERSION_LEN);
                Ok(OadMessage::FwVersionRsp {
                    version: String::from_utf8_lossy(&field[..end]).into_owned(),
                })
            }
            CMD_IMG_IDENTIFY_REQ => {
                if body.len() < 1 + IMAGE_HEADER_SIZE {
                    return Err(InvalidPacket::Truncated);
                }
                let mut metadata = [0u8; IMAGE_HEADER_SIZE];
                metadata.copy_from_slice(&body[1..1 + IMAGE_HEADER_SIZE]);
                Ok(OadMessage::ImgIdentifyReq {
                    img_id: body[0],
                    metadata,
                })
            }
            CMD_IMG_IDENTIFY_RSP => {
                let status = *body.first().ok_or(InvalidPacket::Truncated)?;
                Ok(OadMessage::ImgIdentifyRsp { status })
            }
            CMD_BLOCK_REQ => {
                if body.len() < 5 {
                    return Err(InvalidPacket::Truncated);
                }
                Ok(OadMessage::BlockReq {
                    img_id: body[0],
                    block: u16::from_le_bytes([body[1], body[2]]),
                    multi_block: u16::from_le_bytes([body[3], body[4]]),
                })
            }
            CMD_BLOCK_RSP => {
                if body.len() < 3 + OAD_BLOCK_SIZE {
                    return Err(InvalidPacket::Truncated);
                }
                let mut data = [0u8; OAD_BLOCK_SIZE];
                data.copy_from_slice(&body[3..3 + OAD_BLOCK_SIZE]);
                Ok(OadMessage::BlockRsp {
                    img_id: body[0],
                    block: u16::from_le_bytes([body[1], body[2]]),
                    data,
                })
            }
            _ => Err(InvalidPacket::Malformed),
        }
    }
}
