// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Firmware image header
//!
//! First 16 bytes of every image, little-endian:
//!
//! ```text
//! +-----+-----------+---------+-----------+--------+----------+
//! | CRC | CRC_SHADOW| VERSION | LEN_WORDS | UID[4] | RES[4]   |
//! +-----+-----------+---------+-----------+--------+----------+
//!   0     2           4         6           8        12
//! ```
//!
//! `LEN_WORDS` counts 4-byte words. The CRC covers the image from byte 4
//! (it skips its own two fields) to the end. The bootloader treats an image
//! as ready when `CRC == CRC_SHADOW`.

use super::protocol::OAD_BLOCK_SIZE;
use crate::packet::crc16;

/// Size of the image header
pub const IMAGE_HEADER_SIZE: usize = 16;

/// Start of the CRC-covered region
pub const IMAGE_CRC_START: usize = 4;

/// CRC values that mean "no image"
pub const CRC_SENTINELS: [u16; 2] = [0x0000, 0xFFFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageHeader {
    pub crc: u16,
    pub crc_shadow: u16,
    pub version: u16,
    pub len_words: u16,
    pub uid: [u8; 4],
    pub reserved: [u8; 4],
}

impl ImageHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < IMAGE_HEADER_SIZE {
            return None;
        }
        let mut uid = [0u8; 4];
        uid.copy_from_slice(&bytes[8..12]);
        let mut reserved = [0u8; 4];
        reserved.copy_from_slice(&bytes[12..16]);
        Some(Self {
            crc: u16::from_le_bytes([bytes[0], bytes[1]]),
            crc_shadow: u16::from_le_bytes([bytes[2], bytes[3]]),
            version: u16::from_le_bytes([bytes[4], bytes[5]]),
            len_words: u16::from_le_bytes([bytes[6], bytes[7]]),
            uid,
            reserved,
        })
    }

    pub fn to_bytes(&self) -> [u8; IMAGE_HEADER_SIZE] {
        let mut out = [0u8; IMAGE_HEADER_SIZE];
        out[0..2].copy_from_slice(&self.crc.to_le_bytes());
        out[2..4].copy_from_slice(&self.crc_shadow.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.len_words.to_le_bytes());
        out[8..12].copy_from_slice(&self.uid);
        out[12..16].copy_from_slice(&self.reserved);
        out
    }

    /// Image length in bytes
    pub fn byte_len(&self) -> usize {
        self.len_words as usize * 4
    }

    pub fn total_blocks(&self) -> u16 {
        self.byte_len().div_ceil(OAD_BLOCK_SIZE) as u16
    }

    /// Bytes used in the last block (0 when the image ends on a block edge)
    pub fn remainder_bytes(&self) -> u16 {
        (self.byte_len() % OAD_BLOCK_SIZE) as u16
    }

    /// Stored CRC is not a sentinel
    pub fn has_image(&self) -> bool {
        !CRC_SENTINELS.contains(&self.crc)
    }

    /// Ready flag for the bootloader
    pub fn is_ready(&self) -> bool {
        self.has_image() && self.crc == self.crc_shadow
    }

    /// Version as `MM.mm`
    pub fn version_string(&self) -> String {
        format!("{:02}.{:02}", self.version >> 8, self.version & 0xFF)
    }
}

/// Build a complete image around `body`
///
/// The body is padded with 0xFF to a word boundary, the CRC is computed and
/// the shadow is left erased (0xFFFF) for the target to set on finalize.
pub fn build_image(version: u16, uid: [u8; 4], body: &[u8]) -> Vec<u8> {
    let unpadded = IMAGE_HEADER_SIZE + body.len();
    let len = unpadded.div_ceil(4) * 4;
    let mut image = vec![0xFFu8; len];
    image[IMAGE_HEADER_SIZE..unpadded].copy_from_slice(body);

    let mut header = ImageHeader {
        crc: 0,
        crc_shadow: 0xFFFF,
        version,
        len_words: (len / 4) as u16,
        uid,
        reserved: [0xFF; 4],
    };
    image[..IMAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    header.crc = crc16(&image[IMAGE_CRC_START..]);
    image[..IMAGE_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = ImageHeader {
            crc: 0x1234,
            crc_shadow: 0xFFFF,
            version: 0x0301,
            len_words: 40,
            uid: *b"WSN1",
            reserved: [0xFF; 4],
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..8], &[0x34, 0x12, 0xFF, 0xFF, 0x01, 0x03, 40, 0]);
        assert_eq!(ImageHeader::parse(&bytes), Some(header));
        assert_eq!(header.byte_len(), 160);
        assert_eq!(header.total_blocks(), 5);
        assert_eq!(header.version_string(), "03.01");
    }

    #[test]
    fn test_total_blocks_rounds_up() {
        let header = ImageHeader {
            len_words: 9,
            ..ImageHeader::default()
        };
        assert_eq!(header.total_blocks(), 2);
        assert_eq!(header.remainder_bytes(), 4);
        assert_eq!(ImageHeader::default().total_blocks(), 0);
    }

    #[test]
    fn test_build_image_crc() {
        let image = build_image(0x0102, *b"WSN1", &[0xAB; 100]);
        assert_eq!(image.len() % 4, 0);
        let header = ImageHeader::parse(&image).unwrap();
        assert_eq!(header.byte_len(), image.len());
        assert_eq!(header.crc, crc16(&image[IMAGE_CRC_START..]));
        assert!(header.has_image());
        assert!(!header.is_ready());
    }

    #[test]
    fn test_sentinel_crc() {
        let mut header = ImageHeader::default();
        assert!(!header.has_image());
        header.crc = 0xFFFF;
        header.crc_shadow = 0xFFFF;
        assert!(!header.is_ready());
    }
}
