// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CRC-16 used by the radio framing and the OAD image check
//!
//! Polynomial 0x1021, MSB first, register initialised to zero. Data bits are
//! shifted into the register one at a time (augmented form), so two zero
//! bytes must be run through [`crc16_update`] after the data to flush the
//! register. The result equals CRC-16/XMODEM.

/// Generator polynomial
pub const CRC16_POLY: u16 = 0x1021;

/// Shift one byte into the CRC register
pub const fn crc16_update(crc: u16, byte: u8) -> u16 {
    let mut crc = crc;
    let mut val = byte;
    let mut i = 0;
    while i < 8 {
        let msb = crc & 0x8000;
        crc <<= 1;
        if val & 0x80 != 0 {
            crc |= 0x0001;
        }
        if msb != 0 {
            crc ^= CRC16_POLY;
        }
        val <<= 1;
        i += 1;
    }
    crc
}

/// CRC over a complete buffer, flush included
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.finish()
}

/// Incremental CRC for data read in chunks (flash pages)
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.value = crc16_update(self.value, byte);
        }
    }

    /// Run the two flush bytes and return the CRC
    pub fn finish(self) -> u16 {
        crc16_update(crc16_update(self.value, 0), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_answers() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(&[0x01]), 0x1021);
        assert_eq!(crc16(&[0x00]), 0x0000);
        assert_eq!(crc16(&[]), 0x0000);
        assert_eq!(crc16(&[0x00, 0x01]), 0x1021);
    }

    #[test]
    fn test_crc16_update_single_byte() {
        // 0x01 sits in the register until the flush shifts it past bit 15
        assert_eq!(crc16_update(0, 0x01), 0x0001);
        assert_eq!(crc16_update(crc16_update(0x0001, 0), 0), 0x1021);
    }

    #[test]
    fn test_crc16_incremental_matches_oneshot() {
        let data: Vec<u8> = (0u8..10).collect();
        let mut crc = Crc16::new();
        crc.update(&data[..3]);
        crc.update(&data[3..]);
        assert_eq!(crc.finish(), crc16(&data));
        assert_eq!(crc16(&data), 0x2378);
    }

    #[test]
    fn test_crc16_detects_bit_flip() {
        let mut data = *b"sensor payload";
        let good = crc16(&data);
        data[4] ^= 0x10;
        assert_ne!(crc16(&data), good);
    }
}
