// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor collaborator and simulated sensors

use crate::packet::{DualModeSensorData, PacketBody, PacketType};

/// Produces one reading per sampling period
pub trait Sensor: Send {
    /// Write a reading into `buf` in its wire layout
    ///
    /// Returns the packet type and the number of bytes written, or `None`
    /// when there is nothing to report.
    fn sample(&mut self, buf: &mut [u8]) -> Option<(PacketType, usize)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimKind {
    Raw(usize),
    Adc,
    DualMode,
}

/// Deterministic pseudo-random sensor
#[derive(Debug, Clone)]
pub struct SimSensor {
    kind: SimKind,
    rng: fastrand::Rng,
    ticks: u32,
}

impl SimSensor {
    /// Raw payloads of `len` bytes
    pub fn raw(len: usize, seed: u64) -> Self {
        Self::with_kind(SimKind::Raw(len), seed)
    }

    /// 12-bit ADC readings
    pub fn adc(seed: u64) -> Self {
        Self::with_kind(SimKind::Adc, seed)
    }

    /// ADC, battery and button readings
    pub fn dual_mode(seed: u64) -> Self {
        Self::with_kind(SimKind::DualMode, seed)
    }

    fn with_kind(kind: SimKind, seed: u64) -> Self {
        Self {
            kind,
            rng: fastrand::Rng::with_seed(seed),
            ticks: 0,
        }
    }
}

impl Sensor for SimSensor {
    fn sample(&mut self, buf: &mut [u8]) -> Option<(PacketType, usize)> {
        self.ticks = self.ticks.wrapping_add(1);
        let (packet_type, bytes) = match self.kind {
            SimKind::Raw(len) => {
                let out = buf.get_mut(..len)?;
                self.rng.fill(out);
                return Some((PacketType::RawData, len));
            }
            SimKind::Adc => {
                let adc_value = self.rng.u16(..0x1000);
                (PacketType::AdcSensor, adc_value.to_be_bytes().to_vec())
            }
            SimKind::DualMode => {
                let body = PacketBody::DualModeSensor(DualModeSensorData {
                    adc_value: self.rng.u16(..0x1000),
                    battery_mv: self.rng.u16(2800..3300),
                    time_100ms: self.ticks.wrapping_mul(10),
                    button: u8::from(self.rng.u8(..10) == 0),
                });
                (PacketType::DualModeSensor, body.to_payload())
            }
        };
        let out = buf.get_mut(..bytes.len())?;
        out.copy_from_slice(&bytes);
        Some((packet_type, bytes.len()))
    }
}
