// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive statistics

/// Packet counters for one window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxCounters {
    pub received: u32,
    pub successful: u32,
    pub bytes: u64,
}

/// Counters since the last test reset, and since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxStats {
    pub interval: RxCounters,
    pub total: RxCounters,
}

impl RxStats {
    /// Count one frame of `len` bytes
    ///
    /// An invalid frame counts as received but not successful.
    pub fn record(&mut self, len: usize, valid: bool) {
        for counters in [&mut self.interval, &mut self.total] {
            counters.received += 1;
            counters.bytes += len as u64;
            if valid {
                counters.successful += 1;
            }
        }
    }

    /// Start a new interval
    pub fn reset_interval(&mut self) {
        self.interval = RxCounters::default();
    }

    /// Percentage of the interval's frames that decoded
    pub fn success_rate(&self) -> u32 {
        if self.interval.received == 0 {
            return 0;
        }
        let rate = u64::from(self.interval.successful) * 100 / u64::from(self.interval.received);
        rate as u32
    }
}
