// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resettable countdown

use std::time::{Duration, Instant};

/// One-shot countdown that can be stopped and rearmed
///
/// Time is passed in by the caller so owners can drive it from their own
/// loop tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    period: Duration,
    deadline: Option<Instant>,
}

impl Countdown {
    pub const fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Stop, then start a full period from `now`
    pub fn rearm(&mut self, now: Instant) {
        self.deadline = Some(now + self.period);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    /// `true` once, when an armed countdown has run out; it is then stopped
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
