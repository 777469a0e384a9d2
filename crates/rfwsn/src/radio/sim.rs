// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process radio medium
//!
//! Every [`SimRadio`] attached to the same [`SimAir`] hears the frames of
//! the others, subject to frequency match, address filter and an optional
//! loss model. Used by the integration tests and the `rfwsn-sim` tool.

use super::{check_frequency, check_power, Radio, RadioError, RadioEvent, BROADCAST_ADDRESS};
use crossbeam::channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;

/// Default RSSI reported for every delivered frame (dBm)
pub const DEFAULT_SIM_RSSI: i8 = -60;

const DEFAULT_FREQUENCY_HZ: u32 = 868_000_000;
const DEFAULT_POWER_DBM: i8 = 10;

/// Transmissions kept for [`SimAir::take_log`]; older ones are dropped
const LOG_CAPACITY: usize = 4096;

/// One frame put on the air
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    /// Station id of the sender
    pub station: usize,
    pub dest: u8,
    pub frame: Vec<u8>,
}

type LossModel = Box<dyn FnMut(&Transmission) -> bool + Send>;

struct Station {
    id: usize,
    filter: Option<u8>,
    inbox: Option<Sender<RadioEvent>>,
    frequency: u32,
    rssi: i8,
}

#[derive(Default)]
struct AirState {
    stations: Vec<Station>,
    next_id: usize,
    loss: Option<LossModel>,
    log: Vec<Transmission>,
    sent: usize,
}

/// Shared medium; clones refer to the same air
#[derive(Clone, Default)]
pub struct SimAir {
    state: Arc<Mutex<AirState>>,
}

impl SimAir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new station
    pub fn attach(&self) -> SimRadio {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.stations.push(Station {
            id,
            filter: None,
            inbox: None,
            frequency: DEFAULT_FREQUENCY_HZ,
            rssi: DEFAULT_SIM_RSSI,
        });
        SimRadio {
            id,
            air: self.clone(),
            frequency: DEFAULT_FREQUENCY_HZ,
            power: DEFAULT_POWER_DBM,
        }
    }

    /// Drop every transmission for which `model` returns `true`
    pub fn set_loss<F>(&self, model: F)
    where
        F: FnMut(&Transmission) -> bool + Send + 'static,
    {
        self.state.lock().loss = Some(Box::new(model));
    }

    pub fn clear_loss(&self) {
        self.state.lock().loss = None;
    }

    /// RSSI the station reports for frames it receives
    pub fn set_station_rssi(&self, station: usize, rssi: i8) {
        if let Some(s) = self.state.lock().stations.iter_mut().find(|s| s.id == station) {
            s.rssi = rssi;
        }
    }

    /// Number of frames put on the air, lost ones included
    pub fn transmissions(&self) -> usize {
        self.state.lock().sent
    }

    /// Frames put on the air since the last call, at most the latest 4096
    pub fn take_log(&self) -> Vec<Transmission> {
        std::mem::take(&mut self.state.lock().log)
    }

    fn transmit(&self, station: usize, dest: u8, frame: &[u8]) {
        let mut state = self.state.lock();
        let tx = Transmission {
            station,
            dest,
            frame: frame.to_vec(),
        };
        state.sent += 1;
        if state.log.len() == LOG_CAPACITY {
            state.log.remove(0);
        }
        state.log.push(tx.clone());

        let lost = match state.loss.as_mut() {
            Some(model) => model(&tx),
            None => false,
        };
        if lost {
            log::trace!("[sim-air] station {} frame to {:#04x} lost", station, dest);
            return;
        }

        let Some(frequency) = state
            .stations
            .iter()
            .find(|s| s.id == station)
            .map(|s| s.frequency)
        else {
            return;
        };

        for rx in state.stations.iter().filter(|s| s.id != station) {
            if rx.frequency != frequency {
                continue;
            }
            if let Some(own) = rx.filter {
                if dest != own && dest != BROADCAST_ADDRESS {
                    continue;
                }
            }
            if let Some(inbox) = &rx.inbox {
                let _ = inbox.send(RadioEvent {
                    frame: tx.frame.clone(),
                    rssi: rx.rssi,
                });
            }
        }
    }

    fn with_station<R>(&self, station: usize, f: impl FnOnce(&mut Station) -> R) -> Option<R> {
        self.state
            .lock()
            .stations
            .iter_mut()
            .find(|s| s.id == station)
            .map(f)
    }

    fn detach(&self, station: usize) {
        self.state.lock().stations.retain(|s| s.id != station);
    }
}

/// A station on a [`SimAir`]
pub struct SimRadio {
    id: usize,
    air: SimAir,
    frequency: u32,
    power: i8,
}

impl SimRadio {
    /// Station id, as reported in [`Transmission::station`]
    pub fn station(&self) -> usize {
        self.id
    }

    pub fn air(&self) -> &SimAir {
        &self.air
    }
}

impl Radio for SimRadio {
    fn transmit(&mut self, dest: u8, frame: &[u8]) -> Result<(), RadioError> {
        self.air.transmit(self.id, dest, frame);
        Ok(())
    }

    fn receive_async(&mut self, inbox: Sender<RadioEvent>) {
        self.air.with_station(self.id, |s| s.inbox = Some(inbox));
    }

    fn enable_address_filter(&mut self, own_address: u8) {
        self.air.with_station(self.id, |s| s.filter = Some(own_address));
    }

    fn rssi(&self) -> i8 {
        self.air
            .with_station(self.id, |s| s.rssi)
            .unwrap_or(DEFAULT_SIM_RSSI)
    }

    fn frequency(&self) -> u32 {
        self.frequency
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), RadioError> {
        check_frequency(hz)?;
        self.frequency = hz;
        self.air.with_station(self.id, |s| s.frequency = hz);
        Ok(())
    }

    fn power(&self) -> i8 {
        self.power
    }

    fn set_power(&mut self, dbm: i8) -> Result<(), RadioError> {
        check_power(dbm)?;
        self.power = dbm;
        Ok(())
    }
}

impl Drop for SimRadio {
    fn drop(&mut self) {
        self.air.detach(self.id);
    }
}
