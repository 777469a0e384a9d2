// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor node runtime
//!
//! ```text
//!  Sensor --> sampling task --push--> SampleQueue --front--> transfer task --> ArqGate --> radio
//!                  ^                                             |
//!                  +------ Start / Stop / Pause (ack commands) --+--> NodeEvent
//! ```
//!
//! The sampling task fills queue slots in place and throttles itself while
//! the queue overruns. The transfer task pops a sample only after its ack,
//! acts on piggy-backed commands and runs firmware updates.

mod sampler;
mod sensor;
mod transfer;

pub use sensor::{Sensor, SimSensor};
pub use transfer::FIRMWARE_NAME;

use crate::arq::{ArqEngine, ArqGate, ArqReport, ArqRequest, ArqStats};
use crate::config::WsnConfig;
use crate::error::{Error, Result};
use crate::oad::{ImageStore, OadTarget};
use crate::packet::{self, InvalidPacket, NodeCommand, PacketBody, PacketOptions, PacketType};
use crate::queue::{BoundedQueue, DataItem};
use crate::radio::Radio;
use crossbeam::channel::{unbounded, Receiver, Sender};
use sampler::{Sampler, SamplerControl};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use transfer::Transfer;

/// Largest sample, a CRC-protected frame's DATA
pub const SAMPLE_SLOT: usize = packet::max_data_len(PacketOptions::CRC);

/// Queue slots; one stays free, so this holds `NODE_QUEUE_SLOTS - 1` samples
pub const NODE_QUEUE_SLOTS: usize = 8;

pub(crate) type SampleQueue = BoundedQueue<Sample, NODE_QUEUE_SLOTS>;

/// One queued reading
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sample {
    pub packet_type: PacketType,
    pub data: DataItem<SAMPLE_SLOT>,
}

impl Sample {
    /// `None` when `data` does not fit a slot
    pub fn new(packet_type: PacketType, data: &[u8]) -> Option<Self> {
        Some(Self {
            packet_type,
            data: DataItem::from_slice(data)?,
        })
    }

    /// Packet body to send, `None` for readings that do not fit their type
    pub fn to_body(&self) -> Option<PacketBody> {
        match self.packet_type {
            PacketType::Ack | PacketType::OadFragment => None,
            packet_type => PacketBody::from_payload(packet_type, self.data.as_slice()).ok(),
        }
    }
}

/// What a node reports to its application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Payload of a `Downlink` command
    Downlink(Vec<u8>),
    /// Any other command taken from an ack
    Command(NodeCommand),
    /// `true` when the queue overran, `false` once it drains
    Overrun(bool),
    /// New image finalized; the node has stopped
    OadCompleted { version: String },
    OadFailed(String),
}

/// Handle to a running node
pub struct Node<R: Radio> {
    address: u8,
    gate: Arc<ArqGate<R>>,
    queue: Arc<SampleQueue>,
    sampler: Sender<SamplerControl>,
    events: Receiver<NodeEvent>,
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl<R: Radio + 'static> Node<R> {
    /// Join the network with `radio`, then start sampling and transfer tasks
    ///
    /// `store` receives firmware updates and reports the running version.
    pub fn spawn<Sn, S>(mut radio: R, sensor: Sn, store: S, config: &WsnConfig) -> Result<Self>
    where
        Sn: Sensor + 'static,
        S: ImageStore + 'static,
    {
        config.validate()?;
        radio.set_frequency(config.radio.frequency_hz)?;
        radio.set_power(config.radio.power_dbm)?;

        let mut engine = ArqEngine::new(radio, config.arq_settings());
        let address = match config.node.address {
            Some(address) => {
                engine.connect(address)?;
                address
            }
            None => engine.connect_random()?,
        };

        let gate = Arc::new(ArqGate::new(engine));
        let queue = Arc::new(SampleQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        let (control_tx, control_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();

        let sampler = Sampler::new(
            sensor,
            Arc::clone(&queue),
            control_rx,
            events_tx.clone(),
            Duration::from_millis(config.node.sample_period_ms),
            Duration::from_millis(config.node.overrun_sleep_ms),
            config.node.auto_start,
        );
        let transfer = Transfer::new(
            address,
            Arc::clone(&gate),
            Arc::clone(&queue),
            control_tx.clone(),
            events_tx,
            Arc::clone(&running),
            OadTarget::new(store, config.oad.max_retries),
            Duration::from_millis(config.oad.block_request_period_ms),
        );

        let mut threads = Vec::with_capacity(2);
        threads.push(
            thread::Builder::new()
                .name(format!("rfwsn-sampler-{:02x}", address))
                .spawn(move || sampler.run())?,
        );
        let transfer_thread = thread::Builder::new()
            .name(format!("rfwsn-transfer-{:02x}", address))
            .spawn(move || transfer.run());
        match transfer_thread {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                let _ = control_tx.send(SamplerControl::Shutdown);
                return Err(e.into());
            }
        }

        log::info!("[node] {:#04x} joined", address);
        Ok(Self {
            address,
            gate,
            queue,
            sampler: control_tx,
            events: events_rx,
            running,
            threads,
        })
    }
}

impl<R: Radio> Node<R> {
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Commands, downlinks, overruns and update results
    pub fn events(&self) -> &Receiver<NodeEvent> {
        &self.events
    }

    /// Samples waiting for an ack
    pub fn queue_count(&self) -> usize {
        self.queue.count()
    }

    /// `false` once stopped, including after a firmware update
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Queue an application packet behind the pending samples
    pub fn enqueue(&self, body: &PacketBody) -> Result<()> {
        let sample = Sample::new(body.packet_type(), &body.to_payload())
            .ok_or(Error::InvalidPacket(InvalidPacket::LengthOverflow))?;
        if sample.to_body().is_none() {
            return Err(Error::InvalidPacket(InvalidPacket::Malformed));
        }
        if !self.queue.push(sample) {
            return Err(Error::QueueFull);
        }
        Ok(())
    }

    pub fn start_sampling(&self) -> Result<()> {
        Ok(self.sampler.send(SamplerControl::Start)?)
    }

    pub fn stop_sampling(&self) -> Result<()> {
        Ok(self.sampler.send(SamplerControl::Stop)?)
    }

    /// Ask the concentrator to restart its receive statistics
    pub fn test_reset(&self) -> Result<ArqReport> {
        self.gate
            .send(&ArqRequest::to_concentrator(PacketBody::TestReset))?
            .into_result()
    }

    pub fn arq_stats(&self) -> ArqStats {
        self.gate.acquire().stats()
    }

    /// Stop both tasks and wait for them
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.sampler.send(SamplerControl::Shutdown);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("[node] {:#04x} task panicked", self.address);
            }
        }
    }
}

impl<R: Radio> Drop for Node<R> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<R: Radio> std::fmt::Debug for Node<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("queued", &self.queue.count())
            .field("running", &self.is_running())
            .finish()
    }
}
