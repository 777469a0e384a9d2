// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ARQ engine and single-outstanding gate

use super::{
    ArqAction, ArqEvent, ArqOperation, ArqReport, ArqResult, DEFAULT_ACK_TIMEOUT,
    DEFAULT_MAX_RETRIES,
};
use crate::error::Result;
use crate::packet::{
    self, Packet, PacketBody, PacketHeader, PacketOptions, PacketType, CONCENTRATOR_ADDRESS,
};
use crate::radio::{Radio, RadioError, RadioEvent, BROADCAST_ADDRESS};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// Engine-wide defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArqSettings {
    pub max_retries: u8,
    pub ack_timeout: Duration,
    /// Window for the frame announced by a pending ack
    pub follow_up_timeout: Duration,
    /// Set the CRC option on every outgoing frame
    pub use_crc: bool,
}

impl Default for ArqSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            follow_up_timeout: DEFAULT_ACK_TIMEOUT,
            use_crc: true,
        }
    }
}

/// Counters kept across operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArqStats {
    pub operations: u32,
    pub transmissions: u32,
    pub acked: u32,
    pub failed: u32,
    pub not_connected: u32,
}

/// One send request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArqRequest {
    pub dest: u8,
    pub body: PacketBody,
    /// Override for [`ArqSettings::max_retries`]
    pub max_retries: Option<u8>,
    /// Override for [`ArqSettings::ack_timeout`]
    pub ack_timeout: Option<Duration>,
}

impl ArqRequest {
    pub fn new(dest: u8, body: PacketBody) -> Self {
        Self {
            dest,
            body,
            max_retries: None,
            ack_timeout: None,
        }
    }

    /// Request addressed to the concentrator
    pub fn to_concentrator(body: PacketBody) -> Self {
        Self::new(CONCENTRATOR_ADDRESS, body)
    }

    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = Some(timeout);
        self
    }
}

/// Runs ARQ operations against a radio, one at a time
///
/// `send` takes `&mut self`; share the engine through an [`ArqGate`].
pub struct ArqEngine<R: Radio> {
    radio: R,
    inbox: Receiver<RadioEvent>,
    address: Option<u8>,
    settings: ArqSettings,
    stats: ArqStats,
}

impl<R: Radio> ArqEngine<R> {
    /// Take ownership of `radio` and route its receive path into the engine
    pub fn new(mut radio: R, settings: ArqSettings) -> Self {
        let (tx, rx) = unbounded();
        radio.receive_async(tx);
        Self {
            radio,
            inbox: rx,
            address: None,
            settings,
            stats: ArqStats::default(),
        }
    }

    /// Complete the address assignment and enable the radio address filter
    pub fn connect(&mut self, address: u8) -> core::result::Result<(), RadioError> {
        if address == CONCENTRATOR_ADDRESS || address == BROADCAST_ADDRESS {
            return Err(RadioError::InvalidParameter(format!(
                "node address {:#04x} is reserved",
                address
            )));
        }
        self.radio.enable_address_filter(address);
        self.address = Some(address);
        log::debug!("[arq] link connected as {:#04x}", address);
        Ok(())
    }

    /// Pick a random node address and connect with it
    pub fn connect_random(&mut self) -> core::result::Result<u8, RadioError> {
        let address = fastrand::u8(1..BROADCAST_ADDRESS);
        self.connect(address)?;
        Ok(address)
    }

    pub fn address(&self) -> Option<u8> {
        self.address
    }

    pub fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    pub fn settings(&self) -> &ArqSettings {
        &self.settings
    }

    pub fn stats(&self) -> ArqStats {
        self.stats
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Send `request` and wait for its ack
    ///
    /// Blocks for at most `ack_timeout * (max_retries + 1)`, plus the
    /// follow-up window when the ack announces one. Returns `Err` only if
    /// the body cannot be framed.
    pub fn send(&mut self, request: &ArqRequest) -> Result<ArqReport> {
        let max_retries = request.max_retries.unwrap_or(self.settings.max_retries);
        let ack_timeout = request.ack_timeout.unwrap_or(self.settings.ack_timeout);
        self.stats.operations += 1;

        let Some(source) = self.address else {
            self.stats.not_connected += 1;
            let mut op = ArqOperation::new(request.dest, Vec::new(), max_retries, ack_timeout);
            op.reject_not_connected();
            log::debug!("[arq] send to {:#04x} rejected: not connected", request.dest);
            return Ok(ArqReport {
                result: op.result(),
                retries_done: 0,
                transmissions: 0,
                ack_command: None,
                follow_up: None,
            });
        };

        let options = if self.settings.use_crc {
            PacketOptions::CRC
        } else {
            PacketOptions::NONE
        };
        let header = PacketHeader::new(source, request.body.packet_type(), options);
        let frame = packet::encode(&header, &request.body.to_payload())?;

        // Frames that arrived outside a receive window are stale
        while self.inbox.try_recv().is_ok() {}

        let mut op = ArqOperation::new(request.dest, frame, max_retries, ack_timeout);
        let mut transmissions = 0u8;
        let mut action = op.start();

        let result = loop {
            action = match action {
                ArqAction::Transmit => {
                    transmissions = transmissions.saturating_add(1);
                    self.stats.transmissions += 1;
                    log::trace!(
                        "[arq] tx #{} to {:#04x}: {:02x?}",
                        transmissions,
                        op.dest(),
                        op.frame()
                    );
                    match self.radio.transmit(op.dest(), op.frame()) {
                        Ok(()) => op.on_event(ArqEvent::Transmitted),
                        Err(e) => {
                            log::warn!("[arq] transmit to {:#04x} failed: {}", op.dest(), e);
                            op.on_event(ArqEvent::TransmitFailed)
                        }
                    }
                }
                ArqAction::AwaitAck(window) => {
                    let event = self.await_ack(op.dest(), window);
                    if matches!(event, ArqEvent::Timeout | ArqEvent::InvalidFrame) {
                        log::debug!(
                            "[arq] no ack from {:#04x} ({:?}), retries done {}",
                            op.dest(),
                            event,
                            op.retries_done()
                        );
                    }
                    op.on_event(event)
                }
                ArqAction::Resolve(result) => break result,
                ArqAction::Ignore => break op.result(),
            };
        };

        let follow_up = if result == ArqResult::Success && op.follow_up_pending() {
            self.await_follow_up(op.dest())
        } else {
            None
        };

        match result {
            ArqResult::Success => self.stats.acked += 1,
            _ => {
                self.stats.failed += 1;
                log::warn!(
                    "[arq] send to {:#04x} failed after {} transmissions",
                    op.dest(),
                    transmissions
                );
            }
        }

        Ok(ArqReport {
            result,
            retries_done: op.retries_done(),
            transmissions,
            ack_command: op.take_ack_command(),
            follow_up,
        })
    }

    fn await_ack(&mut self, dest: u8, window: Duration) -> ArqEvent {
        match self.inbox.recv_timeout(window) {
            Ok(event) => match packet::decode(&event.frame, event.rssi) {
                Ok(Packet {
                    header,
                    body: PacketBody::Ack(command),
                    ..
                }) if header.source == dest => ArqEvent::AckReceived {
                    command,
                    pending: header.options.contains(PacketOptions::PENDING),
                },
                Ok(other) => {
                    log::debug!("[arq] unexpected {} while awaiting ack", other);
                    ArqEvent::InvalidFrame
                }
                Err(e) => {
                    log::warn!("[arq] invalid packet while awaiting ack: {}", e);
                    ArqEvent::InvalidFrame
                }
            },
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                ArqEvent::Timeout
            }
        }
    }

    fn await_follow_up(&mut self, dest: u8) -> Option<Packet> {
        let event = self.inbox.recv_timeout(self.settings.follow_up_timeout).ok()?;
        match packet::decode(&event.frame, event.rssi) {
            Ok(packet) if packet.source() == dest && packet.packet_type() != PacketType::Ack => {
                Some(packet)
            }
            Ok(packet) => {
                log::debug!("[arq] dropped follow-up {}", packet);
                None
            }
            Err(e) => {
                log::warn!("[arq] invalid follow-up frame: {}", e);
                None
            }
        }
    }
}

/// Mutual-exclusion gate around an [`ArqEngine`]
///
/// Holding an [`ArqPermit`] is the only way to reach `send` once the engine
/// is shared; a second caller blocks in [`acquire`](Self::acquire) until the
/// first permit is dropped.
pub struct ArqGate<R: Radio> {
    engine: Mutex<ArqEngine<R>>,
}

impl<R: Radio> ArqGate<R> {
    pub fn new(engine: ArqEngine<R>) -> Self {
        Self {
            engine: Mutex::new(engine),
        }
    }

    pub fn acquire(&self) -> ArqPermit<'_, R> {
        ArqPermit {
            guard: self.engine.lock(),
        }
    }

    pub fn try_acquire(&self) -> Option<ArqPermit<'_, R>> {
        self.engine.try_lock().map(|guard| ArqPermit { guard })
    }

    /// Acquire, send, release
    pub fn send(&self, request: &ArqRequest) -> Result<ArqReport> {
        self.acquire().send(request)
    }

    pub fn into_inner(self) -> ArqEngine<R> {
        self.engine.into_inner()
    }
}

/// Exclusive access to the engine behind an [`ArqGate`]
pub struct ArqPermit<'a, R: Radio> {
    guard: MutexGuard<'a, ArqEngine<R>>,
}

impl<R: Radio> Deref for ArqPermit<'_, R> {
    type Target = ArqEngine<R>;

    fn deref(&self) -> &ArqEngine<R> {
        &self.guard
    }
}

impl<R: Radio> DerefMut for ArqPermit<'_, R> {
    fn deref_mut(&mut self) -> &mut ArqEngine<R> {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{AckCommand, NodeCommand};
    use crossbeam::channel::Sender;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    /// Radio that answers the Nth transmission with scripted frames
    struct ScriptedRadio {
        inbox: Option<Sender<RadioEvent>>,
        transmissions: Arc<AtomicUsize>,
        ack_on: Option<usize>,
        replies: Vec<Vec<u8>>,
        last_frames: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl ScriptedRadio {
        fn new(ack_on: Option<usize>, replies: Vec<Vec<u8>>) -> Self {
            Self {
                inbox: None,
                transmissions: Arc::new(AtomicUsize::new(0)),
                ack_on,
                replies,
                last_frames: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl Radio for ScriptedRadio {
        fn transmit(&mut self, _dest: u8, frame: &[u8]) -> core::result::Result<(), RadioError> {
            let n = self.transmissions.fetch_add(1, Ordering::SeqCst) + 1;
            self.last_frames.lock().push(frame.to_vec());
            if Some(n) == self.ack_on {
                if let Some(inbox) = &self.inbox {
                    for reply in &self.replies {
                        let _ = inbox.send(RadioEvent {
                            frame: reply.clone(),
                            rssi: -50,
                        });
                    }
                }
            }
            Ok(())
        }

        fn receive_async(&mut self, inbox: Sender<RadioEvent>) {
            self.inbox = Some(inbox);
        }

        fn enable_address_filter(&mut self, _own_address: u8) {}

        fn rssi(&self) -> i8 {
            -50
        }

        fn frequency(&self) -> u32 {
            868_000_000
        }

        fn set_frequency(&mut self, _hz: u32) -> core::result::Result<(), RadioError> {
            Ok(())
        }

        fn power(&self) -> i8 {
            0
        }

        fn set_power(&mut self, _dbm: i8) -> core::result::Result<(), RadioError> {
            Ok(())
        }
    }

    fn ack_frame(options: PacketOptions, command: Option<AckCommand>) -> Vec<u8> {
        Packet::new(CONCENTRATOR_ADDRESS, options, PacketBody::Ack(command))
            .encode()
            .unwrap()
    }

    fn fast_settings() -> ArqSettings {
        ArqSettings {
            ack_timeout: Duration::from_millis(20),
            follow_up_timeout: Duration::from_millis(20),
            ..ArqSettings::default()
        }
    }

    fn data_request() -> ArqRequest {
        ArqRequest::to_concentrator(PacketBody::RawData(b"0123456789".to_vec()))
    }

    #[test]
    fn test_send_fails_after_max_retries_plus_one() {
        let radio = ScriptedRadio::new(None, Vec::new());
        let count = Arc::clone(&radio.transmissions);
        let mut engine = ArqEngine::new(radio, fast_settings());
        engine.connect(0x31).unwrap();

        let start = Instant::now();
        let report = engine.send(&data_request()).unwrap();
        assert_eq!(report.result, ArqResult::Failed);
        assert_eq!(report.transmissions, 3);
        assert_eq!(report.retries_done, 2);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(engine.stats().failed, 1);
    }

    #[test]
    fn test_send_succeeds_on_second_attempt() {
        let radio = ScriptedRadio::new(Some(2), vec![ack_frame(PacketOptions::NONE, None)]);
        let frames = Arc::clone(&radio.last_frames);
        let mut engine = ArqEngine::new(radio, fast_settings());
        engine.connect(0x31).unwrap();

        let report = engine.send(&data_request()).unwrap();
        assert_eq!(report.result, ArqResult::Success);
        assert_eq!(report.retries_done, 1);
        assert_eq!(report.transmissions, 2);

        // retransmission carries the exact same bytes
        let frames = frames.lock();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], frames[1]);
    }

    #[test]
    fn test_send_not_connected() {
        let radio = ScriptedRadio::new(Some(1), vec![ack_frame(PacketOptions::NONE, None)]);
        let count = Arc::clone(&radio.transmissions);
        let mut engine = ArqEngine::new(radio, fast_settings());

        let report = engine.send(&data_request()).unwrap();
        assert_eq!(report.result, ArqResult::FailedNotConnected);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reserved_addresses_rejected() {
        let radio = ScriptedRadio::new(None, Vec::new());
        let mut engine = ArqEngine::new(radio, fast_settings());
        assert!(engine.connect(CONCENTRATOR_ADDRESS).is_err());
        assert!(engine.connect(BROADCAST_ADDRESS).is_err());
        let addr = engine.connect_random().unwrap();
        assert!(addr != 0 && addr != BROADCAST_ADDRESS);
        assert_eq!(engine.address(), Some(addr));
    }

    #[test]
    fn test_piggy_backed_command_and_follow_up() {
        let command = NodeCommand::TransferStop.to_ack(0x31).unwrap();
        let follow = Packet::new(
            CONCENTRATOR_ADDRESS,
            PacketOptions::CRC,
            PacketBody::OadFragment(vec![0x00]),
        )
        .encode()
        .unwrap();
        let radio = ScriptedRadio::new(
            Some(1),
            vec![ack_frame(PacketOptions::PENDING, Some(command.clone())), follow],
        );
        let mut engine = ArqEngine::new(radio, fast_settings());
        engine.connect(0x31).unwrap();

        let report = engine.send(&data_request()).unwrap();
        assert!(report.is_success());
        assert_eq!(report.ack_command, Some(command));
        let follow_up = report.follow_up.unwrap();
        assert_eq!(follow_up.body, PacketBody::OadFragment(vec![0x00]));
    }

    #[test]
    fn test_foreign_ack_counts_as_invalid() {
        let foreign = Packet::new(0x55, PacketOptions::NONE, PacketBody::Ack(None))
            .encode()
            .unwrap();
        let radio = ScriptedRadio::new(Some(1), vec![foreign]);
        let mut engine = ArqEngine::new(radio, fast_settings());
        engine.connect(0x31).unwrap();

        let report = engine
            .send(&data_request().with_max_retries(0))
            .unwrap();
        assert_eq!(report.result, ArqResult::Failed);
        assert_eq!(report.transmissions, 1);
    }

    #[test]
    fn test_oversize_body_is_an_error() {
        let radio = ScriptedRadio::new(None, Vec::new());
        let mut engine = ArqEngine::new(radio, fast_settings());
        engine.connect(0x31).unwrap();
        let request = ArqRequest::to_concentrator(PacketBody::RawData(vec![0u8; 60]));
        assert!(engine.send(&request).is_err());
    }

    #[test]
    fn test_gate_serializes_senders() {
        let radio = ScriptedRadio::new(None, Vec::new());
        let mut engine = ArqEngine::new(radio, fast_settings());
        engine.connect(0x31).unwrap();
        let gate = Arc::new(ArqGate::new(engine));

        let permit = gate.acquire();
        assert!(gate.try_acquire().is_none());
        drop(permit);

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || {
                    gate.send(&data_request().with_max_retries(0)).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().transmissions, 1);
        }
        assert_eq!(gate.acquire().stats().operations, 2);
    }
}
