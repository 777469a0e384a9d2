// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Concentrator radio task
//!
//! Owns the transceiver. Every valid frame from a node is handed to the
//! application task, which answers with the content of the ack (a
//! piggy-back command and/or a follow-up frame). The ack goes out as soon as
//! the answer arrives, or empty once `reply_timeout` expires.

use super::app::AppRequest;
use crate::packet::{self, AckCommand, Packet, PacketBody, PacketOptions, CONCENTRATOR_ADDRESS};
use crate::radio::{Radio, RadioError, RadioEvent};
use crossbeam::channel::{bounded, select, Receiver, Sender};
use std::time::Duration;

/// What the application wants sent back with an ack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct AckReply {
    pub command: Option<AckCommand>,
    /// Frame announced with PENDING and sent right after the ack
    pub follow_up: Option<PacketBody>,
}

/// Requests served by the radio task
pub(crate) enum RadioCommand {
    GetConfig(Sender<(u32, i8)>),
    SetFrequency(u32, Sender<Result<(), RadioError>>),
    SetPower(i8, Sender<Result<(), RadioError>>),
    Shutdown,
}

pub(crate) struct RadioTask<R: Radio> {
    radio: R,
    inbox: Receiver<RadioEvent>,
    commands: Receiver<RadioCommand>,
    app: Sender<AppRequest>,
    reply_timeout: Duration,
}

impl<R: Radio> RadioTask<R> {
    pub(crate) fn new(
        mut radio: R,
        commands: Receiver<RadioCommand>,
        app: Sender<AppRequest>,
        reply_timeout: Duration,
    ) -> Self {
        let (tx, inbox) = crossbeam::channel::unbounded();
        radio.receive_async(tx);
        radio.enable_address_filter(CONCENTRATOR_ADDRESS);
        Self {
            radio,
            inbox,
            commands,
            app,
            reply_timeout,
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!("[radio-task] started at {} Hz", self.radio.frequency());
        loop {
            select! {
                recv(self.inbox) -> event => match event {
                    Ok(event) => {
                        if !self.on_frame(event) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(self.commands) -> command => match command {
                    Ok(RadioCommand::Shutdown) | Err(_) => break,
                    Ok(command) => self.on_command(command),
                },
            }
        }
        log::debug!("[radio-task] stopped");
    }

    fn on_command(&mut self, command: RadioCommand) {
        match command {
            RadioCommand::GetConfig(reply) => {
                let _ = reply.send((self.radio.frequency(), self.radio.power()));
            }
            RadioCommand::SetFrequency(hz, reply) => {
                let _ = reply.send(self.radio.set_frequency(hz));
            }
            RadioCommand::SetPower(dbm, reply) => {
                let _ = reply.send(self.radio.set_power(dbm));
            }
            RadioCommand::Shutdown => {}
        }
    }

    /// `false` once the application task is gone
    fn on_frame(&mut self, event: RadioEvent) -> bool {
        let len = event.frame.len();
        let packet = match packet::decode(&event.frame, event.rssi) {
            Ok(packet) => packet,
            Err(error) => {
                log::warn!("[radio-task] invalid packet ({} bytes): {}", len, error);
                return self.app.send(AppRequest::Invalid { len, error }).is_ok();
            }
        };
        if matches!(packet.body, PacketBody::Ack(_)) {
            log::debug!("[radio-task] ignoring {}", packet);
            return true;
        }

        let source = packet.source();
        // rendezvous: a late answer fails on the app side instead of vanishing here
        let (reply_tx, reply_rx) = bounded(0);
        if self
            .app
            .send(AppRequest::Packet {
                packet,
                len,
                reply: reply_tx,
            })
            .is_err()
        {
            return false;
        }
        let reply = reply_rx.recv_timeout(self.reply_timeout);
        drop(reply_rx);
        let reply = reply.unwrap_or_else(|_| {
            log::debug!("[radio-task] no ack content for {:#04x} in time", source);
            AckReply::default()
        });
        self.send_ack(source, reply);
        true
    }

    fn send_ack(&mut self, dest: u8, reply: AckReply) {
        let mut options = PacketOptions::CRC;
        if reply.follow_up.is_some() {
            options = options | PacketOptions::PENDING;
        }
        let ack = Packet::new(CONCENTRATOR_ADDRESS, options, PacketBody::Ack(reply.command));
        self.transmit(dest, &ack);

        if let Some(body) = reply.follow_up {
            let frame = Packet::new(CONCENTRATOR_ADDRESS, PacketOptions::CRC, body);
            self.transmit(dest, &frame);
        }
    }

    fn transmit(&mut self, dest: u8, packet: &Packet) {
        let frame = match packet.encode() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("[radio-task] cannot frame {}: {}", packet, e);
                return;
            }
        };
        if let Err(e) = self.radio.transmit(dest, &frame) {
            log::warn!("[radio-task] transmit to {:#04x} failed: {}", dest, e);
        }
    }
}
