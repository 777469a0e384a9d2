// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transfer task: queue to concentrator, and whatever the acks bring back
//!
//! A sample leaves the queue only once the concentrator acked it. Commands
//! piggy-backed on acks and OAD frames that follow a pending ack are handled
//! here, so a firmware update runs on this thread while sampling goes on.

use super::sampler::SamplerControl;
use super::{NodeEvent, Sample, SampleQueue};
use crate::arq::{ArqGate, ArqReport, ArqRequest};
use crate::oad::{ImageSelector, ImageStore, OadMessage, OadPhase, OadTarget};
use crate::packet::{AckCommand, NodeCommand, Packet, PacketBody, PacketType};
use crate::radio::Radio;
use crossbeam::channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Wait for a sample before checking the running flag again
const QUEUE_POLL: Duration = Duration::from_millis(50);

/// Pause after the engine itself failed (not a missing ack)
const SEND_BACKOFF: Duration = Duration::from_millis(100);

/// Name reported in `FwVersionRsp`
pub const FIRMWARE_NAME: &str = "rfWsnNode";

/// Acts on the commands piggy-backed on acks
struct CommandSink {
    address: u8,
    queue: Arc<SampleQueue>,
    sampler: Sender<SamplerControl>,
    events: Sender<NodeEvent>,
}

impl CommandSink {
    fn on_ack(&self, ack: &AckCommand) {
        if ack.device_id == self.address {
            self.on_command(NodeCommand::from_ack(ack));
        } else {
            log::debug!("[transfer] command for {:#04x} ignored", ack.device_id);
        }
    }

    fn on_command(&self, command: NodeCommand) {
        log::debug!("[transfer] command {:#04x}", command.code());
        match &command {
            NodeCommand::Ping => log::info!("[transfer] ping from concentrator"),
            NodeCommand::Downlink(data) => {
                let _ = self.events.send(NodeEvent::Downlink(data.clone()));
                return;
            }
            NodeCommand::TransferStart => self.control(SamplerControl::Start),
            NodeCommand::TransferStop => self.control(SamplerControl::Stop),
            NodeCommand::Sleep(duration) => self.control(SamplerControl::Pause(*duration)),
            NodeCommand::DataCount => self.report_count(command.reply_code()),
            NodeCommand::Unknown(code) => log::warn!("[transfer] unknown command {:#04x}", code),
        }
        let _ = self.events.send(NodeEvent::Command(command));
    }

    fn control(&self, control: SamplerControl) {
        if self.sampler.send(control).is_err() {
            log::debug!("[transfer] sampler gone, {:?} dropped", control);
        }
    }

    /// Queue `[reply_code, count_hi, count_lo]` as raw data
    fn report_count(&self, reply_code: u8) {
        let count = u16::try_from(self.queue.count()).unwrap_or(u16::MAX);
        let [hi, lo] = count.to_be_bytes();
        let pushed = Sample::new(PacketType::RawData, &[reply_code, hi, lo])
            .map(|sample| self.queue.push(sample))
            .unwrap_or(false);
        if !pushed {
            log::warn!("[transfer] queue full, data count {} not reported", count);
        }
    }
}

pub(crate) struct Transfer<R: Radio, S: ImageStore> {
    gate: Arc<ArqGate<R>>,
    queue: Arc<SampleQueue>,
    commands: CommandSink,
    running: Arc<AtomicBool>,
    oad: OadTarget<S>,
    block_request_period: Duration,
}

impl<R: Radio, S: ImageStore> Transfer<R, S> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        address: u8,
        gate: Arc<ArqGate<R>>,
        queue: Arc<SampleQueue>,
        sampler: Sender<SamplerControl>,
        events: Sender<NodeEvent>,
        running: Arc<AtomicBool>,
        oad: OadTarget<S>,
        block_request_period: Duration,
    ) -> Self {
        Self {
            gate,
            commands: CommandSink {
                address,
                queue: Arc::clone(&queue),
                sampler,
                events,
            },
            queue,
            running,
            oad,
            block_request_period,
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!("[transfer] started for {:#04x}", self.commands.address);
        while self.running.load(Ordering::Acquire) {
            let Some(sample) = self.queue.front_timeout(QUEUE_POLL) else {
                continue;
            };
            let Some(body) = sample.to_body() else {
                log::warn!("[transfer] dropping unsendable {:?} sample", sample.packet_type);
                self.queue.try_pop();
                continue;
            };
            match self.gate.send(&ArqRequest::to_concentrator(body)) {
                Ok(report) if report.is_success() => {
                    self.queue.try_pop();
                    self.on_report(report);
                }
                Ok(report) => {
                    log::debug!(
                        "[transfer] no ack after {} retries, sample kept",
                        report.retries_done
                    );
                }
                Err(e) => {
                    log::warn!("[transfer] send failed: {}", e);
                    thread::sleep(SEND_BACKOFF);
                }
            }
        }
        log::debug!("[transfer] stopped");
    }

    fn on_report(&mut self, report: ArqReport) {
        if let Some(ack) = &report.ack_command {
            self.commands.on_ack(ack);
        }
        if let Some(packet) = report.follow_up {
            self.on_follow_up(packet);
        }
    }

    fn on_follow_up(&mut self, packet: Packet) {
        let PacketBody::OadFragment(bytes) = packet.body else {
            log::debug!("[transfer] unexpected follow-up {}", packet);
            return;
        };
        match OadMessage::decode(&bytes) {
            Ok(OadMessage::FwVersionReq) => {
                let version = OadMessage::FwVersionRsp {
                    version: self.firmware_version(),
                };
                if let Some(report) = self.send_oad(&version) {
                    self.on_report(report);
                }
            }
            Ok(OadMessage::ImgIdentifyReq { metadata, .. }) => self.update(&metadata),
            Ok(other) => log::debug!("[transfer] OAD message {:?} ignored", other),
            Err(e) => log::warn!("[transfer] bad OAD fragment: {}", e),
        }
    }

    fn firmware_version(&mut self) -> String {
        let store = self.oad.store_mut();
        let version = store
            .identify(ImageSelector::Running)
            .map(|header| format!("{} v{}", FIRMWARE_NAME, header.version_string()))
            .unwrap_or_else(|| FIRMWARE_NAME.to_string());
        store.close();
        version
    }

    fn send_oad(&self, message: &OadMessage) -> Option<ArqReport> {
        let request = ArqRequest::to_concentrator(PacketBody::OadFragment(message.encode()));
        match self.gate.send(&request) {
            Ok(report) if report.is_success() => Some(report),
            Ok(_) => {
                log::debug!("[transfer] {:?} not acked", message);
                None
            }
            Err(e) => {
                log::warn!("[transfer] cannot send {:?}: {}", message, e);
                None
            }
        }
    }

    /// Receive a new image block by block, then stop the node
    fn update(&mut self, metadata: &[u8]) {
        let response = self.oad.on_identify(metadata);
        // a lost response is fine: the first block request starts the server
        if let Some(ack) = self.send_oad(&response).and_then(|report| report.ack_command) {
            self.commands.on_ack(&ack);
        }
        if self.oad.state().phase != OadPhase::Transferring {
            log::info!("[transfer] image update refused");
            return;
        }
        log::info!(
            "[transfer] receiving image of {} blocks",
            self.oad.state().total_blocks
        );

        let gate = &self.gate;
        let commands = &self.commands;
        let running = &self.running;
        let period = self.block_request_period;
        let result = self.oad.run_transfer(|request| {
            if !running.load(Ordering::Acquire) {
                return None;
            }
            let answer = request_block(gate, commands, request);
            if answer.is_none() {
                thread::sleep(period);
            }
            answer
        });

        match result {
            Ok(()) => {
                let store = self.oad.store_mut();
                let version = store
                    .identify(ImageSelector::Stored)
                    .map(|header| header.version_string())
                    .unwrap_or_default();
                store.close();
                log::info!("[transfer] image {} ready, restarting", version);
                self.running.store(false, Ordering::Release);
                self.commands.control(SamplerControl::Shutdown);
                let _ = self.commands.events.send(NodeEvent::OadCompleted { version });
            }
            Err(e) => {
                log::warn!("[transfer] image update failed: {}", e);
                let _ = self.commands.events.send(NodeEvent::OadFailed(e.to_string()));
            }
        }
    }
}

/// One block request; the answer rides on the follow-up frame
///
/// A command carried by the ack is handled before the answer is returned.
fn request_block<R: Radio>(
    gate: &ArqGate<R>,
    commands: &CommandSink,
    request: &OadMessage,
) -> Option<OadMessage> {
    let body = PacketBody::OadFragment(request.encode());
    let report = gate.send(&ArqRequest::to_concentrator(body)).ok()?;
    if let Some(ack) = &report.ack_command {
        commands.on_ack(ack);
    }
    match report.follow_up?.body {
        PacketBody::OadFragment(bytes) => OadMessage::decode(&bytes).ok(),
        _ => None,
    }
}
