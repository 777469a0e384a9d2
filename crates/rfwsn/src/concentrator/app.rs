// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Concentrator application task
//!
//! Single owner of the node table, the OAD server and the per-node pending
//! downlinks. Everything reaches it as an [`AppRequest`]; between requests
//! it ticks the OAD abort countdown.

use super::radio_task::{AckReply, RadioCommand};
use super::stats::RxStats;
use crate::console::{self, ConsoleCommand, ConsoleReply};
use crate::error::{Error, Result};
use crate::node_table::{NodeRecord, NodeTable, NodeUpdate};
use crate::oad::{
    BlockOutcome, ImageHeader, ImageSelector, ImageStore, ImageUploader, OadMessage, OadServer,
    OadTransferState,
};
use crate::packet::{AckCommand, InvalidPacket, NodeCommand, Packet, PacketBody};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Byte stream an image can be uploaded from
pub trait SerialLink: Read + Write + Send {}

impl<T: Read + Write + Send> SerialLink for T {}

pub(crate) enum AppRequest {
    Packet {
        packet: Packet,
        len: usize,
        reply: Sender<AckReply>,
    },
    Invalid {
        len: usize,
        error: InvalidPacket,
    },
    Console {
        line: String,
        reply: Sender<String>,
    },
    Upload {
        link: Box<dyn SerialLink>,
        reply: Sender<Result<u16>>,
    },
    Nodes(Sender<Vec<NodeRecord>>),
    OadState(Sender<OadTransferState>),
    Stats(Sender<RxStats>),
    Shutdown,
}

/// Downlink waiting for the next frame from a node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct PendingMessage {
    command: Option<AckCommand>,
    oad: Option<OadMessage>,
}

impl PendingMessage {
    fn is_empty(&self) -> bool {
        self.command.is_none() && self.oad.is_none()
    }
}

/// Label reported for an image
fn firmware_label(header: &ImageHeader) -> String {
    format!("rfWsnNode v{}.00", header.version_string())
}

const NO_IMAGE_LABEL: &str = "none";
const UPDATE_FAILED_LABEL: &str = "update failed";

pub(crate) struct AppTask<S: ImageStore> {
    requests: Receiver<AppRequest>,
    radio: Sender<RadioCommand>,
    notifications: Sender<String>,
    table: NodeTable,
    oad: OadServer<S>,
    pending: BTreeMap<u8, PendingMessage>,
    stats: RxStats,
    available_image: String,
    started: Instant,
    tick: Duration,
}

impl<S: ImageStore> AppTask<S> {
    pub(crate) fn new(
        requests: Receiver<AppRequest>,
        radio: Sender<RadioCommand>,
        notifications: Sender<String>,
        mut oad: OadServer<S>,
        tick: Duration,
    ) -> Self {
        let available_image = match oad.store_mut() {
            Ok(store) => {
                let label = store
                    .identify(ImageSelector::Stored)
                    .map(|h| firmware_label(&h))
                    .unwrap_or_else(|| NO_IMAGE_LABEL.to_string());
                store.close();
                label
            }
            Err(_) => NO_IMAGE_LABEL.to_string(),
        };
        Self {
            requests,
            radio,
            notifications,
            table: NodeTable::new(),
            oad,
            pending: BTreeMap::new(),
            stats: RxStats::default(),
            available_image,
            started: Instant::now(),
            tick,
        }
    }

    pub(crate) fn run(mut self) {
        log::debug!("[app-task] started, available image: {}", self.available_image);
        loop {
            match self.requests.recv_timeout(self.tick) {
                Ok(AppRequest::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(request) => self.handle(request),
                Err(RecvTimeoutError::Timeout) => {}
            }
            self.poll_oad(Instant::now());
        }
        self.oad.abort();
        log::debug!("[app-task] stopped");
    }

    fn handle(&mut self, request: AppRequest) {
        match request {
            AppRequest::Packet { packet, len, reply } => {
                let source = packet.source();
                let (ack, taken) = self.on_packet(packet, len);
                if reply.send(ack).is_err() && !taken.is_empty() {
                    log::warn!(
                        "[app-task] ack to {:#04x} left without its downlink, kept for the next frame",
                        source
                    );
                    self.restore_pending(source, taken);
                }
            }
            AppRequest::Invalid { len, error } => {
                log::debug!("[app-task] counting invalid frame: {}", error);
                self.stats.record(len, false);
            }
            AppRequest::Console { line, reply } => {
                let _ = reply.send(self.on_console(&line).to_string());
            }
            AppRequest::Upload { link, reply } => {
                let _ = reply.send(self.upload(link));
            }
            AppRequest::Nodes(reply) => {
                let _ = reply.send(self.table.iter().cloned().collect());
            }
            AppRequest::OadState(reply) => {
                let _ = reply.send(self.oad.state());
            }
            AppRequest::Stats(reply) => {
                let _ = reply.send(self.stats);
            }
            AppRequest::Shutdown => {}
        }
    }

    fn notify(&self, line: String) {
        if let Err(TrySendError::Full(line)) = self.notifications.try_send(line) {
            log::debug!("[app-task] notification dropped: {}", line);
        }
    }

    fn poll_oad(&mut self, now: Instant) {
        if let Some(node) = self.oad.poll(now) {
            self.abort_node_msg(node);
            self.notify(format!("+UPDATE:{},ABORTED", node));
        }
    }

    /// Drop whatever is waiting for `address`; harmless when nothing is
    pub(crate) fn abort_node_msg(&mut self, address: u8) {
        if self.pending.remove(&address).is_some() {
            log::debug!("[app-task] pending message for {:#04x} dropped", address);
        }
    }

    /// Put back a downlink whose ack went out empty
    fn restore_pending(&mut self, address: u8, taken: PendingMessage) {
        let pending = self.pending.entry(address).or_default();
        if pending.command.is_none() {
            pending.command = taken.command;
        }
        if pending.oad.is_none() {
            pending.oad = taken.oad;
        }
    }

    /// Ack content for `packet`, and what it took from the pending store
    fn on_packet(&mut self, packet: Packet, len: usize) -> (AckReply, PendingMessage) {
        self.stats.record(len, true);
        let source = packet.source();
        let update = NodeUpdate::rssi(packet.rssi);
        let mut follow_up = None;

        match packet.body {
            PacketBody::RawData(data) => {
                self.table.upsert(source, update);
                self.on_raw_data(source, &data);
            }
            PacketBody::AdcSensor(sensor) => {
                self.table.upsert(source, update.with_value(sensor.adc_value));
            }
            PacketBody::DualModeSensor(sensor) => {
                self.table.upsert(
                    source,
                    update.with_value(sensor.adc_value).with_button(sensor.button),
                );
            }
            PacketBody::TestReset => {
                self.table.upsert(source, update);
                log::info!("[app-task] test reset from {:#04x}", source);
                self.stats.reset_interval();
            }
            PacketBody::OadFragment(bytes) => {
                self.table.upsert(source, update);
                follow_up = self.on_oad(source, &bytes);
            }
            PacketBody::Ack(_) => {}
        }

        // a block response takes the follow-up slot; pending OAD traffic waits
        let mut taken = PendingMessage::default();
        if let Some(pending) = self.pending.get_mut(&source) {
            taken.command = pending.command.take();
            if follow_up.is_none() {
                taken.oad = pending.oad.take();
            }
            if pending.is_empty() {
                self.pending.remove(&source);
            }
        }
        let reply = AckReply {
            command: taken.command.clone(),
            follow_up: follow_up
                .or_else(|| taken.oad.clone())
                .map(|msg| PacketBody::OadFragment(msg.encode())),
        };
        (reply, taken)
    }

    fn on_raw_data(&mut self, source: u8, data: &[u8]) {
        self.notify(console::data_notification(self.started.elapsed(), source, data));
        if let &[code, hi, lo] = data {
            if code == NodeCommand::DataCount.reply_code() {
                let count = u16::from_be_bytes([hi, lo]);
                self.notify(format!("+COUNT:{},{}", source, count));
            }
        }
    }

    fn on_oad(&mut self, source: u8, bytes: &[u8]) -> Option<OadMessage> {
        let message = match OadMessage::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("[app-task] bad OAD fragment from {:#04x}: {}", source, e);
                return None;
            }
        };
        let now = Instant::now();
        match message {
            OadMessage::FwVersionRsp { version } => {
                self.table.set_firmware_version(source, &version);
                self.notify(format!("+FWVER:{},{}", source, version));
                None
            }
            OadMessage::ImgIdentifyRsp { status } => {
                let was_target = self.oad.target() == Some(source);
                if !self.oad.on_identify_response(source, status, now) && was_target {
                    self.abort_node_msg(source);
                    self.notify(format!("+UPDATE:{},REJECTED", source));
                }
                None
            }
            OadMessage::BlockReq { block, .. } => match self.oad.on_block_request(source, block, now) {
                Ok(BlockOutcome::Serve {
                    response,
                    block,
                    completed,
                }) => {
                    let total = self.oad.state().total_blocks;
                    self.table.set_oad_progress(source, block, total);
                    if completed {
                        self.table.remove(source);
                        self.notify(format!("+UPDATE:{},DONE", source));
                    }
                    Some(response)
                }
                Ok(_) => None,
                Err(e) => {
                    self.abort_node_msg(source);
                    self.notify(format!("+UPDATE:{},ERR,{}", source, e));
                    None
                }
            },
            other => {
                log::debug!("[app-task] unexpected OAD message from {:#04x}: {:?}", source, other);
                None
            }
        }
    }

    fn upload(&mut self, link: Box<dyn SerialLink>) -> Result<u16> {
        let store = self.oad.store_mut()?;
        let result = ImageUploader::new(link).upload(store);
        self.available_image = match &result {
            Ok(_) => store
                .identify(ImageSelector::Stored)
                .map(|h| firmware_label(&h))
                .unwrap_or_else(|| UPDATE_FAILED_LABEL.to_string()),
            Err(e) => {
                log::error!("[app-task] image upload failed: {}", e);
                UPDATE_FAILED_LABEL.to_string()
            }
        };
        store.close();
        result
    }

    fn queue_command(&mut self, address: u8, command: NodeCommand) -> core::result::Result<(), &'static str> {
        if self.table.lookup(address).is_none() {
            return Err("unknown-node");
        }
        let ack = command.to_ack(address).ok_or("too-long")?;
        let pending = self.pending.entry(address).or_default();
        if pending.command.is_some() {
            return Err("busy");
        }
        pending.command = Some(ack);
        Ok(())
    }

    fn queue_oad(&mut self, address: u8, message: OadMessage) {
        self.pending.entry(address).or_default().oad = Some(message);
    }

    fn on_console(&mut self, line: &str) -> ConsoleReply {
        let command = match console::parse(line) {
            Ok(command) => command,
            Err(e) => return e.reply(),
        };
        let name = command.name();
        log::debug!("[app-task] console {:?}", command);

        let queued = |result: core::result::Result<(), &'static str>| match result {
            Ok(()) => ConsoleReply::ok(name),
            Err(reason) => ConsoleReply::err(name, reason),
        };

        match command {
            ConsoleCommand::Start(addr) => queued(self.queue_command(addr, NodeCommand::TransferStart)),
            ConsoleCommand::Stop(addr) => queued(self.queue_command(addr, NodeCommand::TransferStop)),
            ConsoleCommand::Count(addr) => queued(self.queue_command(addr, NodeCommand::DataCount)),
            ConsoleCommand::Sleep(addr, duration) => {
                queued(self.queue_command(addr, NodeCommand::Sleep(duration)))
            }
            ConsoleCommand::Downlink(addr, data) => {
                queued(self.queue_command(addr, NodeCommand::Downlink(data)))
            }
            ConsoleCommand::ConfigGet => match self.radio_query(RadioCommand::GetConfig) {
                Some((hz, dbm)) => ConsoleReply::ok(name).field("FREQ", hz).field("POW", dbm),
                None => ConsoleReply::err(name, "radio"),
            },
            ConsoleCommand::ConfigSet {
                frequency_hz,
                power_dbm,
            } => {
                if let Some(hz) = frequency_hz {
                    if !matches!(self.radio_query(|tx| RadioCommand::SetFrequency(hz, tx)), Some(Ok(()))) {
                        return ConsoleReply::err(name, "range");
                    }
                }
                if let Some(dbm) = power_dbm {
                    if !matches!(self.radio_query(|tx| RadioCommand::SetPower(dbm, tx)), Some(Ok(()))) {
                        return ConsoleReply::err(name, "range");
                    }
                }
                ConsoleReply::ok(name)
            }
            ConsoleCommand::Status(addr) => match self.table.lookup(addr) {
                Some(node) => ConsoleReply::ok(name)
                    .field("RSSI", node.rssi)
                    .field("VALUE", node.latest_value)
                    .field("BUTTON", node.button)
                    .field("FW", &node.firmware_version),
                None => ConsoleReply::err(name, "unknown-node"),
            },
            ConsoleCommand::Nodes => self
                .table
                .iter()
                .fold(ConsoleReply::ok(name).field("COUNT", self.table.len()), |reply, node| {
                    reply.field("NODE", node.address)
                }),
            ConsoleCommand::Stats => ConsoleReply::ok(name)
                .field("RX", self.stats.interval.received)
                .field("OK", self.stats.interval.successful)
                .field("BYTES", self.stats.interval.bytes)
                .field("RATE", self.stats.success_rate())
                .field("TOTAL_RX", self.stats.total.received)
                .field("TOTAL_OK", self.stats.total.successful),
            ConsoleCommand::FwVersion(addr) => {
                if self.table.lookup(addr).is_none() {
                    return ConsoleReply::err(name, "unknown-node");
                }
                self.queue_oad(addr, OadMessage::FwVersionReq);
                ConsoleReply::ok(name)
            }
            ConsoleCommand::Update(addr) => {
                if self.table.lookup(addr).is_none() {
                    return ConsoleReply::err(name, "unknown-node");
                }
                match self.oad.begin_transfer(addr) {
                    Ok(request) => {
                        self.queue_oad(addr, request);
                        ConsoleReply::ok(name).field("BLOCKS", self.oad.state().total_blocks)
                    }
                    Err(Error::TransferBusy) => ConsoleReply::err(name, "busy"),
                    Err(Error::NoImage) => ConsoleReply::err(name, "no-image"),
                    Err(e) => ConsoleReply::err(name, e.to_string()),
                }
            }
            ConsoleCommand::Image => {
                let serving = if self.oad.phase().is_active() {
                    self.oad.image_header().copied()
                } else {
                    None
                };
                match serving.or_else(|| self.stored_header()) {
                    Some(header) => ConsoleReply::ok(name)
                        .field("FW", &self.available_image)
                        .field("BLOCKS", header.total_blocks()),
                    None => ConsoleReply::err(name, "no-image"),
                }
            }
            ConsoleCommand::Abort => match self.oad.abort() {
                Some(node) => {
                    self.abort_node_msg(node);
                    self.notify(format!("+UPDATE:{},ABORTED", node));
                    ConsoleReply::ok(name).field("NODE", node)
                }
                None => ConsoleReply::ok(name),
            },
        }
    }

    fn stored_header(&mut self) -> Option<ImageHeader> {
        let store = self.oad.store_mut().ok()?;
        let header = store.identify(ImageSelector::Stored);
        store.close();
        header
    }

    fn radio_query<T>(&self, make: impl FnOnce(Sender<T>) -> RadioCommand) -> Option<T> {
        let (tx, rx) = bounded(1);
        self.radio.send(make(tx)).ok()?;
        rx.recv_timeout(Duration::from_secs(1)).ok()
    }
}
