// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Concentrator side of the OAD transfer
//!
//! Serves one node at a time. The node pulls the image block by block; the
//! server answers each request from its [`ImageStore`] and rearms an abort
//! countdown after every exchange. When the countdown runs out the transfer
//! is aborted and the owner is told which node to drop pending traffic for.
//!
//! Block requests must arrive in order. The request for the next block
//! advances the transfer; a repeat of the block just served (the node lost
//! the response) is answered again without advancing; anything else is
//! rejected.

use super::clock::Countdown;
use super::image::ImageHeader;
use super::protocol::{OadMessage, IDENTIFY_ACCEPTED, OAD_IMG_ID};
use super::storage::{ImageSelector, ImageStore};
use super::{OadPhase, OadSettings, OadTransferState};
use crate::error::{Error, Result};
use std::time::Instant;

/// What to do with a block request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Send `response` back to the node
    Serve {
        response: OadMessage,
        block: u16,
        /// `block` was the last one; the transfer is complete
        completed: bool,
    },
    /// Out of order; nothing is sent
    Rejected { requested: u16, expected: u16 },
    /// No transfer for this node
    Ignored,
}

pub struct OadServer<S: ImageStore> {
    store: S,
    settings: OadSettings,
    state: OadTransferState,
    target: Option<u8>,
    header: Option<ImageHeader>,
    abort_clock: Countdown,
}

impl<S: ImageStore> OadServer<S> {
    pub fn new(store: S, settings: OadSettings) -> Self {
        Self {
            store,
            abort_clock: Countdown::new(settings.abort_timeout()),
            settings,
            state: OadTransferState::default(),
            target: None,
            header: None,
        }
    }

    pub fn settings(&self) -> &OadSettings {
        &self.settings
    }

    /// Snapshot of the transfer state
    pub fn state(&self) -> OadTransferState {
        OadTransferState {
            abort_deadline: self.abort_clock.deadline(),
            ..self.state
        }
    }

    pub fn phase(&self) -> OadPhase {
        self.state.phase
    }

    /// Node being served, if a transfer is running
    pub fn target(&self) -> Option<u8> {
        if self.state.phase.is_active() {
            self.target
        } else {
            None
        }
    }

    /// Header of the image last identified
    pub fn image_header(&self) -> Option<&ImageHeader> {
        self.header.as_ref()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store access for image uploads; refused while a transfer runs
    pub fn store_mut(&mut self) -> Result<&mut S> {
        if self.state.phase.is_active() {
            return Err(Error::TransferBusy);
        }
        Ok(&mut self.store)
    }

    /// Read the header of the selected image and open it for block reads
    ///
    /// Returns the number of blocks, 0 when there is no usable image.
    pub fn identify_read(&mut self, selector: ImageSelector) -> u16 {
        let Some(header) = self.store.identify(selector) else {
            self.header = None;
            return 0;
        };
        let total = header.total_blocks();
        self.header = Some(header);
        self.state.total_blocks = total;
        self.state.remainder_bytes = header.remainder_bytes();
        self.state.image_base_address = self.store.image_base();
        total
    }

    /// Start a transfer to `dest`
    ///
    /// Returns the identify request to deliver to the node.
    pub fn begin_transfer(&mut self, dest: u8) -> Result<OadMessage> {
        if self.state.phase.is_active() {
            return Err(Error::TransferBusy);
        }

        let total = self.identify_read(ImageSelector::Stored);
        let Some(header) = self.header.filter(|_| total > 0) else {
            self.store.close();
            return Err(Error::NoImage);
        };

        self.target = Some(dest);
        self.state.phase = OadPhase::Identifying;
        self.state.block_index = 0;
        self.abort_clock.stop();

        let mut metadata = header;
        metadata.crc_shadow = 0xFFFF;
        log::info!(
            "[oad-server] update of {:#04x} to v{} ({} blocks)",
            dest,
            header.version_string(),
            total
        );
        Ok(OadMessage::ImgIdentifyReq {
            img_id: OAD_IMG_ID,
            metadata: metadata.to_bytes(),
        })
    }

    /// Node answered the identify request; `true` if the transfer goes on
    pub fn on_identify_response(&mut self, src: u8, status: u8, now: Instant) -> bool {
        if self.state.phase != OadPhase::Identifying || self.target != Some(src) {
            return false;
        }
        if status == IDENTIFY_ACCEPTED {
            self.state.phase = OadPhase::Transferring;
            self.abort_clock.rearm(now);
            log::debug!("[oad-server] {:#04x} accepted the image", src);
            true
        } else {
            log::warn!("[oad-server] {:#04x} rejected the image (status {})", src, status);
            self.abort();
            false
        }
    }

    /// Answer a block request from `src`
    ///
    /// A flash fault aborts the transfer and is returned as `Err`.
    pub fn on_block_request(&mut self, src: u8, block: u16, now: Instant) -> Result<BlockOutcome> {
        if !self.state.phase.is_active() || self.target != Some(src) {
            log::debug!(
                "[oad-server] ignoring block {} request from {:#04x} ({:?})",
                block,
                src,
                self.state.phase
            );
            return Ok(BlockOutcome::Ignored);
        }
        if self.state.phase == OadPhase::Identifying {
            // node skipped the identify response
            self.state.phase = OadPhase::Transferring;
        }

        let expected = self.state.block_index;
        let repeat = expected > 0 && block == expected - 1;
        if block != expected && !repeat {
            log::warn!(
                "[oad-server] out of order block request {} from {:#04x} (expected {})",
                block,
                src,
                expected
            );
            return Ok(BlockOutcome::Rejected {
                requested: block,
                expected,
            });
        }

        let data = match self.store.read_block(block) {
            Ok(data) => data,
            Err(e) => {
                log::error!("[oad-server] reading block {} failed: {}", block, e);
                self.abort();
                return Err(e);
            }
        };

        let completed = block + 1 == self.state.total_blocks;
        if completed {
            self.state.phase = OadPhase::Completed;
            self.state.block_index = self.state.total_blocks;
            self.abort_clock.stop();
            self.store.close();
            log::info!("[oad-server] transfer to {:#04x} completed", src);
        } else {
            if !repeat {
                self.state.block_index = block + 1;
            }
            self.abort_clock.rearm(now);
        }

        Ok(BlockOutcome::Serve {
            response: OadMessage::BlockRsp {
                img_id: OAD_IMG_ID,
                block,
                data,
            },
            block,
            completed,
        })
    }

    /// Abort when the countdown has run out; returns the node that was served
    pub fn poll(&mut self, now: Instant) -> Option<u8> {
        if !self.abort_clock.fire(now) {
            return None;
        }
        log::warn!(
            "[oad-server] no block request within {:?}, aborting",
            self.abort_clock.period()
        );
        self.abort()
    }

    /// Stop the running transfer; harmless when none is running
    pub fn abort(&mut self) -> Option<u8> {
        self.abort_clock.stop();
        if !self.state.phase.is_active() {
            return None;
        }
        self.store.close();
        self.state.phase = OadPhase::Aborted;
        let target = self.target;
        log::info!("[oad-server] transfer to {:?} aborted", target);
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oad::flash::{Flash, SimFlash};
    use crate::oad::image::build_image;
    use crate::oad::storage::OadStorage;
    use crate::oad::OAD_BLOCK_SIZE;
    use std::time::Duration;

    fn staged_server(body_len: usize) -> (OadServer<OadStorage<SimFlash>>, Vec<u8>) {
        let running = ImageHeader {
            version: 0x0100,
            ..ImageHeader::default()
        };
        let mut store = OadStorage::new(SimFlash::new(4, 256), 0, 1024, running).unwrap();
        let image = build_image(0x0101, *b"WSN1", &vec![0x3C; body_len]);
        store.stage_image(&image).unwrap();
        (OadServer::new(store, OadSettings::default()), image)
    }

    fn empty_server() -> OadServer<OadStorage<SimFlash>> {
        let store =
            OadStorage::new(SimFlash::new(4, 256), 0, 1024, ImageHeader::default()).unwrap();
        OadServer::new(store, OadSettings::default())
    }

    #[test]
    fn test_identify_read_counts_blocks() {
        let (mut server, _) = staged_server(144);
        assert_eq!(server.identify_read(ImageSelector::Stored), 5);
        assert_eq!(server.state().total_blocks, 5);
        assert_eq!(server.state().remainder_bytes, 0);
        assert_eq!(empty_server().identify_read(ImageSelector::Stored), 0);
    }

    #[test]
    fn test_zero_length_image_is_not_served() {
        let mut server = empty_server();
        let header = ImageHeader {
            crc: 0x1234,
            crc_shadow: 0x1234,
            version: 0x0101,
            len_words: 0,
            ..ImageHeader::default()
        };
        server
            .store_mut()
            .unwrap()
            .flash_mut()
            .write(0, &header.to_bytes())
            .unwrap();

        assert_eq!(server.identify_read(ImageSelector::Stored), 0);
        assert_eq!(server.image_header().map(|h| h.len_words), Some(0));
        assert_eq!(server.state().total_blocks, 0);

        assert!(matches!(server.begin_transfer(0x10), Err(Error::NoImage)));
        assert_eq!(server.phase(), OadPhase::Idle);
        assert_eq!(server.target(), None);
        assert_eq!(server.store().open_header(), None);
    }

    #[test]
    fn test_begin_transfer_without_image() {
        let mut server = empty_server();
        assert!(matches!(server.begin_transfer(0x10), Err(Error::NoImage)));
        assert_eq!(server.phase(), OadPhase::Idle);
    }

    #[test]
    fn test_begin_transfer_rejects_when_busy() {
        let (mut server, _) = staged_server(144);
        let req = server.begin_transfer(0x10).unwrap();
        match req {
            OadMessage::ImgIdentifyReq { img_id, metadata } => {
                assert_eq!(img_id, 0);
                let header = ImageHeader::parse(&metadata).unwrap();
                assert_eq!(header.crc_shadow, 0xFFFF);
                assert_eq!(header.total_blocks(), 5);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(server.phase(), OadPhase::Identifying);
        assert!(matches!(server.begin_transfer(0x11), Err(Error::TransferBusy)));
    }

    #[test]
    fn test_sequential_transfer_completes() {
        let (mut server, image) = staged_server(144);
        let now = Instant::now();
        server.begin_transfer(0x10).unwrap();
        assert!(server.on_identify_response(0x10, IDENTIFY_ACCEPTED, now));

        for block in 0..5u16 {
            let outcome = server.on_block_request(0x10, block, now).unwrap();
            let BlockOutcome::Serve {
                response: OadMessage::BlockRsp { data, .. },
                completed,
                ..
            } = outcome
            else {
                panic!("block {} not served", block);
            };
            let start = block as usize * OAD_BLOCK_SIZE;
            if block > 0 {
                assert_eq!(&data[..], &image[start..start + OAD_BLOCK_SIZE]);
            }
            assert_eq!(completed, block == 4);
        }
        assert_eq!(server.phase(), OadPhase::Completed);
        assert!(server.state().abort_deadline.is_none());
        assert_eq!(
            server.on_block_request(0x10, 4, now).unwrap(),
            BlockOutcome::Ignored
        );
    }

    #[test]
    fn test_block_order_policy() {
        let (mut server, _) = staged_server(144);
        let now = Instant::now();
        server.begin_transfer(0x10).unwrap();
        server.on_identify_response(0x10, IDENTIFY_ACCEPTED, now);

        assert!(matches!(
            server.on_block_request(0x10, 2, now).unwrap(),
            BlockOutcome::Rejected {
                requested: 2,
                expected: 0
            }
        ));
        server.on_block_request(0x10, 0, now).unwrap();
        server.on_block_request(0x10, 1, now).unwrap();
        // repeat of the block just served
        assert!(matches!(
            server.on_block_request(0x10, 1, now).unwrap(),
            BlockOutcome::Serve { block: 1, .. }
        ));
        assert_eq!(server.state().block_index, 2);
        assert!(matches!(
            server.on_block_request(0x10, 0, now).unwrap(),
            BlockOutcome::Rejected { .. }
        ));
        // another node
        assert_eq!(
            server.on_block_request(0x11, 2, now).unwrap(),
            BlockOutcome::Ignored
        );
    }

    #[test]
    fn test_abort_timeout_rearmed_per_block() {
        let (mut server, _) = staged_server(144);
        let start = Instant::now();
        let timeout = server.settings().abort_timeout();
        assert_eq!(timeout, Duration::from_millis(1100));

        server.begin_transfer(0x10).unwrap();
        server.on_identify_response(0x10, IDENTIFY_ACCEPTED, start);
        let t1 = start + Duration::from_millis(900);
        server.on_block_request(0x10, 0, t1).unwrap();
        assert_eq!(server.poll(start + Duration::from_millis(1200)), None);
        assert_eq!(server.poll(t1 + timeout), Some(0x10));
        assert_eq!(server.phase(), OadPhase::Aborted);
        assert_eq!(server.abort(), None);
        assert_eq!(
            server.on_block_request(0x10, 1, t1).unwrap(),
            BlockOutcome::Ignored
        );
    }

    #[test]
    fn test_identify_rejected_by_node() {
        let (mut server, _) = staged_server(144);
        server.begin_transfer(0x10).unwrap();
        assert!(!server.on_identify_response(0x11, 1, Instant::now()));
        assert!(!server.on_identify_response(0x10, 1, Instant::now()));
        assert_eq!(server.phase(), OadPhase::Aborted);
        // a new transfer may start afterwards
        assert!(server.begin_transfer(0x10).is_ok());
    }

    #[test]
    fn test_store_locked_during_transfer() {
        let (mut server, _) = staged_server(144);
        assert!(server.store_mut().is_ok());
        server.begin_transfer(0x10).unwrap();
        assert!(matches!(server.store_mut(), Err(Error::TransferBusy)));
        server.abort();
        assert!(server.store_mut().is_ok());
    }
}
