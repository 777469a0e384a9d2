// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node side of the OAD transfer

use super::protocol::{OadMessage, IDENTIFY_ACCEPTED, IDENTIFY_REJECTED};
use super::storage::ImageStore;
use super::{OadPhase, OadTransferState};
use crate::error::{Error, Result};

/// Receives an image into an [`ImageStore`]
pub struct OadTarget<S: ImageStore> {
    store: S,
    max_retries: u8,
    state: OadTransferState,
}

impl<S: ImageStore> OadTarget<S> {
    pub fn new(store: S, max_retries: u8) -> Self {
        Self {
            store,
            max_retries,
            state: OadTransferState::default(),
        }
    }

    pub fn state(&self) -> OadTransferState {
        self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Handle an identify request; returns the response for the server
    pub fn on_identify(&mut self, metadata: &[u8]) -> OadMessage {
        let total = self.store.identify_write(metadata);
        if total == 0 {
            self.state = OadTransferState {
                phase: OadPhase::Aborted,
                ..OadTransferState::default()
            };
            return OadMessage::ImgIdentifyRsp {
                status: IDENTIFY_REJECTED,
            };
        }
        self.state = OadTransferState {
            phase: OadPhase::Transferring,
            block_index: 0,
            total_blocks: total,
            remainder_bytes: 0,
            image_base_address: self.store.image_base(),
            abort_deadline: None,
        };
        log::debug!("[oad-target] accepted image of {} blocks", total);
        OadMessage::ImgIdentifyRsp {
            status: IDENTIFY_ACCEPTED,
        }
    }

    /// Request for the next missing block
    pub fn next_request(&self) -> Option<OadMessage> {
        (self.state.phase == OadPhase::Transferring)
            .then(|| OadMessage::block_request(self.state.block_index))
    }

    /// Store a received block; returns `true` once the last block is in
    ///
    /// Blocks other than the one requested are dropped.
    pub fn on_block(&mut self, block: u16, data: &[u8]) -> Result<bool> {
        if self.state.phase != OadPhase::Transferring {
            return Err(Error::TransferAborted);
        }
        if block != self.state.block_index {
            log::debug!(
                "[oad-target] dropping block {} (waiting for {})",
                block,
                self.state.block_index
            );
            return Ok(false);
        }
        if let Err(e) = self.store.write_block(block, data) {
            self.abort();
            return Err(e);
        }
        self.state.block_index += 1;
        if self.state.block_index == self.state.total_blocks {
            self.state.phase = OadPhase::Finalizing;
            return Ok(true);
        }
        Ok(false)
    }

    /// Verify the received image and mark it ready
    pub fn finalize(&mut self) -> Result<()> {
        if self.state.phase != OadPhase::Finalizing {
            return Err(Error::TransferAborted);
        }
        match self.store.finalize() {
            Ok(()) => {
                self.state.phase = OadPhase::Completed;
                Ok(())
            }
            Err(e) => {
                log::error!("[oad-target] image verification failed: {}", e);
                self.state.phase = OadPhase::Aborted;
                Err(e)
            }
        }
    }

    /// Pull every block through `exchange`, then finalize
    ///
    /// `exchange` sends one request and returns the server's answer, if any.
    /// A block is asked for at most `max_retries + 1` times.
    pub fn run_transfer<F>(&mut self, mut exchange: F) -> Result<()>
    where
        F: FnMut(&OadMessage) -> Option<OadMessage>,
    {
        while let Some(request) = self.next_request() {
            let wanted = self.state.block_index;
            let mut received = false;
            for attempt in 0..=self.max_retries {
                if let Some(OadMessage::BlockRsp { block, data, .. }) = exchange(&request) {
                    if block == wanted {
                        self.on_block(block, &data)?;
                        received = true;
                        break;
                    }
                }
                log::debug!("[oad-target] block {} attempt {} unanswered", wanted, attempt + 1);
            }
            if !received {
                log::warn!("[oad-target] giving up on block {}", wanted);
                self.abort();
                return Err(Error::TransferAborted);
            }
        }
        self.finalize()
    }

    pub fn abort(&mut self) {
        if self.state.phase.is_active() {
            self.store.close();
            self.state.phase = OadPhase::Aborted;
        }
    }
}
