// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Over-the-air download (OAD)
//!
//! ```text
//!   host --UART--> [ImageUploader] --> ImageStore (concentrator slot)
//!                                          |
//!                                     [OadServer] <--- BlockReq ---  node
//!                                          |      ---- BlockRsp ---> [OadTarget]
//!                                          |                             |
//!                                  abort countdown            ImageStore (node slot)
//! ```
//!
//! The node pulls the image one 32-byte block at a time. The payload of each
//! exchange travels as an [`OadMessage`] inside an `OadFragment` packet, the
//! response riding as the follow-up of the acknowledgement.

pub mod clock;
pub mod flash;
pub mod image;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod target;
pub mod upload;

pub use clock::Countdown;
pub use flash::{Flash, FlashError, SimFlash, DEFAULT_PAGE_SIZE};
pub use image::{build_image, ImageHeader, IMAGE_HEADER_SIZE};
pub use protocol::{OadMessage, FW_VERSION_LEN, IDENTIFY_ACCEPTED, IDENTIFY_REJECTED, OAD_BLOCK_SIZE};
pub use server::{BlockOutcome, OadServer};
pub use storage::{ImageSelector, ImageStore, OadStorage, StoragePolicy};
pub use target::OadTarget;
pub use upload::{ImageHost, ImageUploader};

use std::time::{Duration, Instant};

/// Default period between block requests
pub const DEFAULT_BLOCK_REQUEST_PERIOD: Duration = Duration::from_millis(200);

/// Default block request retries
pub const DEFAULT_OAD_MAX_RETRIES: u8 = 3;

/// Default slack added on top of the retry window before aborting
pub const DEFAULT_ABORT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OadPhase {
    #[default]
    Idle,
    Identifying,
    Transferring,
    Finalizing,
    Completed,
    Aborted,
}

impl OadPhase {
    /// A transfer is in progress
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OadPhase::Identifying | OadPhase::Transferring | OadPhase::Finalizing
        )
    }
}

/// Progress of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OadTransferState {
    pub phase: OadPhase,
    /// Next block to transfer
    pub block_index: u16,
    pub total_blocks: u16,
    /// Bytes used in the last block, 0 when it is full
    pub remainder_bytes: u16,
    pub image_base_address: u32,
    pub abort_deadline: Option<Instant>,
}

/// OAD timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OadSettings {
    pub block_request_period: Duration,
    pub max_retries: u8,
    pub abort_grace: Duration,
}

impl Default for OadSettings {
    fn default() -> Self {
        Self {
            block_request_period: DEFAULT_BLOCK_REQUEST_PERIOD,
            max_retries: DEFAULT_OAD_MAX_RETRIES,
            abort_grace: DEFAULT_ABORT_GRACE,
        }
    }
}

impl OadSettings {
    /// Silence after which the server gives up on a node
    pub fn abort_timeout(&self) -> Duration {
        self.abort_grace + self.block_request_period * self.max_retries as u32
    }
}
