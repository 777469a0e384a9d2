// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Image store on flash
//!
//! One image slot starting on a page boundary. Blocks are written in order;
//! the page a block starts on is erased before the block lands. `finalize`
//! walks the written image page by page to check its CRC, then sets the CRC
//! shadow so the bootloader picks the image up.

use super::flash::{Flash, FlashError};
use super::image::{ImageHeader, IMAGE_CRC_START, IMAGE_HEADER_SIZE};
use super::protocol::OAD_BLOCK_SIZE;
use crate::error::{Error, Result};
use crate::packet::Crc16;

/// Which image `identify` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSelector {
    /// Image held in the slot, ready to be served
    Stored,
    /// Image the device is running
    Running,
}

/// Acceptance rules applied by `identify_write`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoragePolicy {
    /// Refuse an image whose version low byte equals the running one
    pub reject_same_version_low_byte: bool,
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            reject_same_version_low_byte: true,
        }
    }
}

/// Image store collaborator
pub trait ImageStore: Send {
    /// Header of the selected image; opens it for reading
    fn identify(&mut self, selector: ImageSelector) -> Option<ImageHeader>;

    /// Validate a proposed image and open the slot for writing
    ///
    /// Returns the number of blocks to write, or 0 on rejection.
    fn identify_write(&mut self, metadata: &[u8]) -> u16;

    fn read_block(&mut self, index: u16) -> Result<[u8; OAD_BLOCK_SIZE]>;

    fn write_block(&mut self, index: u16, data: &[u8]) -> Result<()>;

    /// Erase a slot-relative page
    fn erase_page(&mut self, page: usize) -> Result<()>;

    /// Check the written image and mark it ready
    fn finalize(&mut self) -> Result<()>;

    fn close(&mut self);

    /// Flash address of the slot
    fn image_base(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
struct OpenImage {
    header: ImageHeader,
    total_blocks: u16,
    mode: OpenMode,
}

/// [`ImageStore`] on a [`Flash`] device
pub struct OadStorage<F: Flash> {
    flash: F,
    base: usize,
    slot_len: usize,
    running: ImageHeader,
    policy: StoragePolicy,
    open: Option<OpenImage>,
}

impl<F: Flash> OadStorage<F> {
    /// Slot of `slot_len` bytes at `base`; both must be page aligned
    pub fn new(flash: F, base: usize, slot_len: usize, running: ImageHeader) -> Result<Self> {
        let page = flash.page_size();
        if page == 0 || page % OAD_BLOCK_SIZE != 0 {
            return Err(Error::ImageRejected("page size not a multiple of the block size"));
        }
        if base % page != 0 || slot_len % page != 0 || slot_len == 0 {
            return Err(Error::ImageRejected("image slot not page aligned"));
        }
        if base + slot_len > flash.capacity() {
            return Err(FlashError::OutOfRange {
                offset: base,
                len: slot_len,
            }
            .into());
        }
        Ok(Self {
            flash,
            base,
            slot_len,
            running,
            policy: StoragePolicy::default(),
            open: None,
        })
    }

    pub fn with_policy(mut self, policy: StoragePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn running(&self) -> &ImageHeader {
        &self.running
    }

    /// Largest image the slot holds, in blocks
    pub fn max_blocks(&self) -> u16 {
        (self.slot_len / OAD_BLOCK_SIZE).min(u16::MAX as usize) as u16
    }

    fn read_stored_header(&self) -> Result<ImageHeader> {
        let mut buf = [0u8; IMAGE_HEADER_SIZE];
        self.flash.read(self.base, &mut buf)?;
        ImageHeader::parse(&buf).ok_or(Error::NoImage)
    }

    /// Image in the slot is CRC-valid and flagged for the bootloader
    pub fn is_image_ready(&self) -> bool {
        self.read_stored_header()
            .map(|h| h.is_ready() && h.byte_len() <= self.slot_len)
            .unwrap_or(false)
    }

    /// Recompute the CRC of the image in the slot and compare it
    pub fn check_download(&self) -> Result<ImageHeader> {
        let header = self.read_stored_header()?;
        if !header.has_image() {
            return Err(Error::NoImage);
        }
        let len = header.byte_len();
        if len > self.slot_len || len < IMAGE_HEADER_SIZE {
            return Err(Error::NoImage);
        }

        let page_size = self.flash.page_size();
        let mut page = vec![0u8; page_size];
        let mut crc = Crc16::new();
        let mut offset = 0;
        while offset < len {
            let chunk = page_size.min(len - offset);
            self.flash.read(self.base + offset, &mut page[..chunk])?;
            // first page skips the CRC fields, last page stops at the remainder
            let start = if offset == 0 { IMAGE_CRC_START } else { 0 };
            crc.update(&page[start..chunk]);
            offset += chunk;
        }

        let computed = crc.finish();
        if computed != header.crc {
            return Err(Error::CrcError {
                expected: header.crc,
                computed,
            });
        }
        Ok(header)
    }

    /// Write a complete image through the block interface
    pub fn stage_image(&mut self, image: &[u8]) -> Result<ImageHeader> {
        let total = self.identify_write(image);
        if total == 0 {
            return Err(Error::ImageRejected("image refused by identify"));
        }
        for block in 0..total {
            let start = block as usize * OAD_BLOCK_SIZE;
            let end = (start + OAD_BLOCK_SIZE).min(image.len());
            self.write_block(block, &image[start..end])?;
        }
        self.finalize()?;
        self.read_stored_header()
    }

    /// Header of the image currently open for reading or writing
    pub fn open_header(&self) -> Option<ImageHeader> {
        self.open.map(|open| open.header)
    }

    fn open_image(&self) -> Result<OpenImage> {
        self.open.ok_or(Error::NoImage)
    }
}

impl<F: Flash> ImageStore for OadStorage<F> {
    fn identify(&mut self, selector: ImageSelector) -> Option<ImageHeader> {
        match selector {
            ImageSelector::Running => Some(self.running),
            ImageSelector::Stored => {
                let header = self.read_stored_header().ok()?;
                if !header.is_ready() || header.byte_len() > self.slot_len {
                    log::debug!("[oad-storage] no servable image in slot");
                    return None;
                }
                self.open = Some(OpenImage {
                    header,
                    total_blocks: header.total_blocks(),
                    mode: OpenMode::Read,
                });
                Some(header)
            }
        }
    }

    fn identify_write(&mut self, metadata: &[u8]) -> u16 {
        let Some(header) = ImageHeader::parse(metadata) else {
            log::warn!("[oad-storage] short image metadata ({} bytes)", metadata.len());
            return 0;
        };

        if self.policy.reject_same_version_low_byte
            && (header.version & 0x00FF) == (self.running.version & 0x00FF)
        {
            log::warn!(
                "[oad-storage] rejecting image v{}: same low version byte as running v{}",
                header.version_string(),
                self.running.version_string()
            );
            return 0;
        }

        let total = header.total_blocks();
        if total == 0 || total > self.max_blocks() {
            log::warn!(
                "[oad-storage] rejecting image of {} blocks (max {})",
                total,
                self.max_blocks()
            );
            return 0;
        }

        self.open = Some(OpenImage {
            header,
            total_blocks: total,
            mode: OpenMode::Write,
        });
        log::debug!(
            "[oad-storage] slot {:#x} open for v{} ({} blocks)",
            self.base,
            header.version_string(),
            total
        );
        total
    }

    fn read_block(&mut self, index: u16) -> Result<[u8; OAD_BLOCK_SIZE]> {
        let open = self.open_image()?;
        if index >= open.total_blocks {
            return Err(Error::BlockOutOfRange(index));
        }
        let offset = index as usize * OAD_BLOCK_SIZE;
        let mut block = [0xFFu8; OAD_BLOCK_SIZE];
        let len = OAD_BLOCK_SIZE.min(self.slot_len - offset);
        self.flash.read(self.base + offset, &mut block[..len])?;
        if index == 0 {
            // the shadow is this device's ready flag, not image content
            block[2..4].copy_from_slice(&[0xFF, 0xFF]);
        }
        Ok(block)
    }

    fn write_block(&mut self, index: u16, data: &[u8]) -> Result<()> {
        let open = self.open_image()?;
        if open.mode != OpenMode::Write {
            return Err(Error::NoImage);
        }
        if index >= open.total_blocks {
            return Err(Error::BlockOutOfRange(index));
        }
        let offset = index as usize * OAD_BLOCK_SIZE;
        let page_size = self.flash.page_size();
        if offset % page_size == 0 {
            self.erase_page(offset / page_size)?;
        }
        let len = data.len().min(OAD_BLOCK_SIZE).min(self.slot_len - offset);
        self.flash.write(self.base + offset, &data[..len])?;
        Ok(())
    }

    fn erase_page(&mut self, page: usize) -> Result<()> {
        let page_size = self.flash.page_size();
        if (page + 1) * page_size > self.slot_len {
            return Err(FlashError::OutOfRange {
                offset: self.base + page * page_size,
                len: page_size,
            }
            .into());
        }
        self.flash.erase_page(self.base / page_size + page)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        let open = self.open_image()?;
        if open.mode != OpenMode::Write {
            return Err(Error::NoImage);
        }
        let result = self.check_download();
        self.open = None;
        let header = result?;

        let shadow_at = self.base + 2;
        self.flash.write(shadow_at, &header.crc.to_le_bytes())?;
        let stored = self.read_stored_header()?;
        if stored.crc_shadow != header.crc {
            log::error!("[oad-storage] CRC shadow readback mismatch");
            return Err(FlashError::Fault { offset: shadow_at }.into());
        }

        log::info!(
            "[oad-storage] image v{} verified (crc {:#06x}), ready for boot",
            header.version_string(),
            header.crc
        );
        Ok(())
    }

    fn close(&mut self) {
        self.open = None;
    }

    fn image_base(&self) -> u32 {
        self.base as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oad::flash::SimFlash;
    use crate::oad::image::build_image;

    const PAGE: usize = 128;

    fn running(version: u16) -> ImageHeader {
        ImageHeader {
            version,
            ..ImageHeader::default()
        }
    }

    fn storage() -> OadStorage<SimFlash> {
        OadStorage::new(SimFlash::new(8, PAGE), 0, 4 * PAGE, running(0x0100)).unwrap()
    }

    fn write_image(store: &mut OadStorage<SimFlash>, image: &[u8]) -> u16 {
        let total = store.identify_write(image);
        for block in 0..total {
            let start = block as usize * OAD_BLOCK_SIZE;
            let end = (start + OAD_BLOCK_SIZE).min(image.len());
            store.write_block(block, &image[start..end]).unwrap();
        }
        total
    }

    #[test]
    fn test_write_blocks_then_finalize() {
        let mut store = storage();
        let image = build_image(0x0102, *b"WSN1", &[0x5A; 300]);
        let total = write_image(&mut store, &image);
        assert_eq!(total as usize, image.len().div_ceil(OAD_BLOCK_SIZE));

        store.finalize().unwrap();
        assert!(store.is_image_ready());
        // one erase per page touched by a block start
        assert_eq!(store.flash().erase_count(), image.len().div_ceil(PAGE));
    }

    #[test]
    fn test_finalize_detects_bit_flip() {
        let mut store = storage();
        let mut image = build_image(0x0102, *b"WSN1", &[0x5A; 300]);
        image[200] ^= 0x04;
        write_image(&mut store, &image);
        assert!(matches!(store.finalize(), Err(Error::CrcError { .. })));
        assert!(!store.is_image_ready());
    }

    #[test]
    fn test_finalize_sentinel_crc_short_circuits() {
        let mut store = storage();
        let mut image = build_image(0x0102, *b"WSN1", &[0x11; 64]);
        image[0] = 0xFF;
        image[1] = 0xFF;
        write_image(&mut store, &image);
        assert!(matches!(store.finalize(), Err(Error::NoImage)));
    }

    #[test]
    fn test_identify_write_rejections() {
        let mut store = storage();
        // same low version byte as running 0x0100
        let image = build_image(0x0200, *b"WSN1", &[0; 32]);
        assert_eq!(store.identify_write(&image), 0);

        // larger than the slot
        let image = build_image(0x0101, *b"WSN1", &vec![0; 4 * PAGE]);
        assert_eq!(store.identify_write(&image), 0);

        // zero-length header
        let empty = ImageHeader {
            crc: 0x1234,
            version: 0x0101,
            ..ImageHeader::default()
        };
        assert_eq!(store.identify_write(&empty.to_bytes()), 0);
        assert_eq!(store.identify_write(&[0u8; 8]), 0);
    }

    #[test]
    fn test_version_policy_can_be_relaxed() {
        let mut store = storage().with_policy(StoragePolicy {
            reject_same_version_low_byte: false,
        });
        let image = build_image(0x0200, *b"WSN1", &[0; 32]);
        assert_eq!(store.identify_write(&image), 2);
    }

    #[test]
    fn test_identify_stored_and_read_blocks() {
        let mut store = storage();
        assert!(store.identify(ImageSelector::Stored).is_none());

        let image = build_image(0x0102, *b"WSN1", &[0x77; 140]);
        let header = store.stage_image(&image).unwrap();
        assert!(header.is_ready());

        let served = store.identify(ImageSelector::Stored).unwrap();
        assert_eq!(served.total_blocks(), 5);
        assert_eq!(store.open_header(), Some(served));
        let block0 = store.read_block(0).unwrap();
        assert_eq!(&block0[2..4], &[0xFF, 0xFF]);
        assert_eq!(&block0[4..], &image[4..32]);
        let last = store.read_block(4).unwrap();
        assert_eq!(&last[..28], &image[128..156]);
        assert_eq!(&last[28..], &[0xFF; 4]);
        assert!(matches!(store.read_block(5), Err(Error::BlockOutOfRange(5))));
    }

    #[test]
    fn test_write_without_identify() {
        let mut store = storage();
        assert!(matches!(store.write_block(0, &[0; 32]), Err(Error::NoImage)));
        assert!(matches!(store.finalize(), Err(Error::NoImage)));
    }

    #[test]
    fn test_flash_fault_propagates() {
        let mut store = storage();
        store.flash_mut().inject_fault(PAGE);
        let image = build_image(0x0102, *b"WSN1", &[0x5A; 300]);
        let total = store.identify_write(&image);
        assert!(store.write_block(0, &image[..32]).is_ok());
        let page_block = (PAGE / OAD_BLOCK_SIZE) as u16;
        assert!(page_block < total);
        assert!(matches!(
            store.write_block(page_block, &image[PAGE..PAGE + 32]),
            Err(Error::FlashFault(FlashError::Fault { .. }))
        ));
    }

    #[test]
    fn test_new_rejects_misaligned_slot() {
        assert!(OadStorage::new(SimFlash::new(4, PAGE), 10, PAGE, running(1)).is_err());
        assert!(OadStorage::new(SimFlash::new(4, PAGE), 0, 8 * PAGE, running(1)).is_err());
    }
}
