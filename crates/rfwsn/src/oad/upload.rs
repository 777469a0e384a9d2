// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Image upload over a serial link
//!
//! The concentrator pulls a new image from a host:
//!
//! ```text
//!   host                         concentrator
//!    |---- metadata[16] ---------->|  identify_write
//!    |<--- block u16 BE -----------|
//!    |---- block u16 LE, data[32]->|  write_block
//!    |          ...                |
//!    |                             |  finalize
//! ```

use super::image::IMAGE_HEADER_SIZE;
use super::protocol::OAD_BLOCK_SIZE;
use super::storage::ImageStore;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Requests for one block before the upload is abandoned
pub const UPLOAD_BLOCK_ATTEMPTS: u8 = 3;

/// Concentrator end of the link
pub struct ImageUploader<L: Read + Write> {
    link: L,
}

impl<L: Read + Write> ImageUploader<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }

    pub fn into_inner(self) -> L {
        self.link
    }

    /// Pull a whole image into `store`
    ///
    /// Returns the number of blocks written.
    pub fn upload<S: ImageStore + ?Sized>(&mut self, store: &mut S) -> Result<u16> {
        let mut metadata = [0u8; IMAGE_HEADER_SIZE];
        self.link.read_exact(&mut metadata)?;
        let total = store.identify_write(&metadata);
        if total == 0 {
            return Err(Error::ImageRejected("uploaded image refused by identify"));
        }
        log::info!("[upload] receiving {} blocks", total);

        let result = self.pull_blocks(store, total).and_then(|_| store.finalize());
        if result.is_err() {
            store.close();
        }
        result.map(|_| total)
    }

    fn pull_blocks<S: ImageStore + ?Sized>(&mut self, store: &mut S, total: u16) -> Result<()> {
        let mut frame = [0u8; 2 + OAD_BLOCK_SIZE];
        for block in 0..total {
            let mut written = false;
            for _ in 0..UPLOAD_BLOCK_ATTEMPTS {
                self.link.write_all(&block.to_be_bytes())?;
                self.link.flush()?;
                self.link.read_exact(&mut frame)?;
                let got = u16::from_le_bytes([frame[0], frame[1]]);
                if got == block {
                    store.write_block(block, &frame[2..])?;
                    written = true;
                    break;
                }
                log::warn!("[upload] asked for block {}, host sent {}", block, got);
            }
            if !written {
                return Err(Error::TransferAborted);
            }
        }
        Ok(())
    }
}

/// Host end of the link, serving an image from memory
///
/// Writes are block requests, reads return the queued answers. The
/// metadata is queued up front.
#[derive(Debug, Clone)]
pub struct ImageHost {
    image: Vec<u8>,
    request: Vec<u8>,
    output: VecDeque<u8>,
    served: Vec<u16>,
    skew: Option<u16>,
}

impl ImageHost {
    pub fn new(image: Vec<u8>) -> Self {
        let mut output = VecDeque::with_capacity(IMAGE_HEADER_SIZE);
        output.extend(image.iter().take(IMAGE_HEADER_SIZE).copied());
        Self {
            image,
            request: Vec::with_capacity(2),
            output,
            served: Vec::new(),
            skew: None,
        }
    }

    /// Answer the first request for `block` with the following block
    pub fn skew_block(mut self, block: u16) -> Self {
        self.skew = Some(block);
        self
    }

    /// Block numbers requested so far
    pub fn served(&self) -> &[u16] {
        &self.served
    }

    fn answer(&mut self, mut block: u16) {
        self.served.push(block);
        if self.skew == Some(block) {
            self.skew = None;
            block += 1;
        }
        let start = block as usize * OAD_BLOCK_SIZE;
        self.output.extend(block.to_le_bytes());
        for i in start..start + OAD_BLOCK_SIZE {
            self.output.push_back(self.image.get(i).copied().unwrap_or(0xFF));
        }
    }
}

impl Read for ImageHost {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.output.is_empty() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "host has nothing to send"));
        }
        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ImageHost {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            self.request.push(byte);
            if self.request.len() == 2 {
                let block = u16::from_be_bytes([self.request[0], self.request[1]]);
                self.request.clear();
                self.answer(block);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oad::flash::SimFlash;
    use crate::oad::image::{build_image, ImageHeader};
    use crate::oad::storage::{ImageSelector, OadStorage};

    fn store() -> OadStorage<SimFlash> {
        let running = ImageHeader {
            version: 0x0100,
            ..ImageHeader::default()
        };
        OadStorage::new(SimFlash::new(4, 256), 0, 1024, running).unwrap()
    }

    #[test]
    fn test_upload_image() {
        let image = build_image(0x0101, *b"WSN1", &[0x99; 200]);
        let mut store = store();
        let mut uploader = ImageUploader::new(ImageHost::new(image.clone()));
        let total = uploader.upload(&mut store).unwrap();
        assert_eq!(total as usize, image.len().div_ceil(OAD_BLOCK_SIZE));
        assert!(store.is_image_ready());

        let host = uploader.into_inner();
        let expected: Vec<u16> = (0..total).collect();
        assert_eq!(host.served(), &expected[..]);
        assert_eq!(
            store.identify(ImageSelector::Stored).map(|h| h.version),
            Some(0x0101)
        );
    }

    #[test]
    fn test_upload_retries_wrong_block() {
        let image = build_image(0x0101, *b"WSN1", &[0x99; 200]);
        let mut store = store();
        let mut uploader = ImageUploader::new(ImageHost::new(image).skew_block(2));
        uploader.upload(&mut store).unwrap();
        let host = uploader.into_inner();
        assert_eq!(&host.served()[..4], &[0, 1, 2, 2]);
        assert!(store.is_image_ready());
    }

    #[test]
    fn test_upload_rejected_image() {
        let image = build_image(0x0300, *b"WSN1", &[0x99; 64]);
        let mut uploader = ImageUploader::new(ImageHost::new(image));
        assert!(matches!(
            uploader.upload(&mut store()),
            Err(Error::ImageRejected(_))
        ));
    }

    #[test]
    fn test_upload_truncated_link() {
        let image = build_image(0x0101, *b"WSN1", &[0x99; 64]);
        let mut uploader = ImageUploader::new(ImageHost::new(image[..10].to_vec()));
        assert!(matches!(uploader.upload(&mut store()), Err(Error::Io(_))));
    }
}
