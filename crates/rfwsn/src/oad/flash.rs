// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Flash device collaborator
//!
//! NOR semantics: erase sets a whole page to 0xFF, a write can only clear
//! bits (the stored byte becomes `old & new`).

use thiserror::Error;

/// Default erase page size (bytes)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlashError {
    #[error("access {offset:#x}+{len} outside flash")]
    OutOfRange { offset: usize, len: usize },

    #[error("device fault at {offset:#x}")]
    Fault { offset: usize },
}

/// Page-erasable flash
pub trait Flash: Send {
    fn page_size(&self) -> usize;

    fn capacity(&self) -> usize;

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError>;

    fn erase_page(&mut self, page: usize) -> Result<(), FlashError>;
}

/// RAM-backed flash for tests and the simulator
#[derive(Debug, Clone)]
pub struct SimFlash {
    data: Vec<u8>,
    page_size: usize,
    erases: usize,
    fault_at: Option<usize>,
}

impl SimFlash {
    /// Erased device of `pages` pages
    pub fn new(pages: usize, page_size: usize) -> Self {
        Self {
            data: vec![0xFF; pages * page_size],
            page_size,
            erases: 0,
            fault_at: None,
        }
    }

    /// Make writes and erases touching `offset` fail
    pub fn inject_fault(&mut self, offset: usize) {
        self.fault_at = Some(offset);
    }

    pub fn clear_fault(&mut self) {
        self.fault_at = None;
    }

    /// Page erases performed so far
    pub fn erase_count(&self) -> usize {
        self.erases
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), FlashError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(FlashError::OutOfRange { offset, len }),
        }
    }

    fn check_fault(&self, offset: usize, len: usize) -> Result<(), FlashError> {
        match self.fault_at {
            Some(at) if (offset..offset + len).contains(&at) => Err(FlashError::Fault { offset: at }),
            _ => Ok(()),
        }
    }
}

impl Flash for SimFlash {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        self.check(offset, buf.len())?;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        self.check(offset, data.len())?;
        self.check_fault(offset, data.len())?;
        for (cell, &byte) in self.data[offset..offset + data.len()].iter_mut().zip(data) {
            *cell &= byte;
        }
        Ok(())
    }

    fn erase_page(&mut self, page: usize) -> Result<(), FlashError> {
        let offset = page * self.page_size;
        self.check(offset, self.page_size)?;
        self.check_fault(offset, self.page_size)?;
        self.data[offset..offset + self.page_size].fill(0xFF);
        self.erases += 1;
        Ok(())
    }
}
