// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Known sensor nodes on the concentrator
//!
//! Fixed-capacity table kept compact: occupied entries sit at the front and
//! the first slot with address 0 ends the sequence. When the table is full
//! the oldest entry is overwritten.

/// Default number of tracked nodes
pub const NODE_TABLE_CAPACITY: usize = 7;

/// Maximum length of a stored firmware version string
pub const VERSION_LEN: usize = 16;

/// Marks an empty slot
const EMPTY_ADDRESS: u8 = 0x00;

/// State kept for one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeRecord {
    pub address: u8,
    pub latest_value: u16,
    pub button: u8,
    pub rssi: i8,
    pub firmware_version: String,
    pub oad_block: u16,
    pub oad_total_blocks: u16,
}

impl NodeRecord {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    /// Last block of an OAD transfer has been served
    pub fn oad_finished(&self) -> bool {
        self.oad_total_blocks > 0 && self.oad_block == self.oad_total_blocks - 1
    }
}

/// Fields carried by a received packet; `None` leaves the stored value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeUpdate {
    pub latest_value: Option<u16>,
    pub button: Option<u8>,
    pub rssi: Option<i8>,
}

impl NodeUpdate {
    pub fn rssi(rssi: i8) -> Self {
        Self {
            rssi: Some(rssi),
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: u16) -> Self {
        self.latest_value = Some(value);
        self
    }

    pub fn with_button(mut self, button: u8) -> Self {
        self.button = Some(button);
        self
    }
}

/// Bounded, ordered node table
#[derive(Debug, Clone)]
pub struct NodeTable<const N: usize = NODE_TABLE_CAPACITY> {
    entries: [NodeRecord; N],
    /// Insertion stamp per slot, oldest has the smallest
    stamps: [u64; N],
    next_stamp: u64,
    selected: Option<usize>,
}

impl<const N: usize> NodeTable<N> {
    pub fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| NodeRecord::default()),
            stamps: [0; N],
            next_stamp: 0,
            selected: None,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .take_while(|e| e.address != EMPTY_ADDRESS)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot the next new node will be written to
    pub fn cursor(&self) -> usize {
        let len = self.len();
        if len < N {
            return len;
        }
        self.stamps
            .iter()
            .enumerate()
            .min_by_key(|(_, stamp)| **stamp)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn index_of(&self, address: u8) -> Option<usize> {
        self.iter().position(|e| e.address == address)
    }

    /// Update the entry for `address`, inserting it when unseen
    ///
    /// Returns the slot index, or `None` for the reserved empty address.
    pub fn upsert(&mut self, address: u8, update: NodeUpdate) -> Option<usize> {
        if address == EMPTY_ADDRESS {
            return None;
        }

        let index = match self.index_of(address) {
            Some(index) => index,
            None => {
                let index = self.cursor();
                if self.entries[index].address != EMPTY_ADDRESS {
                    log::info!(
                        "[node-table] evicting oldest node {:#04x} for {:#04x}",
                        self.entries[index].address,
                        address
                    );
                } else {
                    log::info!("[node-table] new node {:#04x}", address);
                }
                self.entries[index] = NodeRecord::new(address);
                self.stamps[index] = self.next_stamp;
                self.next_stamp += 1;
                index
            }
        };

        let entry = &mut self.entries[index];
        if let Some(value) = update.latest_value {
            entry.latest_value = value;
        }
        if let Some(button) = update.button {
            entry.button = button;
        }
        if let Some(rssi) = update.rssi {
            entry.rssi = rssi;
        }
        Some(index)
    }

    /// Remove `address`, compacting the table
    ///
    /// A selection past the removed slot moves down with its entry; a
    /// selection on the removed slot keeps its index (now the next entry)
    /// and falls back to the first entry if that slot became empty.
    pub fn remove(&mut self, address: u8) -> Option<NodeRecord> {
        let index = self.index_of(address)?;
        let removed = std::mem::take(&mut self.entries[index]);

        for i in index..N - 1 {
            self.entries.swap(i, i + 1);
            self.stamps.swap(i, i + 1);
        }
        self.entries[N - 1] = NodeRecord::default();
        self.stamps[N - 1] = 0;

        let len = self.len();
        self.selected = match self.selected {
            Some(sel) if sel > index => Some(sel - 1),
            Some(_) if len == 0 => None,
            Some(sel) if sel >= len => Some(0),
            other => other,
        };

        log::info!("[node-table] removed node {:#04x}", address);
        Some(removed)
    }

    pub fn lookup(&self, address: u8) -> Option<&NodeRecord> {
        self.iter().find(|e| e.address == address)
    }

    pub fn lookup_mut(&mut self, address: u8) -> Option<&mut NodeRecord> {
        self.entries
            .iter_mut()
            .take_while(|e| e.address != EMPTY_ADDRESS)
            .find(|e| e.address == address)
    }

    /// Occupied entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord> + '_ {
        self.entries
            .iter()
            .take_while(|e| e.address != EMPTY_ADDRESS)
    }

    pub fn get(&self, index: usize) -> Option<&NodeRecord> {
        self.iter().nth(index)
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected_record(&self) -> Option<&NodeRecord> {
        self.selected.and_then(|i| self.get(i))
    }

    pub fn select(&mut self, index: usize) -> bool {
        if index < self.len() {
            self.selected = Some(index);
            true
        } else {
            false
        }
    }

    /// Move the selection to the next entry, wrapping
    pub fn select_next(&mut self) -> Option<&NodeRecord> {
        let len = self.len();
        if len == 0 {
            self.selected = None;
            return None;
        }
        let next = match self.selected {
            Some(i) => (i + 1) % len,
            None => 0,
        };
        self.selected = Some(next);
        self.get(next)
    }

    pub fn set_firmware_version(&mut self, address: u8, version: &str) -> bool {
        match self.lookup_mut(address) {
            Some(entry) => {
                entry.firmware_version = truncate_version(version);
                true
            }
            None => false,
        }
    }

    /// Record OAD progress; returns the updated record
    pub fn set_oad_progress(&mut self, address: u8, block: u16, total: u16) -> Option<&NodeRecord> {
        let entry = self.lookup_mut(address)?;
        entry.oad_block = block;
        entry.oad_total_blocks = total;
        Some(entry)
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl<const N: usize> Default for NodeTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_version(version: &str) -> String {
    let mut out = String::new();
    for c in version.chars() {
        if out.len() + c.len_utf8() > VERSION_LEN {
            break;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addresses<const N: usize>(table: &NodeTable<N>) -> Vec<u8> {
        table.iter().map(|e| e.address).collect()
    }

    #[test]
    fn test_upsert_insert_and_update() {
        let mut table: NodeTable = NodeTable::new();
        assert_eq!(table.upsert(0x10, NodeUpdate::rssi(-70).with_value(100)), Some(0));
        assert_eq!(table.upsert(0x20, NodeUpdate::rssi(-80)), Some(1));
        assert_eq!(table.upsert(0x10, NodeUpdate::rssi(-65).with_button(1)), Some(0));

        let node = table.lookup(0x10).unwrap();
        assert_eq!(node.latest_value, 100);
        assert_eq!(node.button, 1);
        assert_eq!(node.rssi, -65);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_upsert_rejects_empty_address() {
        let mut table: NodeTable = NodeTable::new();
        assert_eq!(table.upsert(0, NodeUpdate::default()), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_fifo_eviction_when_full() {
        let mut table: NodeTable = NodeTable::new();
        for addr in 1..=7u8 {
            table.upsert(addr, NodeUpdate::default());
        }
        assert_eq!(table.cursor(), 0);

        table.upsert(8, NodeUpdate::default());
        assert!(table.lookup(1).is_none());
        assert_eq!(addresses(&table), vec![8, 2, 3, 4, 5, 6, 7]);
        assert_eq!(table.cursor(), 1);

        table.upsert(9, NodeUpdate::default());
        assert_eq!(addresses(&table), vec![8, 9, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_remove_compacts_in_order() {
        let mut table: NodeTable = NodeTable::new();
        for addr in [0x11, 0x22, 0x33, 0x44] {
            table.upsert(addr, NodeUpdate::default());
        }
        let removed = table.remove(0x22).unwrap();
        assert_eq!(removed.address, 0x22);
        assert_eq!(addresses(&table), vec![0x11, 0x33, 0x44]);
        assert_eq!(table.len(), 3);
        assert!(table.remove(0x22).is_none());
    }

    #[test]
    fn test_remove_adjusts_selection() {
        let mut table: NodeTable = NodeTable::new();
        for addr in [1, 2, 3, 4] {
            table.upsert(addr, NodeUpdate::default());
        }

        // selection past the removed slot follows its entry
        assert!(table.select(2));
        table.remove(2);
        assert_eq!(table.selected(), Some(1));
        assert_eq!(table.selected_record().unwrap().address, 3);

        // selection before the removed slot stays
        assert!(table.select(0));
        table.remove(4);
        assert_eq!(table.selected(), Some(0));

        // selection on the last slot wraps to the first entry
        assert!(table.select(1));
        table.remove(3);
        assert_eq!(table.selected(), Some(0));

        table.remove(1);
        assert_eq!(table.selected(), None);
    }

    #[test]
    fn test_eviction_after_remove_prefers_oldest() {
        let mut table: NodeTable = NodeTable::new();
        for addr in 1..=7u8 {
            table.upsert(addr, NodeUpdate::default());
        }
        table.upsert(8, NodeUpdate::default()); // evicts 1
        table.remove(5);
        table.upsert(9, NodeUpdate::default()); // fills the free slot
        assert_eq!(table.len(), 7);
        table.upsert(10, NodeUpdate::default()); // evicts 2, the oldest
        assert!(table.lookup(2).is_none());
        assert!(table.lookup(8).is_some());
        assert!(table.lookup(9).is_some());
    }

    #[test]
    fn test_iter_restartable() {
        let mut table: NodeTable<3> = NodeTable::new();
        table.upsert(5, NodeUpdate::default());
        table.upsert(6, NodeUpdate::default());
        assert_eq!(table.iter().count(), 2);
        assert_eq!(table.iter().count(), 2);
        assert_eq!(table.select_next().unwrap().address, 5);
        assert_eq!(table.select_next().unwrap().address, 6);
        assert_eq!(table.select_next().unwrap().address, 5);
    }

    #[test]
    fn test_oad_progress_and_version() {
        let mut table: NodeTable = NodeTable::new();
        table.upsert(0x42, NodeUpdate::default());
        let node = table.set_oad_progress(0x42, 3, 5).unwrap();
        assert!(!node.oad_finished());
        assert!(table.set_oad_progress(0x42, 4, 5).unwrap().oad_finished());
        assert!(table.set_oad_progress(0x43, 1, 5).is_none());

        assert!(table.set_firmware_version(0x42, "rfWsnNode v03.01.00 extra"));
        assert_eq!(table.lookup(0x42).unwrap().firmware_version, "rfWsnNode v03.01");
    }
}
