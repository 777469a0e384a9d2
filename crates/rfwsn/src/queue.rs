// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity blocking FIFO
//!
//! Ring of `N` slots indexed by `head` and `tail`. One slot always stays
//! empty so full and empty are told apart by the indices alone: the usable
//! capacity is `N - 1`, and producers observe backpressure at exactly that
//! depth.
//!
//! ```text
//!   head            tail
//!    v               v
//! [ a | b | c | d | _ | _ | _ | _ ]     count = (tail - head) mod N
//! ```
//!
//! The node transfer loop peeks with [`BoundedQueue::front`], sends, and
//! pops only once the send is acknowledged, so a failed send leaves the item
//! in place for the next attempt.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Ring<T, const N: usize> {
    slots: [T; N],
    head: usize,
    tail: usize,
}

impl<T: Default, const N: usize> Ring<T, N> {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| T::default()),
            head: 0,
            tail: 0,
        }
    }

    fn count(&self) -> usize {
        (self.tail + N - self.head) % N
    }

    fn is_full(&self) -> bool {
        (self.tail + 1) % N == self.head
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn take_front(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item = std::mem::take(&mut self.slots[self.head]);
        self.head = (self.head + 1) % N;
        Some(item)
    }
}

/// Bounded FIFO safe for one producer and one consumer running concurrently
pub struct BoundedQueue<T, const N: usize> {
    ring: Mutex<Ring<T, N>>,
    available: Condvar,
}

impl<T: Default, const N: usize> BoundedQueue<T, N> {
    /// Create an empty queue
    ///
    /// # Panics
    ///
    /// If `N < 2` (no usable slot).
    pub fn new() -> Self {
        assert!(N >= 2, "BoundedQueue needs at least two slots");
        Self {
            ring: Mutex::new(Ring::new()),
            available: Condvar::new(),
        }
    }

    /// Usable capacity (`N - 1`)
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    pub fn count(&self) -> usize {
        self.ring.lock().count()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    /// Enqueue without blocking; `false` when `N - 1` items are held
    pub fn push(&self, item: T) -> bool {
        let mut ring = self.ring.lock();
        if ring.is_full() {
            return false;
        }
        let tail = ring.tail;
        ring.slots[tail] = item;
        ring.tail = (tail + 1) % N;
        drop(ring);
        self.available.notify_one();
        true
    }

    /// Dequeue, waiting up to `timeout` for an item
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let mut ring = self.ring.lock();
        self.wait_for_item(&mut ring, timeout);
        ring.take_front()
    }

    /// Wait until the ring holds an item or `timeout` passes
    ///
    /// A timeout too large for an `Instant` waits without a deadline.
    fn wait_for_item(&self, ring: &mut MutexGuard<'_, Ring<T, N>>, timeout: Duration) {
        let deadline = Instant::now().checked_add(timeout);
        while ring.is_empty() {
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(ring, deadline).timed_out() {
                        break;
                    }
                }
                None => self.available.wait(ring),
            }
        }
    }

    /// Dequeue without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.ring.lock().take_front()
    }

    /// Run `f` on the oldest item without removing it
    pub fn with_front<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let ring = self.ring.lock();
        if ring.is_empty() {
            return None;
        }
        Some(f(&ring.slots[ring.head]))
    }

    /// Reserve the tail slot and fill it in place
    ///
    /// Returns `None` when the queue is full. The item becomes visible to the
    /// consumer only on [`LazyPush::commit`]; dropping the guard cancels.
    /// The queue lock is held while the guard lives.
    pub fn lazy_push_begin(&self) -> Option<LazyPush<'_, T, N>> {
        let ring = self.ring.lock();
        if ring.is_full() {
            return None;
        }
        Some(LazyPush {
            ring,
            available: &self.available,
            committed: false,
        })
    }

    /// Drop every queued item
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        while ring.take_front().is_some() {}
    }
}

impl<T: Default + Clone, const N: usize> BoundedQueue<T, N> {
    /// Copy of the oldest item, without removing it
    pub fn front(&self) -> Option<T> {
        self.with_front(T::clone)
    }

    /// Like [`front`](Self::front), waiting up to `timeout` for an item
    pub fn front_timeout(&self, timeout: Duration) -> Option<T> {
        let mut ring = self.ring.lock();
        self.wait_for_item(&mut ring, timeout);
        if ring.is_empty() {
            None
        } else {
            Some(ring.slots[ring.head].clone())
        }
    }
}

impl<T: Default, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// In-place tail slot reservation, see [`BoundedQueue::lazy_push_begin`]
pub struct LazyPush<'a, T: Default, const N: usize> {
    ring: MutexGuard<'a, Ring<T, N>>,
    available: &'a Condvar,
    committed: bool,
}

impl<T: Default, const N: usize> LazyPush<'_, T, N> {
    /// Publish the slot
    pub fn commit(mut self) {
        self.committed = true;
    }

    /// Discard the slot contents
    pub fn cancel(self) {}
}

impl<T: Default, const N: usize> core::ops::Deref for LazyPush<'_, T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.ring.slots[self.ring.tail]
    }
}

impl<T: Default, const N: usize> core::ops::DerefMut for LazyPush<'_, T, N> {
    fn deref_mut(&mut self) -> &mut T {
        let tail = self.ring.tail;
        &mut self.ring.slots[tail]
    }
}

impl<T: Default, const N: usize> Drop for LazyPush<'_, T, N> {
    fn drop(&mut self) {
        let tail = self.ring.tail;
        if self.committed {
            self.ring.tail = (tail + 1) % N;
            self.available.notify_one();
        } else {
            self.ring.slots[tail] = T::default();
        }
    }
}

/// Byte slot of at most `SLOT` bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem<const SLOT: usize> {
    len: usize,
    buf: [u8; SLOT],
}

impl<const SLOT: usize> DataItem<SLOT> {
    /// `None` when `data` does not fit the slot
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let mut item = Self::default();
        item.set(data).then_some(item)
    }

    pub fn set(&mut self, data: &[u8]) -> bool {
        if data.len() > SLOT {
            return false;
        }
        self.buf[..data.len()].copy_from_slice(data);
        self.len = data.len();
        true
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Full slot buffer, for filling in place before [`set_len`](Self::set_len)
    pub fn buffer_mut(&mut self) -> &mut [u8; SLOT] {
        &mut self.buf
    }

    pub fn set_len(&mut self, len: usize) -> bool {
        if len > SLOT {
            return false;
        }
        self.len = len;
        true
    }
}

impl<const SLOT: usize> Default for DataItem<SLOT> {
    fn default() -> Self {
        Self {
            len: 0,
            buf: [0u8; SLOT],
        }
    }
}

impl<const SLOT: usize, const N: usize> BoundedQueue<DataItem<SLOT>, N> {
    /// Enqueue a copy of `data`; `false` if full or `data.len() > SLOT`
    pub fn push_bytes(&self, data: &[u8]) -> bool {
        match DataItem::from_slice(data) {
            Some(item) => self.push(item),
            None => false,
        }
    }
}
