// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded multi-producer, single-consumer ring buffer.
//!
//! Producers claim a logical position by advancing `head` with a CAS and then
//! publish the item into the slot at `position % capacity`. The single reader
//! takes the slot at `tail`, spinning if the producer that claimed it has not
//! published yet, and then advances `tail`. Neither side ever takes a lock.
//!
//! `head` and `tail` are monotonic 64 bit counters and are never reset, so
//! `added_count()` and `removed_count()` double as lifetime statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::{Backoff, CachePadded};

use crate::errors::{Creation, Range};

pub struct RingBuffer<T> {
    capacity: u64,
    slots: Box<[AtomicCell<Option<Box<T>>>]>,
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Result<Self, Creation> {
        if capacity == 0 {
            return Err(Range::new("capacity", 0, "should be greater than zero").into());
        }

        let slots = (0..capacity)
            .map(|_| AtomicCell::new(None))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            capacity: capacity as u64,
            slots,
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of items currently held.
    ///
    /// Under concurrent producers this is a snapshot; it is never negative
    /// and never larger than the capacity.
    pub fn count(&self) -> u64 {
        // tail first: a stale tail can only make the result larger, never
        // make head appear to be behind tail
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.saturating_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Number of items ever added.
    pub fn added_count(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    /// Number of items ever read.
    pub fn removed_count(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    /// Adds an item, retrying for as long as other producers win the CAS.
    ///
    /// Returns the item back if the buffer is full.
    pub fn add(&self, item: T) -> Result<(), T> {
        match self.claim(None) {
            Some(position) => {
                self.publish(position, item);
                Ok(())
            }
            None => Err(item),
        }
    }

    /// Adds an item, giving up after `max_spin_count` lost CAS attempts.
    ///
    /// Returns the item back if the buffer is full or the spin budget ran
    /// out. Callers that need to tell the two apart compare `count()` with
    /// `capacity()`.
    pub fn try_add(&self, item: T, max_spin_count: u32) -> Result<(), T> {
        match self.claim(Some(max_spin_count)) {
            Some(position) => {
                self.publish(position, item);
                Ok(())
            }
            None => Err(item),
        }
    }

    /// Takes the oldest item.
    ///
    /// Only one thread may read at a time, and the caller must have checked
    /// that `count() > 0`; otherwise this spins until a producer adds one.
    pub fn read(&self) -> T {
        let tail = self.tail.load(Ordering::Acquire);
        let slot = &self.slots[self.index(tail)];

        let backoff = Backoff::new();
        loop {
            // the producer may have claimed the position and not written yet
            if let Some(item) = slot.take() {
                self.tail.fetch_add(1, Ordering::AcqRel);
                return *item;
            }
            backoff.snooze();
        }
    }

    fn claim(&self, max_spin_count: Option<u32>) -> Option<u64> {
        let backoff = Backoff::new();
        let mut retries: u32 = 0;

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);

            if head - tail >= self.capacity {
                return None;
            }

            if self
                .head
                .compare_exchange(head, head + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(head);
            }

            if let Some(max) = max_spin_count {
                if retries >= max {
                    return None;
                }
            }
            retries = retries.saturating_add(1);
            backoff.spin();
        }
    }

    fn publish(&self, position: u64, item: T) {
        // the slot was emptied by the read of `position - capacity`, which
        // completed before tail moved past it
        self.slots[self.index(position)].store(Some(Box::new(item)));
    }

    fn index(&self, position: u64) -> usize {
        // the remainder is always below the slot count, which is a usize
        (position % self.capacity) as usize
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("added", &self.added_count())
            .field("removed", &self.removed_count())
            .finish()
    }
}
