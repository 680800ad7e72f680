// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-use view over the items handed to one export call.
//!
//! A batch built from a [`RingBuffer`] reserves up to `max_size` items at
//! construction time. Iterating it reads those items out of the buffer one at
//! a time; whatever the exporter does not consume is read and discarded when
//! the batch is dropped, so the buffer always advances by the full
//! reservation.

use std::fmt;

use crate::errors::Range;
use crate::ring_buffer::RingBuffer;

enum Source<'a, T> {
    Buffer {
        buffer: &'a RingBuffer<T>,
        // removed count at which this reservation is fully consumed
        target: u64,
    },
    Items(std::vec::IntoIter<T>),
}

pub struct Batch<'a, T> {
    source: Source<'a, T>,
    len: u64,
}

impl<'a, T> Batch<'a, T> {
    /// Reserves `min(max_size, buffer.count())` items.
    ///
    /// Items added after this call are never part of the batch. Must only be
    /// called by the buffer's single reader.
    pub fn from_buffer(buffer: &'a RingBuffer<T>, max_size: usize) -> Result<Self, Range> {
        if max_size == 0 {
            return Err(Range::new("max_size", 0, "should be greater than zero"));
        }

        let removed = buffer.removed_count();
        let len = buffer.count().min(max_size as u64);

        Ok(Self {
            source: Source::Buffer {
                buffer,
                target: removed + len,
            },
            len,
        })
    }

    /// Wraps the first `count` elements of `items`.
    pub fn from_items(mut items: Vec<T>, count: usize) -> Result<Self, Range> {
        if count > items.len() {
            return Err(Range::new(
                "count",
                count as u64,
                "should not exceed the number of items",
            ));
        }
        items.truncate(count);

        Ok(Self {
            len: count as u64,
            source: Source::Items(items.into_iter()),
        })
    }

    pub fn single(item: T) -> Self {
        Self {
            source: Source::Items(vec![item].into_iter()),
            len: 1,
        }
    }

    /// Number of items reserved when the batch was built.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of items not yet yielded.
    pub fn remaining(&self) -> u64 {
        match &self.source {
            Source::Buffer { buffer, target } => target.saturating_sub(buffer.removed_count()),
            Source::Items(iter) => iter.len() as u64,
        }
    }

    /// Reads and discards every item still reserved by this batch.
    ///
    /// Returns how many items were discarded. Calling it again is a no-op.
    /// A batch over a plain collection has nothing to drain and returns 0.
    pub fn drain_remaining(&mut self) -> u64 {
        let Source::Buffer { buffer, target } = &self.source else {
            return 0;
        };

        let mut drained = 0;
        while buffer.removed_count() < *target {
            drop(buffer.read());
            drained += 1;
        }
        drained
    }
}

impl<T> Iterator for Batch<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match &mut self.source {
            Source::Buffer { buffer, target } => {
                if buffer.removed_count() < *target {
                    Some(buffer.read())
                } else {
                    None
                }
            }
            Source::Items(iter) => iter.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl<T> Drop for Batch<'_, T> {
    fn drop(&mut self) {
        self.drain_remaining();
    }
}

impl<T> fmt::Debug for Batch<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("len", &self.len)
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn filled(capacity: usize, items: u32) -> RingBuffer<u32> {
        let buffer = RingBuffer::new(capacity).unwrap();
        for i in 0..items {
            buffer.add(i).unwrap();
        }
        buffer
    }

    #[test]
    fn test_zero_max_size_is_rejected() {
        let buffer = filled(4, 1);
        let err = Batch::from_buffer(&buffer, 0).unwrap_err();
        assert_eq!(err.name, "max_size");
    }

    #[test]
    fn test_partial_reservation() {
        let buffer = filled(8, 5);
        let batch = Batch::from_buffer(&buffer, 3).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(buffer.count(), 2);
        assert_eq!(buffer.removed_count(), 3);
    }

    #[test]
    fn test_reservation_ignores_later_adds() {
        let buffer = filled(8, 2);
        let mut batch = Batch::from_buffer(&buffer, 8).unwrap();
        buffer.add(100).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.next(), Some(0));
        assert_eq!(batch.next(), Some(1));
        assert_eq!(batch.next(), None);
        drop(batch);
        assert_eq!(buffer.count(), 1);
        assert_eq!(buffer.read(), 100);
    }

    #[test]
    fn test_drain_without_iterating() {
        let buffer = filled(8, 6);
        let before = buffer.removed_count();
        let mut batch = Batch::from_buffer(&buffer, 4).unwrap();

        assert_eq!(batch.drain_remaining(), 4);
        assert_eq!(buffer.removed_count(), before + 4);

        // second release changes nothing
        assert_eq!(batch.drain_remaining(), 0);
        drop(batch);
        assert_eq!(buffer.removed_count(), before + 4);
        assert_eq!(buffer.count(), 2);
    }

    #[test]
    fn test_drop_drains_partially_consumed_batch() {
        let buffer = filled(8, 5);
        {
            let mut batch = Batch::from_buffer(&buffer, 5).unwrap();
            assert_eq!(batch.next(), Some(0));
            assert_eq!(batch.remaining(), 4);
        }
        assert_eq!(buffer.removed_count(), 5);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_exhausted_batch_yields_nothing() {
        let buffer = filled(4, 2);
        let mut batch = Batch::from_buffer(&buffer, 2).unwrap();
        assert_eq!(batch.by_ref().count(), 2);
        assert_eq!(batch.next(), None);
        assert_eq!(batch.size_hint(), (0, Some(0)));
    }

    #[test]
    fn test_from_items() {
        let batch = Batch::from_items(vec!["a", "b", "c"], 2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.collect::<Vec<_>>(), vec!["a", "b"]);

        let err = Batch::from_items(vec!["a"], 2).unwrap_err();
        assert_eq!(err.name, "count");
    }

    #[test]
    fn test_single_item_batch() {
        let mut batch = Batch::single(7u8);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.drain_remaining(), 0);
        assert_eq!(batch.next(), Some(7));
        assert_eq!(batch.next(), None);
    }
}
