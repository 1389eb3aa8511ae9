// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use crate::common::{entry::Entry, segment::Segment, table::Table};

use std::{ptr, sync::atomic::Ordering};

use crossbeam_epoch::Guard;

/// A weakly consistent traversal over every segment's chains.
///
/// Segments are visited from the highest index to the lowest and buckets
/// likewise; each bucket's head is captured once, at visit time, and the
/// chain is then walked without further synchronization. Entries present for
/// the whole traversal are produced exactly once; entries inserted or removed
/// concurrently may or may not be observed. The traversal never fails under
/// concurrent modification.
///
/// The embedded guard pins the epoch for the traversal's lifetime, which is
/// what keeps the raw entry pointers below valid: no entry reachable when a
/// head was captured can be reclaimed until this iterator is dropped.
pub(crate) struct RawIter<'m, K, V> {
    segments: &'m [Segment<K, V>],
    guard: Guard,
    next_segment_index: isize,
    next_bucket_index: isize,
    current_table: *const Table<K, V>,
    next_entry: *const Entry<K, V>,
    last_returned: *const Entry<K, V>,
}

impl<'m, K, V> RawIter<'m, K, V> {
    pub(crate) fn new(segments: &'m [Segment<K, V>]) -> Self {
        let mut iter = Self {
            segments,
            guard: crossbeam_epoch::pin(),
            next_segment_index: segments.len() as isize - 1,
            next_bucket_index: -1,
            current_table: ptr::null(),
            next_entry: ptr::null(),
            last_returned: ptr::null(),
        };

        iter.advance();

        iter
    }

    pub(crate) fn guard(&self) -> &Guard {
        &self.guard
    }

    /// Yields the next entry, if any, and records it as the last returned.
    ///
    /// The pointer is valid for reads until this iterator is dropped.
    pub(crate) fn next_entry(&mut self) -> Option<*const Entry<K, V>> {
        if self.next_entry.is_null() {
            return None;
        }

        self.last_returned = self.next_entry;
        self.advance();

        Some(self.last_returned)
    }

    /// Takes the entry most recently yielded by [`next_entry`].
    ///
    /// # Panics
    ///
    /// Panics if no entry has been yielded, or if the last yielded entry was
    /// already taken.
    ///
    /// [`next_entry`]: #method.next_entry
    pub(crate) fn take_last_returned(&mut self) -> *const Entry<K, V> {
        assert!(
            !self.last_returned.is_null(),
            "this iterator has not yielded an entry"
        );

        let last_returned = self.last_returned;
        self.last_returned = ptr::null();

        last_returned
    }

    fn advance(&mut self) {
        if !self.next_entry.is_null() {
            let entry = unsafe { &*self.next_entry };
            self.next_entry = entry.next.load_consume(&self.guard).as_raw();

            if !self.next_entry.is_null() {
                return;
            }
        }

        while self.next_bucket_index >= 0 {
            let table = unsafe { &*self.current_table };
            let head = table.slots()[self.next_bucket_index as usize]
                .load_consume(&self.guard)
                .with_tag(0);

            self.next_bucket_index -= 1;

            if !head.is_null() {
                self.next_entry = head.as_raw();

                return;
            }
        }

        while self.next_segment_index >= 0 {
            let segment = &self.segments[self.next_segment_index as usize];
            self.next_segment_index -= 1;

            if segment.count.load(Ordering::Acquire) == 0 {
                continue;
            }

            let table = segment.load_table(&self.guard);
            self.current_table = table;

            for index in (0..table.len()).rev() {
                let head = table.slots()[index].load_consume(&self.guard).with_tag(0);

                if !head.is_null() {
                    self.next_entry = head.as_raw();
                    self.next_bucket_index = index as isize - 1;

                    return;
                }
            }
        }
    }
}
