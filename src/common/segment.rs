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

use crate::common::{
    entry::{self, Entry},
    table::{Table, REDIRECT_TAG},
    MAXIMUM_CAPACITY,
};

use std::{
    borrow::Borrow,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use crossbeam_epoch::{Guard, Owned, Shared};

/// One partition of the hash space.
///
/// A segment owns its bucket array outright: every insertion, removal,
/// replacement, and resize affecting its keys happens here. Readers traverse
/// without the lock in both map variants; the lock is the striped variant's
/// writer lock and the lock-free variant's rehash election (and value re-read
/// backup).
pub(crate) struct Segment<K, V> {
    pub(crate) table: crossbeam_epoch::Atomic<Table<K, V>>,
    pub(crate) count: AtomicUsize,
    pub(crate) threshold: AtomicUsize,
    pub(crate) load_factor: f32,
    pub(crate) lock: Mutex<()>,
}

impl<K, V> Segment<K, V> {
    /// `capacity` must be a power of two.
    pub(crate) fn with_capacity(capacity: usize, load_factor: f32) -> Self {
        Self {
            table: crossbeam_epoch::Atomic::new(Table::with_capacity(capacity)),
            count: AtomicUsize::new(0),
            threshold: AtomicUsize::new(threshold_for(capacity, load_factor)),
            load_factor,
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn table_shared<'g>(&self, guard: &'g Guard) -> Shared<'g, Table<K, V>> {
        self.table.load_consume(guard)
    }

    pub(crate) fn load_table<'g>(&self, guard: &'g Guard) -> &'g Table<K, V> {
        // set during construction and only ever swapped for a larger table
        unsafe { self.table_shared(guard).deref() }
    }

    /// Loads the head of the bucket for `hash`, tag stripped, for traversal.
    pub(crate) fn first<'g>(&self, hash: u32, guard: &'g Guard) -> Shared<'g, Entry<K, V>> {
        self.load_table(guard)
            .slot(hash)
            .load_consume(guard)
            .with_tag(0)
    }

    pub(crate) fn contains_key<Q: Eq + ?Sized>(&self, hash: u32, key: &Q, guard: &Guard) -> bool
    where
        K: Borrow<Q>,
    {
        if self.count.load(Ordering::Acquire) == 0 {
            return false;
        }

        !Table::find(self.first(hash, guard), hash, key, guard).is_null()
    }

    /// Re-reads an entry's value while holding the segment lock.
    ///
    /// Called only if an unsynchronized read ever observes a null value,
    /// which would mean the entry's publication was reordered ahead of its
    /// initialization. Release publication rules that out here, but the
    /// backup costs nothing on the fast path and keeps the reader correct
    /// under any weaker reordering.
    pub(crate) fn read_value_under_lock<'g>(
        &self,
        entry: &Entry<K, V>,
        guard: &'g Guard,
    ) -> Shared<'g, V> {
        let _lock = self.lock.lock().unwrap();

        entry.value.load_consume(guard)
    }
}

impl<K: Clone, V: Clone> Segment<K, V> {
    /// Doubles the bucket array, redistributing every chain with the
    /// trailing-run reuse described on [`Table::redistribute_into`]. No-op at
    /// [`MAXIMUM_CAPACITY`].
    ///
    /// The caller must hold `self.lock`; the lock is what makes this segment
    /// have exactly one rehasher. Writers that are not holding the lock are
    /// fenced off per bucket instead: each old slot is frozen with a tagged
    /// compare-and-swap before its chain is read, so a concurrent head
    /// publication either lands first (and is observed by the re-read here)
    /// or fails and retries against the new table. Readers are never fenced;
    /// old slots keep their pointers under the tag and old chains are left
    /// structurally intact.
    pub(crate) fn rehash(&self, guard: &Guard) {
        let old_shared = self.table_shared(guard);
        let old = unsafe { old_shared.deref() };
        let old_capacity = old.len();

        if old_capacity >= MAXIMUM_CAPACITY {
            return;
        }

        let new_table = Table::with_capacity(old_capacity << 1);

        for slot in old.slots() {
            loop {
                let head = slot.load(Ordering::Acquire, guard);
                assert_eq!(head.tag(), 0);

                if slot
                    .compare_exchange(
                        head,
                        head.with_tag(REDIRECT_TAG),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                        guard,
                    )
                    .is_err()
                {
                    continue;
                }

                if !head.is_null() {
                    old.redistribute_into(guard, head, &new_table);
                }

                break;
            }
        }

        let new_capacity = new_table.len();
        let retired = self.table.swap(Owned::new(new_table), Ordering::AcqRel, guard);
        self.threshold.store(
            threshold_for(new_capacity, self.load_factor),
            Ordering::Relaxed,
        );

        // only the bucket array itself; surviving entries now hang off the new table
        unsafe { entry::defer_acquire_destroy(guard, retired) };
    }
}

impl<K, V> Segment<K, V> {
    /// Unlinks and retires every chain, then zeroes the counters.
    pub(crate) fn clear(&self, total: &AtomicUsize) {
        if self.count.load(Ordering::Acquire) == 0 {
            return;
        }

        let guard = &crossbeam_epoch::pin();
        let _lock = self.lock.lock().unwrap();

        let table = self.load_table(guard);

        for slot in table.slots() {
            let head = slot.swap(Shared::null(), Ordering::AcqRel, guard);
            assert_eq!(head.tag(), 0);

            if !head.is_null() {
                unsafe { entry::defer_destroy_chain(guard, head) };
            }
        }

        let prior = self.count.swap(0, Ordering::Release);
        total.fetch_sub(prior, Ordering::Relaxed);
    }
}

impl<K, V> Drop for Segment<K, V> {
    fn drop(&mut self) {
        // no other thread can hold a reference here; deferred destruction
        // through an unprotected guard runs immediately
        std::sync::atomic::fence(Ordering::Acquire);

        let guard = unsafe { crossbeam_epoch::unprotected() };

        let table_shared = self.table.swap(Shared::null(), Ordering::Relaxed, guard);

        if table_shared.is_null() {
            return;
        }

        let table = unsafe { table_shared.deref() };

        for slot in table.slots() {
            let head = slot.swap(Shared::null(), Ordering::Relaxed, guard);

            if !head.is_null() {
                unsafe { entry::defer_destroy_chain(guard, head.with_tag(0)) };
            }
        }

        unsafe { entry::defer_acquire_destroy(guard, table_shared) };
    }
}

fn threshold_for(capacity: usize, load_factor: f32) -> usize {
    (capacity as f32 * load_factor) as usize
}
