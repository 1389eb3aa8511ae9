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

use std::{
    mem,
    sync::atomic::{self, Ordering},
};

use crossbeam_epoch::{unprotected, Atomic, Guard, Owned, Shared};

/// A node in a bucket chain.
///
/// `key`, `hash`, and `next` never change once the entry is reachable from a
/// bucket slot; any structural change to a chain is expressed by allocating
/// new entries and publishing a new head. `value` is the one mutable field
/// and is only ever replaced by whole-pointer atomic operations.
///
/// Every entry reachable from a segment's current table exclusively owns the
/// allocation behind `value`. Chain surgery therefore clones keys and values
/// into replacement entries instead of aliasing them, and retiring an entry
/// always retires its value with it.
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) hash: u32,
    pub(crate) value: Atomic<V>,
    pub(crate) next: Atomic<Entry<K, V>>,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(key: K, hash: u32, value: V, next: Shared<'_, Entry<K, V>>) -> Owned<Self> {
        Owned::new(Self {
            key,
            hash,
            value: Atomic::new(value),
            next: Atomic::from(next),
        })
    }

    pub(crate) fn next_entry<'g>(&self, guard: &'g Guard) -> Shared<'g, Entry<K, V>> {
        self.next.load_consume(guard)
    }
}

/// Schedules an entry and the value it owns for destruction once no pinned
/// thread can reach them.
pub(crate) unsafe fn defer_destroy_entry<'g, K, V>(
    guard: &'g Guard,
    ptr: Shared<'g, Entry<K, V>>,
) {
    assert!(!ptr.is_null());

    guard.defer_unchecked(move || {
        atomic::fence(Ordering::Acquire);
        destroy_entry(ptr);
    });
}

/// Schedules every entry of a detached chain for destruction.
///
/// The chain must have been unlinked from its slot; entries it shares with a
/// newer table must not be reachable through `head`.
pub(crate) unsafe fn defer_destroy_chain<'g, K, V>(
    guard: &'g Guard,
    mut head: Shared<'g, Entry<K, V>>,
) {
    while !head.is_null() {
        let next = head.deref().next.load(Ordering::Relaxed, guard);
        defer_destroy_entry(guard, head);
        head = next;
    }
}

/// Immediately destroys a chain of entries that was allocated but never
/// published, stopping at (and excluding) `suffix`.
pub(crate) unsafe fn destroy_unpublished_prefix<K, V>(
    head: Shared<'_, Entry<K, V>>,
    suffix: Shared<'_, Entry<K, V>>,
) {
    let guard = unprotected();

    let mut current = head;

    while current != suffix {
        assert!(!current.is_null());
        let next = current.deref().next.load(Ordering::Relaxed, guard);
        destroy_entry(current);
        current = next;
    }
}

/// Immediately destroys an entry that was allocated but never published.
pub(crate) unsafe fn dispose_unpublished<K, V>(entry: Owned<Entry<K, V>>) {
    let value = entry.value.load(Ordering::Relaxed, unprotected());
    assert!(!value.is_null());

    mem::drop(value.into_owned());
    mem::drop(entry);
}

unsafe fn destroy_entry<K, V>(ptr: Shared<'_, Entry<K, V>>) {
    let value = ptr.deref().value.load(Ordering::Relaxed, unprotected());
    assert!(!value.is_null());

    mem::drop(value.into_owned());
    mem::drop(ptr.into_owned());
}

/// Schedules an allocation for destruction with an acquire fence, for memory
/// that may have last been written by another thread.
pub(crate) unsafe fn defer_acquire_destroy<'g, T>(guard: &'g Guard, ptr: Shared<'g, T>) {
    assert!(!ptr.is_null());

    guard.defer_unchecked(move || {
        atomic::fence(Ordering::Acquire);
        mem::drop(ptr.into_owned());
    });
}
