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

use crate::common::entry::{self, Entry};

use std::{borrow::Borrow, sync::atomic::Ordering};

use crossbeam_epoch::{Atomic, Guard, Shared};

/// Set on a retired table's slots once their chains have been migrated.
///
/// The tagged slot keeps its pointer so that readers pinned on the old table
/// can finish traversing, but any writer's compare-and-swap against the
/// untagged head it previously loaded must fail, forcing it over to the new
/// table.
pub(crate) const REDIRECT_TAG: usize = 1;

/// A power-of-two array of bucket slots, each holding the head of a chain.
pub(crate) struct Table<K, V> {
    slots: Box<[Atomic<Entry<K, V>>]>,
}

impl<K, V> Table<K, V> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two());

        Self {
            slots: (0..capacity).map(|_| Atomic::null()).collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slots(&self) -> &[Atomic<Entry<K, V>>] {
        &self.slots
    }

    pub(crate) fn slot_index(&self, hash: u32) -> usize {
        (hash as usize) & (self.slots.len() - 1)
    }

    pub(crate) fn slot(&self, hash: u32) -> &Atomic<Entry<K, V>> {
        &self.slots[self.slot_index(hash)]
    }

    /// Walks the chain starting at `head` for an entry matching `hash` and
    /// `key`. `head` must have its tag stripped.
    pub(crate) fn find<'g, Q: Eq + ?Sized>(
        mut head: Shared<'g, Entry<K, V>>,
        hash: u32,
        key: &Q,
        guard: &'g Guard,
    ) -> Shared<'g, Entry<K, V>>
    where
        K: Borrow<Q>,
    {
        while let Some(entry) = unsafe { head.as_ref() } {
            if entry.hash == hash && entry.key.borrow() == key {
                return head;
            }

            head = entry.next_entry(guard);
        }

        Shared::null()
    }
}

impl<K: Clone, V: Clone> Table<K, V> {
    /// Builds the replacement chain that removes `target` from the chain
    /// rooted at `first`.
    ///
    /// Entries after `target` are shared with the old chain unchanged; every
    /// entry before it is cloned onto that suffix, so the old chain's nodes
    /// are left intact for readers that already hold them. The returned head
    /// is unpublished; on a failed publication it must be torn back down with
    /// [`entry::destroy_unpublished_prefix`].
    pub(crate) fn clone_without<'g>(
        guard: &'g Guard,
        first: Shared<'g, Entry<K, V>>,
        target: Shared<'g, Entry<K, V>>,
    ) -> Shared<'g, Entry<K, V>> {
        assert!(!target.is_null());

        let mut new_first = unsafe { target.deref() }.next_entry(guard);
        let mut current = first;

        while current != target {
            assert!(!current.is_null());
            let entry = unsafe { current.deref() };

            let value = unsafe { entry.value.load_consume(guard).deref() }.clone();
            new_first =
                Entry::new(entry.key.clone(), entry.hash, value, new_first).into_shared(guard);

            current = entry.next_entry(guard);
        }

        new_first
    }

    /// Redistributes the frozen chain at `head` into `new_table`, whose
    /// length must be double this table's.
    ///
    /// Because the capacity doubles, each entry either keeps its index or
    /// moves up by the old length, so the longest trailing run of entries
    /// that agree on their new index can be linked into the new table as-is.
    /// Entries ahead of that run are cloned to their new slots and the
    /// originals retired; their `next` fields are never touched, so readers
    /// still walking the old chain observe it whole.
    pub(crate) fn redistribute_into<'g>(
        &self,
        guard: &'g Guard,
        head: Shared<'g, Entry<K, V>>,
        new_table: &Table<K, V>,
    ) {
        assert!(!head.is_null());
        assert_eq!(head.tag(), 0);
        assert_eq!(new_table.len(), self.len() * 2);

        let head_ref = unsafe { head.deref() };
        let head_index = new_table.slot_index(head_ref.hash);

        if head_ref.next_entry(guard).is_null() {
            new_table.slots[head_index].store(head, Ordering::Relaxed);

            return;
        }

        let mut last_run = head;
        let mut last_index = head_index;

        let mut current = head_ref.next_entry(guard);

        while let Some(entry) = unsafe { current.as_ref() } {
            let index = new_table.slot_index(entry.hash);

            if index != last_index {
                last_index = index;
                last_run = current;
            }

            current = entry.next_entry(guard);
        }

        new_table.slots[last_index].store(last_run, Ordering::Relaxed);

        let mut current = head;

        while current != last_run {
            let entry = unsafe { current.deref() };
            let index = new_table.slot_index(entry.hash);

            let new_head = new_table.slots[index].load(Ordering::Relaxed, guard);
            let value = unsafe { entry.value.load_consume(guard).deref() }.clone();

            new_table.slots[index].store(
                Entry::new(entry.key.clone(), entry.hash, value, new_head),
                Ordering::Relaxed,
            );

            let next = entry.next_entry(guard);
            unsafe { entry::defer_destroy_entry(guard, current) };
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain<'g>(guard: &'g Guard, pairs: &[(u32, i32)]) -> Shared<'g, Entry<u32, i32>> {
        let mut head = Shared::null();

        for &(hash, value) in pairs.iter().rev() {
            head = Entry::new(hash, hash, value, head).into_shared(guard);
        }

        head
    }

    fn collect<'g>(guard: &'g Guard, mut head: Shared<'g, Entry<u32, i32>>) -> Vec<(u32, i32)> {
        let mut pairs = Vec::new();

        while let Some(entry) = unsafe { head.as_ref() } {
            let value = unsafe { entry.value.load_consume(guard).deref() };
            pairs.push((entry.key, *value));
            head = entry.next_entry(guard);
        }

        pairs
    }

    #[test]
    fn find_matches_hash_and_key() {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let head = chain(guard, &[(1, 10), (2, 20), (3, 30)]);

        let found = Table::find(head, 2, &2, guard);
        assert!(!found.is_null());
        assert_eq!(unsafe { found.deref() }.key, 2);

        assert!(Table::<u32, i32>::find(head, 4, &4, guard).is_null());

        unsafe { entry::defer_destroy_chain(guard, head) };
    }

    #[test]
    fn clone_without_shares_suffix() {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let head = chain(guard, &[(1, 10), (2, 20), (3, 30)]);

        let target = Table::find(head, 2, &2, guard);
        let new_head = Table::clone_without(guard, head, target);

        let survivors = collect(guard, new_head);
        assert_eq!(survivors, vec![(1, 10), (3, 30)]);

        // the suffix node is the same allocation in both chains
        let old_tail = Table::find(head, 3, &3, guard);
        let new_tail = Table::find(new_head, 3, &3, guard);
        assert_eq!(old_tail, new_tail);

        let suffix = unsafe { target.deref() }.next_entry(guard);

        unsafe {
            entry::destroy_unpublished_prefix(new_head, suffix);
            entry::defer_destroy_chain(guard, head);
        }
    }

    #[test]
    fn redistribute_splits_by_new_index_bit() {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let old = Table::with_capacity(1);
        let new = Table::with_capacity(2);

        // hashes 0 and 1 collide at capacity 1 but split at capacity 2
        let head = chain(guard, &[(0, 0), (1, 100), (0, 1), (1, 101)]);
        old.slots[0].store(head, Ordering::Relaxed);

        old.redistribute_into(guard, head, &new);

        let evens = collect(guard, new.slots[0].load(Ordering::Relaxed, guard));
        let odds = collect(guard, new.slots[1].load(Ordering::Relaxed, guard));

        assert_eq!(evens.len(), 2);
        assert!(evens.iter().all(|&(k, _)| k == 0));
        assert_eq!(odds.len(), 2);
        assert!(odds.iter().all(|&(k, _)| k == 1));

        unsafe {
            entry::defer_destroy_chain(guard, new.slots[0].load(Ordering::Relaxed, guard));
            entry::defer_destroy_chain(guard, new.slots[1].load(Ordering::Relaxed, guard));
        }
    }
}
