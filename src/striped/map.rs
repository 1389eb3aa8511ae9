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
    self,
    entry::{self, Entry},
    iter::RawIter,
    segment::Segment,
    table::Table,
};
use crate::map::DefaultHashBuilder;

use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash},
    iter::FromIterator,
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam_epoch::Owned;

/// A concurrent hash map divided into segments, with lock-free readers and
/// one writer mutex per segment.
///
/// This map is functionally equivalent to the crate-level [`HashMap`]: the
/// same segment routing, the same immutable chain nodes, the same
/// weakly consistent iteration. The difference is purely the writer
/// discipline — every mutation of a segment runs under that segment's mutex,
/// so writers to the same segment queue up rather than spin. Writers to
/// different segments still never contend, and readers never block on
/// anything.
///
/// [`HashMap`]: ../../map/struct.HashMap.html
pub struct HashMap<K, V, S = DefaultHashBuilder> {
    segments: Box<[Segment<K, V>]>,
    build_hasher: S,
    len: AtomicUsize,
    segment_shift: u32,
}

impl<K, V> HashMap<K, V, DefaultHashBuilder> {
    /// Creates an empty `HashMap` with the default initial capacity (64),
    /// load factor (0.75), and concurrency level (16).
    pub fn new() -> Self {
        Self::with_capacity(common::DEFAULT_INITIAL_CAPACITY)
    }

    /// Creates an empty `HashMap` that can hold at least `capacity` elements
    /// before any segment grows, with the default load factor and
    /// concurrency level.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }

    /// Creates an empty `HashMap` with the specified initial capacity, load
    /// factor, and concurrency level.
    ///
    /// # Panics
    ///
    /// Panics if `load_factor` is not greater than zero or if
    /// `concurrency_level` is zero.
    pub fn with_capacity_load_factor_and_concurrency_level(
        initial_capacity: usize,
        load_factor: f32,
        concurrency_level: usize,
    ) -> Self {
        Self::with_capacity_load_factor_concurrency_level_and_hasher(
            initial_capacity,
            load_factor,
            concurrency_level,
            DefaultHashBuilder::default(),
        )
    }
}

impl<K, V, S: BuildHasher> HashMap<K, V, S> {
    /// Creates an empty `HashMap` that uses `build_hasher` to hash keys,
    /// with the default initial capacity, load factor, and concurrency
    /// level.
    pub fn with_hasher(build_hasher: S) -> Self {
        Self::with_capacity_and_hasher(common::DEFAULT_INITIAL_CAPACITY, build_hasher)
    }

    /// Creates an empty `HashMap` with at least `capacity` total capacity,
    /// using `build_hasher` to hash keys and the default load factor and
    /// concurrency level.
    pub fn with_capacity_and_hasher(capacity: usize, build_hasher: S) -> Self {
        Self::with_capacity_load_factor_concurrency_level_and_hasher(
            capacity,
            common::DEFAULT_LOAD_FACTOR,
            common::DEFAULT_CONCURRENCY_LEVEL,
            build_hasher,
        )
    }

    /// Creates an empty `HashMap` with the specified initial capacity, load
    /// factor, concurrency level, and hasher; see
    /// [the lock-free variant's constructor] for the sizing rules.
    ///
    /// # Panics
    ///
    /// Panics if `load_factor` is not greater than zero or if
    /// `concurrency_level` is zero.
    ///
    /// [the lock-free variant's constructor]:
    /// ../../map/struct.HashMap.html#method.with_capacity_load_factor_concurrency_level_and_hasher
    pub fn with_capacity_load_factor_concurrency_level_and_hasher(
        initial_capacity: usize,
        load_factor: f32,
        concurrency_level: usize,
        build_hasher: S,
    ) -> Self {
        assert!(
            load_factor > 0.0,
            "load factor must be greater than zero"
        );
        assert!(
            concurrency_level > 0,
            "concurrency level must be greater than zero"
        );

        let (segment_count, segment_shift) = common::segment_count_and_shift(concurrency_level);
        let segment_capacity = common::per_segment_capacity(initial_capacity, segment_count);

        let segments: Box<[Segment<K, V>]> = (0..segment_count)
            .map(|_| Segment::with_capacity(segment_capacity, load_factor))
            .collect();

        Self {
            segments,
            build_hasher,
            len: AtomicUsize::new(0),
            segment_shift,
        }
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Returns the number of elements in the map.
    ///
    /// The count is a single atomic load of the shared total; while other
    /// threads are mutating the map it is an instantaneous approximation,
    /// exact only in quiescence.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if the map contains no elements, with the same
    /// caveats as [`len`].
    ///
    /// [`len`]: #method.len
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of segments in the map.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Returns a reference to the map's [`BuildHasher`].
    ///
    /// [`BuildHasher`]: https://doc.rust-lang.org/std/hash/trait.BuildHasher.html
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }

    /// Removes all entries, one segment at a time.
    ///
    /// Clearing is not atomic across segments: a concurrent observer may see
    /// some segments emptied while others still hold their entries.
    pub fn clear(&self) {
        for segment in self.segments.iter() {
            segment.clear(&self.len);
        }
    }

    /// Returns a weakly consistent iterator over the map's entries; see
    /// [the lock-free variant's `iter`] for its guarantees.
    ///
    /// [the lock-free variant's `iter`]: ../../map/struct.HashMap.html#method.iter
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter {
            map: self,
            raw: RawIter::new(&self.segments),
        }
    }

    fn segment_for(&self, hash: u32) -> &Segment<K, V> {
        let index = if self.segment_shift == 32 {
            0
        } else {
            (hash >> self.segment_shift) as usize
        };

        &self.segments[index]
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> HashMap<K, V, S> {
    /// Returns a clone of the value corresponding to `key`, if any.
    ///
    /// `Q` may be any borrowed form of `K`, but [`Hash`] and [`Eq`] on `Q`
    /// must match those of `K`.
    ///
    /// [`Hash`]: https://doc.rust-lang.org/std/hash/trait.Hash.html
    /// [`Eq`]: https://doc.rust-lang.org/std/cmp/trait.Eq.html
    pub fn get<Q: Hash + Eq + ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        V: Clone,
    {
        let hash = common::hash(&self.build_hasher, key);
        let segment = self.segment_for(hash);

        if segment.count.load(Ordering::Acquire) == 0 {
            return None;
        }

        let guard = &crossbeam_epoch::pin();

        let found = Table::find(segment.first(hash, guard), hash, key, guard);

        match unsafe { found.as_ref() } {
            None => None,
            Some(found_ref) => {
                let value = found_ref.value.load_consume(guard);

                if !value.is_null() {
                    return Some(unsafe { value.deref() }.clone());
                }

                // only reachable if the entry's publication was reordered
                // ahead of its initialization; the lock orders us after the
                // writer that published it
                let value = segment.read_value_under_lock(found_ref, guard);
                assert!(!value.is_null());

                Some(unsafe { value.deref() }.clone())
            }
        }
    }

    /// Returns `true` if the map contains a value for `key`.
    pub fn contains_key<Q: Hash + Eq + ?Sized>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
    {
        let hash = common::hash(&self.build_hasher, key);
        let guard = &crossbeam_epoch::pin();

        self.segment_for(hash).contains_key(hash, key, guard)
    }
}

impl<K: Hash + Eq + Clone, V: Clone, S: BuildHasher> HashMap<K, V, S> {
    /// Maps `key` to `value`, returning a clone of the value previously
    /// associated with `key`, if any.
    ///
    /// If the segment's entry count would exceed its threshold, the
    /// segment's bucket array is doubled before the insertion so the new
    /// entry lands in the grown table.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.do_insert(key, value, false)
    }

    /// Maps `key` to `value` only if `key` has no value, returning a clone
    /// of the existing value otherwise.
    pub fn insert_if_absent(&self, key: K, value: V) -> Option<V> {
        self.do_insert(key, value, true)
    }

    /// Removes the value corresponding to `key`, returning a clone of it if
    /// one was present.
    pub fn remove<Q: Hash + Eq + ?Sized>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
    {
        self.do_remove(key, |_| true)
    }

    /// Removes the entry for `key` only if its current value equals `value`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_entry<Q: Hash + Eq + ?Sized>(&self, key: &Q, value: &V) -> bool
    where
        K: Borrow<Q>,
        V: PartialEq,
    {
        self.do_remove(key, |current| current == value).is_some()
    }

    /// Replaces the value for `key` only if `key` already has one, returning
    /// a clone of the previous value.
    ///
    /// Unlike [`insert`], this never adds an entry.
    ///
    /// [`insert`]: #method.insert
    pub fn replace<Q: Hash + Eq + ?Sized>(&self, key: &Q, value: V) -> Option<V>
    where
        K: Borrow<Q>,
    {
        let hash = common::hash(&self.build_hasher, key);
        let segment = self.segment_for(hash);
        let guard = &crossbeam_epoch::pin();
        let _lock = segment.lock.lock().unwrap();

        let first = segment.first(hash, guard);
        let found = Table::find(first, hash, key, guard);

        let found_ref = match unsafe { found.as_ref() } {
            Some(found_ref) => found_ref,
            None => return None,
        };

        let swapped = found_ref
            .value
            .swap(Owned::new(value), Ordering::AcqRel, guard);
        assert!(!swapped.is_null());

        let previous = unsafe { swapped.deref() }.clone();
        unsafe { guard.defer_destroy(swapped) };

        Some(previous)
    }

    /// Replaces the value for `key` with `new` only if the current value
    /// equals `current`, returning whether the replacement happened.
    pub fn compare_and_replace<Q: Hash + Eq + ?Sized>(&self, key: &Q, current: &V, new: V) -> bool
    where
        K: Borrow<Q>,
        V: PartialEq,
    {
        let hash = common::hash(&self.build_hasher, key);
        let segment = self.segment_for(hash);
        let guard = &crossbeam_epoch::pin();
        let _lock = segment.lock.lock().unwrap();

        let first = segment.first(hash, guard);
        let found = Table::find(first, hash, key, guard);

        let found_ref = match unsafe { found.as_ref() } {
            Some(found_ref) => found_ref,
            None => return false,
        };

        let value = found_ref.value.load_consume(guard);
        assert!(!value.is_null());

        if unsafe { value.deref() } != current {
            return false;
        }

        let swapped = found_ref
            .value
            .swap(Owned::new(new), Ordering::AcqRel, guard);
        unsafe { guard.defer_destroy(swapped) };

        true
    }

    fn do_insert(&self, key: K, value: V, only_if_absent: bool) -> Option<V> {
        let hash = common::hash(&self.build_hasher, &key);
        let segment = self.segment_for(hash);
        let guard = &crossbeam_epoch::pin();
        let _lock = segment.lock.lock().unwrap();

        if segment.count.load(Ordering::Relaxed) + 1 > segment.threshold.load(Ordering::Relaxed) {
            segment.rehash(guard);
        }

        // reload: the rehash may have published a larger table
        let table = segment.load_table(guard);
        let slot = table.slot(hash);
        let first = slot.load_consume(guard);
        assert_eq!(first.tag(), 0);

        let found = Table::find(first, hash, &key, guard);

        if let Some(found_ref) = unsafe { found.as_ref() } {
            let value_ptr = found_ref.value.load_consume(guard);
            assert!(!value_ptr.is_null());

            let previous = unsafe { value_ptr.deref() }.clone();

            if !only_if_absent {
                let swapped = found_ref
                    .value
                    .swap(Owned::new(value), Ordering::AcqRel, guard);
                unsafe { guard.defer_destroy(swapped) };
            }

            Some(previous)
        } else {
            slot.store(Entry::new(key, hash, value, first), Ordering::Release);
            segment.count.fetch_add(1, Ordering::Release);
            self.len.fetch_add(1, Ordering::Relaxed);

            None
        }
    }

    fn do_remove<Q: Hash + Eq + ?Sized, F: FnMut(&V) -> bool>(
        &self,
        key: &Q,
        mut condition: F,
    ) -> Option<V>
    where
        K: Borrow<Q>,
    {
        let hash = common::hash(&self.build_hasher, key);
        let segment = self.segment_for(hash);
        let guard = &crossbeam_epoch::pin();
        let _lock = segment.lock.lock().unwrap();

        let table = segment.load_table(guard);
        let slot = table.slot(hash);
        let first = slot.load_consume(guard);
        assert_eq!(first.tag(), 0);

        let target = Table::find(first, hash, key, guard);

        if target.is_null() {
            return None;
        }

        let target_ref = unsafe { target.deref() };
        let value = target_ref.value.load_consume(guard);
        assert!(!value.is_null());
        let value_ref = unsafe { value.deref() };

        if !condition(value_ref) {
            return None;
        }

        let previous = value_ref.clone();

        // everything after the removed entry stays shared; everything before
        // it is cloned onto that suffix
        let new_first = Table::clone_without(guard, first, target);
        slot.store(new_first, Ordering::Release);

        unsafe {
            let mut current = first;

            while current != target {
                let next = current.deref().next_entry(guard);
                entry::defer_destroy_entry(guard, current);
                current = next;
            }

            entry::defer_destroy_entry(guard, target);
        }

        segment.count.fetch_sub(1, Ordering::Release);
        self.len.fetch_sub(1, Ordering::Relaxed);

        Some(previous)
    }
}

impl<K, V, S: BuildHasher + Default> Default for HashMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K: Hash + Eq + Clone, V: Clone, S: BuildHasher + Default> FromIterator<(K, V)>
    for HashMap<K, V, S>
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();

        let capacity = ((lower as f32 / common::DEFAULT_LOAD_FACTOR) as usize + 1)
            .max(common::DEFAULT_INITIAL_CAPACITY);

        let map = Self::with_capacity_and_hasher(capacity, S::default());

        for (key, value) in iter {
            map.insert(key, value);
        }

        map
    }
}

impl<K: Hash + Eq + Clone, V: Clone, S: BuildHasher> Extend<(K, V)> for HashMap<K, V, S> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

/// A weakly consistent iterator over a [`HashMap`]'s entries.
///
/// [`HashMap`]: struct.HashMap.html
pub struct Iter<'m, K, V, S = DefaultHashBuilder> {
    map: &'m HashMap<K, V, S>,
    raw: RawIter<'m, K, V>,
}

impl<'m, K: Hash + Eq + Clone, V: Clone, S: BuildHasher> Iterator for Iter<'m, K, V, S> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            let entry = unsafe { &*self.raw.next_entry()? };

            let value = entry.value.load_consume(self.raw.guard());

            // a null value could only be a publication racing ahead of its
            // initialization; skipping is within the weak guarantees
            if value.is_null() {
                continue;
            }

            return Some((entry.key.clone(), unsafe { value.deref() }.clone()));
        }
    }
}

impl<'m, K: Hash + Eq + Clone, V: Clone, S: BuildHasher> Iter<'m, K, V, S> {
    /// Removes the key of the most recently yielded entry from the map; see
    /// [the lock-free variant's `Iter::remove`].
    ///
    /// # Panics
    ///
    /// Panics if called before any entry has been yielded, or twice without
    /// an intervening `next`.
    ///
    /// [the lock-free variant's `Iter::remove`]:
    /// ../../map/struct.Iter.html#method.remove
    pub fn remove(&mut self) -> Option<V> {
        let last_returned = self.raw.take_last_returned();
        let key = unsafe { &(*last_returned).key };

        self.map.remove(key)
    }
}
