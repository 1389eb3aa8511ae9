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

//! A segmented hash map whose writers synchronize by compare-and-swap on
//! bucket heads.


use crate::common::{
    self,
    entry::{self, Entry},
    iter::RawIter,
    segment::Segment,
    table::Table,
};

use std::{
    borrow::Borrow,
    hash::{BuildHasher, Hash},
    hint,
    iter::FromIterator,
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam_epoch::{Guard, Owned, Shared};

/// The default hashing algorithm is [aHash], a fast hash with some
/// resistance to DoS attacks, though weaker than the standard library's
/// [`RandomState`].
///
/// [aHash]: https://docs.rs/ahash
/// [`RandomState`]: https://doc.rust-lang.org/std/collections/hash_map/struct.RandomState.html
pub type DefaultHashBuilder = ahash::RandomState;

/// A concurrent hash map divided into segments, with lock-free readers and
/// lock-free writers.
///
/// The map routes each key to one of a fixed set of segments using the upper
/// bits of its spread hash; the lower bits pick a bucket chain within that
/// segment. Readers walk chains with nothing but atomic loads. Writers to a
/// segment publish by compare-and-swap on the affected bucket head and retry
/// on contention, so writers to different segments never interact at all and
/// writers to different buckets rarely do.
///
/// Chain nodes are immutable except for their value pointer: removing an
/// entry or doubling a bucket array never rewrites a published node's links,
/// it replaces the nodes in front of the change with fresh copies and shares
/// the rest. A reader that captured a head before such a change therefore
/// keeps traversing a self-consistent chain.
///
/// Operations that return key or value data require [`Clone`], since the
/// referenced entries may be unlinked (and later reclaimed) at any moment
/// after the operation completes.
///
/// It is required that the keys implement the [`Eq`] and [`Hash`] traits,
/// and that `k1 == k2` implies `hash(k1) == hash(k2)`. It is a logic error
/// for a key's hash or equality to change while it is in the map.
///
/// [`Clone`]: https://doc.rust-lang.org/std/clone/trait.Clone.html
/// [`Eq`]: https://doc.rust-lang.org/std/cmp/trait.Eq.html
/// [`Hash`]: https://doc.rust-lang.org/std/hash/trait.Hash.html
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
    /// factor, concurrency level, and hasher.
    ///
    /// The map allocates one segment for the smallest power of two no less
    /// than `concurrency_level` (clamped to [`MAX_SEGMENTS`]); each segment's
    /// initial bucket count is the smallest power of two that lets the
    /// segments jointly hold `initial_capacity` entries (clamped to
    /// [`MAXIMUM_CAPACITY`]). A segment doubles its bucket array when its
    /// entry count would exceed `bucket count × load_factor`.
    ///
    /// # Panics
    ///
    /// Panics if `load_factor` is not greater than zero or if
    /// `concurrency_level` is zero.
    ///
    /// [`MAX_SEGMENTS`]: ../constant.MAX_SEGMENTS.html
    /// [`MAXIMUM_CAPACITY`]: ../constant.MAXIMUM_CAPACITY.html
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

impl<K, V> HashMap<K, V, DefaultHashBuilder> {
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

    /// Returns a weakly consistent iterator over the map's entries.
    ///
    /// Every entry present for the whole traversal is yielded exactly once;
    /// entries inserted or removed while the iterator is live may or may not
    /// be observed. The iterator never fails or skips ahead because of
    /// concurrent writers.
    ///
    /// The iterator pins the current memory reclamation epoch for as long as
    /// it is alive, so long-lived iterators delay the release of retired
    /// entries map-wide.
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter {
            map: self,
            raw: RawIter::new(&self.segments),
        }
    }

    fn segment_for(&self, hash: u32) -> &Segment<K, V> {
        &self.segments[self.segment_index_from_hash(hash)]
    }

    fn segment_index_from_hash(&self, hash: u32) -> usize {
        if self.segment_shift == 32 {
            0
        } else {
            (hash >> self.segment_shift) as usize
        }
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

        loop {
            let found = Table::find(segment.first(hash, guard), hash, key, guard);

            if found.is_null() {
                return None;
            }

            let value = unsafe { found.deref() }.value.load_consume(guard);

            if !value.is_null() {
                return Some(unsafe { value.deref() }.clone());
            }

            // A null here would mean the entry's publication was reordered
            // ahead of its initialization. Not known to occur under release
            // publication, but the recovery is cheap: walk again from a
            // freshly loaded head until the value store is visible.
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
    ///
    /// The existing mapping is left untouched when `Some` is returned.
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

        loop {
            let table_shared = segment.table_shared(guard);
            let table = unsafe { table_shared.deref() };
            let slot = table.slot(hash);
            let first = slot.load_consume(guard);

            if first.tag() != 0 {
                wait_for_next_table(segment, table_shared, guard);
                continue;
            }

            let found = Table::find(first, hash, key, guard);

            if found.is_null() {
                if is_stable(segment, slot, first, table_shared, guard) {
                    return None;
                }

                continue;
            }

            let swapped = unsafe { found.deref() }.value.swap(
                Owned::new(value.clone()),
                Ordering::AcqRel,
                guard,
            );
            assert!(!swapped.is_null());

            let previous = unsafe { swapped.deref() }.clone();
            unsafe { guard.defer_destroy(swapped) };

            if entry_survives(segment, hash, table_shared, first, found, guard) {
                return Some(previous);
            }

            // the entry was cloned away or removed under us; redo the swap
            // against whatever is live now
        }
    }

    /// Replaces the value for `key` with `new` only if the current value
    /// equals `current`, returning whether the replacement happened.
    ///
    /// When two threads race this operation from the same starting value,
    /// exactly one of them wins the transition.
    pub fn compare_and_replace<Q: Hash + Eq + ?Sized>(&self, key: &Q, current: &V, new: V) -> bool
    where
        K: Borrow<Q>,
        V: PartialEq,
    {
        let hash = common::hash(&self.build_hasher, key);
        let segment = self.segment_for(hash);
        let guard = &crossbeam_epoch::pin();

        loop {
            let table_shared = segment.table_shared(guard);
            let table = unsafe { table_shared.deref() };
            let slot = table.slot(hash);
            let first = slot.load_consume(guard);

            if first.tag() != 0 {
                wait_for_next_table(segment, table_shared, guard);
                continue;
            }

            let found = Table::find(first, hash, key, guard);

            if found.is_null() {
                if is_stable(segment, slot, first, table_shared, guard) {
                    return false;
                }

                continue;
            }

            let value = unsafe { found.deref() }.value.load_consume(guard);
            assert!(!value.is_null());

            if unsafe { value.deref() } != current {
                if is_stable(segment, slot, first, table_shared, guard) {
                    return false;
                }

                continue;
            }

            match unsafe { found.deref() }.value.compare_exchange(
                value,
                Owned::new(new.clone()),
                Ordering::AcqRel,
                Ordering::Relaxed,
                guard,
            ) {
                Ok(_) => {
                    unsafe { guard.defer_destroy(value) };

                    if entry_survives(segment, hash, table_shared, first, found, guard) {
                        return true;
                    }

                    // swapped on an entry that was concurrently cloned away
                    // or removed; settle the outcome against the live chain
                }
                Err(error) => {
                    // lost a race on the value pointer itself
                    drop(error.new);
                }
            }
        }
    }

    fn do_insert(&self, key: K, value: V, only_if_absent: bool) -> Option<V> {
        let hash = common::hash(&self.build_hasher, &key);
        let segment = self.segment_for(hash);
        let guard = &crossbeam_epoch::pin();

        if segment.count.load(Ordering::Acquire) + 1 > segment.threshold.load(Ordering::Relaxed) {
            grow(segment, guard);
        }

        let mut spare: Option<Owned<Entry<K, V>>> = None;

        loop {
            let table_shared = segment.table_shared(guard);
            let table = unsafe { table_shared.deref() };
            let slot = table.slot(hash);
            let first = slot.load_consume(guard);

            if first.tag() != 0 {
                wait_for_next_table(segment, table_shared, guard);
                continue;
            }

            let found = Table::find(first, hash, &key, guard);

            if let Some(found_ref) = unsafe { found.as_ref() } {
                let previous = if only_if_absent {
                    let value = found_ref.value.load_consume(guard);
                    assert!(!value.is_null());

                    unsafe { value.deref() }.clone()
                } else {
                    let swapped = found_ref.value.swap(
                        Owned::new(value.clone()),
                        Ordering::AcqRel,
                        guard,
                    );
                    assert!(!swapped.is_null());

                    let previous = unsafe { swapped.deref() }.clone();
                    unsafe { guard.defer_destroy(swapped) };

                    previous
                };

                if entry_survives(segment, hash, table_shared, first, found, guard) {
                    if let Some(spare) = spare {
                        unsafe { entry::dispose_unpublished(spare) };
                    }

                    return Some(previous);
                }

                continue;
            }

            let new_entry = match spare.take() {
                Some(new_entry) => {
                    // not yet published; plain store is enough
                    new_entry.next.store(first, Ordering::Relaxed);

                    new_entry
                }
                None => Entry::new(key.clone(), hash, value.clone(), first),
            };

            match slot.compare_exchange(
                first,
                new_entry,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            ) {
                Ok(_) => {
                    // A concurrent rehash cannot lose this publication: the
                    // rehasher freezes each slot with a tagged CAS before it
                    // reads the chain, so either this entry is already in the
                    // chain it migrates or the freeze fails and it re-reads.
                    segment.count.fetch_add(1, Ordering::Release);
                    self.len.fetch_add(1, Ordering::Relaxed);

                    return None;
                }
                Err(error) => {
                    spare = Some(error.new);
                }
            }
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

        loop {
            let table_shared = segment.table_shared(guard);
            let table = unsafe { table_shared.deref() };
            let slot = table.slot(hash);
            let first = slot.load_consume(guard);

            if first.tag() != 0 {
                wait_for_next_table(segment, table_shared, guard);
                continue;
            }

            let target = Table::find(first, hash, key, guard);

            if target.is_null() {
                if is_stable(segment, slot, first, table_shared, guard) {
                    return None;
                }

                continue;
            }

            let target_ref = unsafe { target.deref() };
            let value = target_ref.value.load_consume(guard);
            assert!(!value.is_null());
            let value_ref = unsafe { value.deref() };

            if !condition(value_ref) {
                if is_stable(segment, slot, first, table_shared, guard) {
                    return None;
                }

                continue;
            }

            // everything after the removed entry stays shared; everything
            // before it is cloned onto that suffix
            let new_first = Table::clone_without(guard, first, target);

            match slot.compare_exchange(
                first,
                new_first,
                Ordering::Release,
                Ordering::Relaxed,
                guard,
            ) {
                Ok(_) => {
                    // The entry is unlinked, but a replacement may have swapped
                    // its value in the window between our read and the unlink
                    // and already reported success against this chain. If so,
                    // the removal must not stand.
                    let current = target_ref.value.load(Ordering::Acquire, guard);

                    unsafe {
                        let mut cursor = first;

                        while cursor != target {
                            let next = cursor.deref().next_entry(guard);
                            entry::defer_destroy_entry(guard, cursor);
                            cursor = next;
                        }

                        entry::defer_destroy_entry(guard, target);
                    }

                    segment.count.fetch_sub(1, Ordering::Release);
                    self.len.fetch_sub(1, Ordering::Relaxed);

                    if current == value {
                        return Some(value_ref.clone());
                    }

                    // resurrect the value that won, then settle the removal
                    // against whatever chain is live now
                    let resurrected = unsafe { current.deref() }.clone();
                    self.insert_if_absent(target_ref.key.clone(), resurrected);
                }
                Err(error) => {
                    // the clones were never published; tear them down now
                    unsafe {
                        entry::destroy_unpublished_prefix(
                            error.new,
                            target_ref.next_entry(guard),
                        )
                    };
                }
            }
        }
    }
}

impl<K, V, S: Default> Default for HashMap<K, V, S>
where
    S: BuildHasher,
{
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
    /// Removes the key of the most recently yielded entry from the map.
    ///
    /// The removal goes through the map itself, so it removes whatever live
    /// entry currently holds that key, which is not necessarily the yielded
    /// entry. Returns a clone of the removed value, if the key was still
    /// present.
    ///
    /// # Panics
    ///
    /// Panics if called before any entry has been yielded, or twice without
    /// an intervening [`next`].
    ///
    /// [`next`]: #method.next
    pub fn remove(&mut self) -> Option<V> {
        let last_returned = self.raw.take_last_returned();
        let key = unsafe { &(*last_returned).key };

        self.map.remove(key)
    }
}

fn is_stable<K, V>(
    segment: &Segment<K, V>,
    slot: &crossbeam_epoch::Atomic<Entry<K, V>>,
    first: Shared<'_, Entry<K, V>>,
    table: Shared<'_, Table<K, V>>,
    guard: &Guard,
) -> bool {
    // a rehash tags the slot before touching its chain and swaps the table
    // pointer afterwards, so comparing the raw slot word catches both a
    // replaced head and a migration in progress
    slot.load(Ordering::Acquire, guard) == first
        && segment.table.load(Ordering::Acquire, guard) == table
}

/// Decides whether a value operation on `entry` is visible in the live
/// chain: either nothing moved, or the chain was replaced in a way that
/// still shares `entry`. Returns `false` if the entry was cloned away or
/// removed, in which case the caller must redo its work against whatever
/// chain is live.
fn entry_survives<'g, K, V>(
    segment: &Segment<K, V>,
    hash: u32,
    table: Shared<'g, Table<K, V>>,
    first: Shared<'g, Entry<K, V>>,
    entry_ptr: Shared<'g, Entry<K, V>>,
    guard: &'g Guard,
) -> bool {
    loop {
        let table_now = segment.table_shared(guard);
        let head = unsafe { table_now.deref() }.slot(hash).load_consume(guard);

        if head.tag() != 0 {
            wait_for_next_table(segment, table_now, guard);
            continue;
        }

        if table_now == table && head == first {
            return true;
        }

        let mut cursor = head;

        while !cursor.is_null() {
            if cursor == entry_ptr {
                return true;
            }

            cursor = unsafe { cursor.deref() }.next_entry(guard);
        }

        return false;
    }
}

fn grow<K: Clone, V: Clone>(segment: &Segment<K, V>, guard: &Guard) {
    // at most one thread rehashes a segment; losers proceed into the old
    // table and their retry loops carry them over to the new one
    if let Ok(_lock) = segment.lock.try_lock() {
        if segment.count.load(Ordering::Acquire) + 1 > segment.threshold.load(Ordering::Relaxed) {
            segment.rehash(guard);
        }
    }
}

fn wait_for_next_table<K, V>(
    segment: &Segment<K, V>,
    current: Shared<'_, Table<K, V>>,
    guard: &Guard,
) {
    // the slot is frozen, so the doubled table is about to be published
    while segment.table.load(Ordering::Acquire, guard) == current {
        hint::spin_loop();
    }
}
