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
    hash::{BuildHasher, Hash, Hasher},
    sync::{
        atomic::{AtomicIsize, Ordering},
        Arc,
    },
};

use crossbeam_epoch::Owned;

/// Wraps a value and keeps its parent's live-instance count current, so
/// tests can check that retired values are reclaimed and nothing is dropped
/// twice. The map clones values internally (chain surgery, returned
/// results), so individual drops are expected; the balance must come back to
/// zero once the map and every clone are gone.
#[derive(Debug)]
pub(crate) struct NoisyDropper<T> {
    parent: Arc<DropNotifier>,
    pub elem: T,
}

impl<T> NoisyDropper<T> {
    pub(crate) fn new(parent: Arc<DropNotifier>, elem: T) -> Self {
        parent.live.fetch_add(1, Ordering::Relaxed);

        Self { parent, elem }
    }
}

impl<T: Clone> Clone for NoisyDropper<T> {
    fn clone(&self) -> Self {
        self.parent.live.fetch_add(1, Ordering::Relaxed);

        Self {
            parent: self.parent.clone(),
            elem: self.elem.clone(),
        }
    }
}

impl<T> Drop for NoisyDropper<T> {
    fn drop(&mut self) {
        let previous = self.parent.live.fetch_sub(1, Ordering::Relaxed);
        assert!(previous > 0, "a value was dropped more times than created");
    }
}

impl<T: PartialEq> PartialEq for NoisyDropper<T> {
    fn eq(&self, other: &Self) -> bool {
        self.elem == other.elem
    }
}

impl<T: PartialEq> PartialEq<T> for NoisyDropper<T> {
    fn eq(&self, other: &T) -> bool {
        &self.elem == other
    }
}

impl<T: Eq> Eq for NoisyDropper<T> {}

impl<T: Hash> Hash for NoisyDropper<T> {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.elem.hash(hasher);
    }
}

#[derive(Debug)]
pub(crate) struct DropNotifier {
    live: AtomicIsize,
}

impl DropNotifier {
    pub(crate) fn new() -> Self {
        Self {
            live: AtomicIsize::new(0),
        }
    }

    pub(crate) fn live(&self) -> isize {
        self.live.load(Ordering::Relaxed)
    }
}

/// Churns the global epoch until pending deferred destructors have had a
/// chance to run.
pub(crate) fn run_deferred() {
    for _ in 0..65536 {
        let guard = crossbeam_epoch::pin();

        unsafe { guard.defer_destroy(Owned::new(0).into_shared(&guard)) };

        guard.flush();
    }
}

/// A build hasher whose hashers always emit the same code, forcing every key
/// into a single chain.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct CollidingHashBuilder;

impl BuildHasher for CollidingHashBuilder {
    type Hasher = CollidingHasher;

    fn build_hasher(&self) -> CollidingHasher {
        CollidingHasher
    }
}

#[derive(Debug)]
pub(crate) struct CollidingHasher;

impl Hasher for CollidingHasher {
    fn finish(&self) -> u64 {
        0
    }

    fn write(&mut self, _bytes: &[u8]) {}
}
