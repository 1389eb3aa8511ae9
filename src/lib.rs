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

//! Segmented concurrent hash maps with lock-free readers.
//!
//! A map is split into a fixed set of segments, each a self-contained hash
//! table of bucket chains. The top bits of a key's spread hash pick its
//! segment, the bottom bits its bucket, so segment routing and bucket
//! indexing never compete for the same bits. Reads — `get`, `contains_key`,
//! and iteration — acquire no lock in any variant: chain nodes are immutable
//! apart from their atomically swappable value pointer, and all structural
//! changes are published by replacing bucket heads, never by rewriting a
//! reachable node's links. Retired nodes and tables are reclaimed through
//! [`crossbeam-epoch`] once no reader can hold them.
//!
//! Two variants share this core and differ only in how writers synchronize:
//!
//! - [`HashMap`] (also [`map::HashMap`]) — writers publish with
//!   compare-and-swap on bucket heads and retry on contention.
//! - [`striped::HashMap`] — writers take a per-segment mutex.
//!
//! Writers to different segments never contend in either variant. Pick
//! striping when many writers hammer the same keys (a lock queues fairly
//! where a CAS loop spins); pick the default when write contention is rare.
//!
//! [`crossbeam-epoch`]: https://docs.rs/crossbeam-epoch
//! [`HashMap`]: map/struct.HashMap.html
//! [`map::HashMap`]: map/struct.HashMap.html
//! [`striped::HashMap`]: striped/struct.HashMap.html

pub(crate) mod common;
pub mod map;
pub mod striped;

pub use common::{MAXIMUM_CAPACITY, MAX_SEGMENTS};
pub use map::HashMap;

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc, Barrier,
        },
        thread::{self, JoinHandle},
    };

    #[test]
    fn writes_become_visible_to_readers() {
        const MAX_VALUE: usize = 10_000;

        let map = Arc::new(HashMap::with_capacity(0));
        let published = Arc::new(AtomicUsize::new(0));

        let writer = {
            let map = map.clone();
            let published = published.clone();

            thread::spawn(move || {
                for i in 0..MAX_VALUE {
                    assert_eq!(map.insert(i, i * 2), None);
                    published.store(i + 1, Ordering::Release);
                }
            })
        };

        let reader = {
            let map = map.clone();
            let published = published.clone();

            thread::spawn(move || loop {
                let n = published.load(Ordering::Acquire);

                if n > 0 {
                    // every completed insertion must already be observable
                    let probe = n - 1;
                    assert_eq!(map.get(&probe), Some(probe * 2));
                }

                if n == MAX_VALUE {
                    break;
                }
            })
        };

        assert!(writer.join().is_ok());
        assert!(reader.join().is_ok());

        assert_eq!(map.len(), MAX_VALUE);
    }

    #[test]
    fn iteration_during_growth() {
        const MAX_VALUE: usize = 1_000;

        // a single segment growing from one bucket maximizes rehashes
        let map = Arc::new(HashMap::with_capacity_load_factor_and_concurrency_level(
            0, 0.75, 1,
        ));
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let map = map.clone();
            let done = done.clone();

            thread::spawn(move || {
                for i in 0..MAX_VALUE {
                    assert_eq!(map.insert(i, i), None);
                }

                done.store(true, Ordering::Release);
            })
        };

        let iterator = {
            let map = map.clone();
            let done = done.clone();

            thread::spawn(move || loop {
                let finished = done.load(Ordering::Acquire);

                for (k, v) in map.iter() {
                    assert_eq!(k, v);
                }

                if finished {
                    break;
                }
            })
        };

        assert!(writer.join().is_ok());
        assert!(iterator.join().is_ok());

        // in quiescence a fresh traversal sees every entry exactly once
        let mut seen: Vec<usize> = map.iter().map(|(k, _)| k).collect();
        seen.sort();
        let expected: Vec<usize> = (0..MAX_VALUE).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn disjoint_segment_writers() {
        const MAX_VALUE: usize = 4_096;
        const NUM_THREADS: usize = 8;

        let map = Arc::new(HashMap::with_capacity(NUM_THREADS * MAX_VALUE));
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|i| {
                let map = map.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();

                    // per-thread key ranges spread across all segments, so
                    // each thread stays mostly in segments of its own
                    for j in 0..MAX_VALUE {
                        let key = i * MAX_VALUE + j;
                        assert_eq!(map.insert(key, key), None);
                    }
                })
            })
            .collect();

        for result in threads.into_iter().map(JoinHandle::join) {
            assert!(result.is_ok());
        }

        assert_eq!(map.len(), NUM_THREADS * MAX_VALUE);
    }

    #[test]
    fn compare_and_replace_has_one_winner_per_round() {
        const ROUNDS: usize = 1_000;
        const NUM_THREADS: usize = 2;

        let map = Arc::new(HashMap::new());
        map.insert("counter", 0usize);

        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let map = map.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    let mut wins = 0;

                    for round in 0..ROUNDS {
                        barrier.wait();

                        if map.compare_and_replace("counter", &round, round + 1) {
                            wins += 1;
                        }

                        barrier.wait();
                    }

                    wins
                })
            })
            .collect();

        let total_wins: usize = threads
            .into_iter()
            .map(|t| t.join().expect("thread panicked"))
            .sum();

        // exactly one contender wins each logical increment
        assert_eq!(total_wins, ROUNDS);
        assert_eq!(map.get("counter"), Some(ROUNDS));
    }

    #[test]
    fn conditional_removal_linearizes_with_insertion() {
        const ROUNDS: usize = 1_000;

        for _ in 0..ROUNDS {
            let map = Arc::new(HashMap::new());
            map.insert("k", 1);

            let barrier = Arc::new(Barrier::new(2));

            let writer = {
                let map = map.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();

                    map.insert("k", 2)
                })
            };

            let remover = {
                let map = map.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();

                    map.remove_entry("k", &1)
                })
            };

            let previous = writer.join().expect("writer panicked");
            let removed = remover.join().expect("remover panicked");

            // a successful removal means the value was still 1 when the entry
            // was unlinked, so the insertion must have run afterwards and
            // found nothing; and the removal may never take out the 2
            if removed {
                assert_eq!(previous, None);
            }
            assert_eq!(map.get("k"), Some(2));
        }
    }

    #[test]
    fn clearing_under_concurrent_insertion() {
        const MAX_VALUE: usize = 4_096;

        let map = Arc::new(HashMap::with_capacity(0));

        let writer = {
            let map = map.clone();

            thread::spawn(move || {
                for i in 0..MAX_VALUE {
                    map.insert(i, i);
                }
            })
        };

        let clearer = {
            let map = map.clone();

            thread::spawn(move || {
                for _ in 0..16 {
                    map.clear();
                }
            })
        };

        assert!(writer.join().is_ok());
        assert!(clearer.join().is_ok());

        // whatever survived must be intact
        for (k, v) in map.iter() {
            assert_eq!(k, v);
        }
    }

    #[test]
    fn striped_variant_matches_default_variant() {
        const MAX_VALUE: i32 = 512;

        let cas = HashMap::with_capacity(0);
        let locked = striped::HashMap::with_capacity(0);

        for i in 0..MAX_VALUE {
            assert_eq!(cas.insert(i, i), locked.insert(i, i));
        }

        for i in (0..MAX_VALUE).step_by(3) {
            assert_eq!(cas.remove(&i), locked.remove(&i));
        }

        for i in (0..MAX_VALUE).step_by(7) {
            assert_eq!(cas.replace(&i, -i), locked.replace(&i, -i));
        }

        assert_eq!(cas.len(), locked.len());

        for i in 0..MAX_VALUE {
            assert_eq!(cas.get(&i), locked.get(&i));
        }
    }
}
