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

pub(crate) mod entry;
pub(crate) mod iter;
pub(crate) mod segment;
pub(crate) mod table;

use std::hash::{BuildHasher, Hash, Hasher};

/// The maximum number of buckets a single segment may hold.
///
/// Bucket arrays only ever double in size, so this must be a power of two.
/// Segments that reach this capacity stop growing; their chains simply
/// lengthen instead.
pub const MAXIMUM_CAPACITY: usize = 1 << 30;

/// The maximum number of segments a map may be divided into.
///
/// Requested concurrency levels above this bound are clamped.
pub const MAX_SEGMENTS: usize = 1 << 16;

pub(crate) const DEFAULT_INITIAL_CAPACITY: usize = 64;
pub(crate) const DEFAULT_LOAD_FACTOR: f32 = 0.75;
pub(crate) const DEFAULT_CONCURRENCY_LEVEL: usize = 16;

/// Hashes `key` and spreads the result across all 32 bits.
pub(crate) fn hash<Q: Hash + ?Sized, S: BuildHasher>(build_hasher: &S, key: &Q) -> u32 {
    let mut hasher = build_hasher.build_hasher();
    key.hash(&mut hasher);

    mix(hasher.finish() as u32)
}

/// Applies a supplemental bit-spreading transform to a raw hash code.
///
/// Segment selection uses the uppermost bits of a hash while bucket selection
/// uses the lowermost, so hash codes that differ only in a narrow band of bits
/// would otherwise collapse onto a handful of chains. This is the single-word
/// Wang/Jenkins shift-and-add mix.
pub(crate) fn mix(mut h: u32) -> u32 {
    h = h.wrapping_add((h << 15) ^ 0xffff_cbbb);
    h ^= h >> 10;
    h = h.wrapping_add(h << 3);
    h ^= h >> 6;
    h = h.wrapping_add((h << 2).wrapping_add(h << 14));

    h ^ (h >> 16)
}

/// Returns the segment count and shift for a requested concurrency level.
///
/// The count is the smallest power of two that can serve `concurrency_level`
/// concurrent writers, at most [`MAX_SEGMENTS`]. The shift isolates the high
/// bits of a mixed hash so that segment indexing and bucket indexing draw
/// from non-overlapping bit ranges.
pub(crate) fn segment_count_and_shift(concurrency_level: usize) -> (usize, u32) {
    assert!(concurrency_level > 0);

    let count = concurrency_level.min(MAX_SEGMENTS).next_power_of_two();
    let shift = 32 - count.trailing_zeros();

    (count, shift)
}

/// Returns the initial bucket count for each of `segment_count` segments
/// asked to hold `initial_capacity` entries in total.
pub(crate) fn per_segment_capacity(initial_capacity: usize, segment_count: usize) -> usize {
    let initial_capacity = initial_capacity.min(MAXIMUM_CAPACITY);

    ((initial_capacity + segment_count - 1) / segment_count).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_is_deterministic() {
        for h in [0u32, 1, 0xdead_beef, u32::max_value()].iter().cloned() {
            assert_eq!(mix(h), mix(h));
        }
    }

    #[test]
    fn segment_sizing() {
        assert_eq!(segment_count_and_shift(1), (1, 32));
        assert_eq!(segment_count_and_shift(16), (16, 28));
        assert_eq!(segment_count_and_shift(17), (32, 27));
        assert_eq!(
            segment_count_and_shift(MAX_SEGMENTS + 1),
            (MAX_SEGMENTS, 16)
        );
    }

    #[test]
    fn per_segment_sizing() {
        assert_eq!(per_segment_capacity(0, 16), 1);
        assert_eq!(per_segment_capacity(64, 16), 4);
        assert_eq!(per_segment_capacity(65, 16), 8);
        assert_eq!(per_segment_capacity(MAXIMUM_CAPACITY, 1), MAXIMUM_CAPACITY);
        assert_eq!(
            per_segment_capacity(MAXIMUM_CAPACITY + 1, 1),
            MAXIMUM_CAPACITY
        );
    }
}
