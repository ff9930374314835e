//! The size policy: a fixed ascending table of prime bucket counts, a binary
//! search resolving a requested capacity to a table entry, and a fast
//! hash-to-bucket mapping.
//!
//! `position` is exactly equivalent to reducing the (folded) hash modulo the
//! tabled size, but for every size representable in 32 bits it uses Lemire's
//! reciprocal multiplication instead of a division instruction:
//! <https://github.com/lemire/fastmod>. Sizes beyond 32 bits (available on
//! 64-bit targets only) are reduced with a plain modulo over literal
//! divisors, which the compiler strength-reduces per divisor.

/// Prime bucket counts representable in 32 bits.
///
/// Each entry roughly doubles the previous one so a growing table settles
/// into a geometric rehash schedule.
const SIZES_32: [u32; 30] = [
    13, 29, 53, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613, 393241,
    786433, 1572869, 3145739, 6291469, 12582917, 25165843, 50331653, 100663319, 201326611,
    402653189, 805306457, 1610612741, 3221225473, 4294967291,
];

/// `ceil(2^64 / d)` for each entry of [`SIZES_32`], the multiplier used by
/// the reciprocal fast-modulo path.
const INV_SIZES_32: [u64; 30] = [
    1418980313362273202,
    636094623231363849,
    348051774975651918,
    190172619316593316,
    95578984837873325,
    47420935922132524,
    23987963684927896,
    11955116055547344,
    5991147799191151,
    2998982941588287,
    1501077717772769,
    750081082979285,
    375261795343686,
    187625172388393,
    93822606204624,
    46909513691883,
    23456218233098,
    11728086747027,
    5864041509391,
    2932024948977,
    1466014921160,
    733007198436,
    366503839517,
    183251896093,
    91625960335,
    45812983922,
    22906489714,
    11453246088,
    5726623060,
    4294967302,
];

cfg_if::cfg_if! {
    if #[cfg(target_pointer_width = "64")] {
        /// Bucket counts past the 32-bit range, reduced by plain modulo.
        const SIZES_WIDE: [usize; 9] = [
            6442450939,
            12884901893,
            25769803751,
            51539607551,
            103079215111,
            206158430209,
            412316860441,
            824633720831,
            1649267441651,
        ];
    } else {
        const SIZES_WIDE: [usize; 0] = [];
    }
}

/// Total number of tabled bucket counts on this target.
pub const NUM_SIZES: usize = SIZES_32.len() + SIZES_WIDE.len();

/// Returns the index of the smallest tabled bucket count that is greater
/// than or equal to `n`.
///
/// Monotonic in `n`. Requests beyond the largest tabled value clamp to the
/// last index.
///
/// # Examples
///
/// ```rust
/// use grouped_buckets::size_policy;
///
/// let index = size_policy::size_index(10);
/// assert_eq!(size_policy::size(index), 13);
/// assert_eq!(size_policy::size_index(13), index);
/// assert_eq!(size_policy::size(size_policy::size_index(14)), 29);
/// ```
pub fn size_index(n: usize) -> usize {
    let last_32 = SIZES_32[SIZES_32.len() - 1] as usize;
    if n <= last_32 {
        SIZES_32.partition_point(|&s| (s as usize) < n)
    } else if SIZES_WIDE.is_empty() {
        SIZES_32.len() - 1
    } else {
        let wide = SIZES_WIDE.partition_point(|&s| s < n);
        SIZES_32.len() + wide.min(SIZES_WIDE.len() - 1)
    }
}

/// Returns the tabled bucket count at `size_index`.
///
/// # Panics
///
/// Panics if `size_index >= NUM_SIZES`.
pub fn size(size_index: usize) -> usize {
    if size_index < SIZES_32.len() {
        SIZES_32[size_index] as usize
    } else {
        SIZES_WIDE[size_index - SIZES_32.len()]
    }
}

/// Folds a 64-bit hash down to the 32 bits consumed by the reciprocal path.
///
/// Both halves participate so tables small enough for the fast path still
/// see the full hash.
#[inline(always)]
fn fold(hash: u64) -> u32 {
    (hash as u32).wrapping_add((hash >> 32) as u32)
}

#[inline(always)]
fn mul128_u32(lowbits: u64, d: u32) -> u64 {
    ((lowbits as u128 * d as u128) >> 64) as u64
}

#[inline(always)]
fn fast_modulo(a: u32, m: u64, d: u32) -> u32 {
    let lowbits = m.wrapping_mul(a as u64);
    mul128_u32(lowbits, d) as u32
}

#[cfg(target_pointer_width = "64")]
#[inline(always)]
fn position_wide(hash: u64, size_index: usize) -> usize {
    debug_assert!((SIZES_32.len()..NUM_SIZES).contains(&size_index));
    // Literal divisors so each arm compiles to a multiply-by-reciprocal
    // rather than a runtime division.
    match size_index {
        30 => (hash % 6442450939) as usize,
        31 => (hash % 12884901893) as usize,
        32 => (hash % 25769803751) as usize,
        33 => (hash % 51539607551) as usize,
        34 => (hash % 103079215111) as usize,
        35 => (hash % 206158430209) as usize,
        36 => (hash % 412316860441) as usize,
        37 => (hash % 824633720831) as usize,
        _ => (hash % 1649267441651) as usize,
    }
}

/// Maps `hash` to a bucket index in `[0, size(size_index))`.
///
/// For sizes representable in 32 bits the hash is folded to 32 bits and
/// reduced with reciprocal multiplication; the result equals
/// `folded_hash % size(size_index)` exactly. For the wider sizes the full
/// hash is reduced directly.
///
/// # Examples
///
/// ```rust
/// use grouped_buckets::size_policy;
///
/// let index = size_policy::size_index(100);
/// let bucket = size_policy::position(0xDEAD_BEEF_CAFE_F00D, index);
/// assert!(bucket < size_policy::size(index));
/// ```
#[inline(always)]
pub fn position(hash: u64, size_index: usize) -> usize {
    #[cfg(target_pointer_width = "64")]
    if size_index >= SIZES_32.len() {
        return position_wide(hash, size_index);
    }

    fast_modulo(fold(hash), INV_SIZES_32[size_index], SIZES_32[size_index]) as usize
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn size_index_picks_smallest_not_below() {
        assert_eq!(size(size_index(0)), 13);
        assert_eq!(size(size_index(1)), 13);
        assert_eq!(size(size_index(13)), 13);
        assert_eq!(size(size_index(14)), 29);
        assert_eq!(size(size_index(29)), 29);
        assert_eq!(size(size_index(30)), 53);

        for index in 0..NUM_SIZES {
            let s = size(index);
            assert_eq!(size_index(s), index);
            assert!(size(size_index(s - 1)) >= s - 1);
        }
    }

    #[test]
    fn size_index_is_monotonic() {
        let mut previous = 0;
        for n in (0..10_000_000).step_by(997) {
            let index = size_index(n);
            assert!(index >= previous);
            assert!(size(index) >= n);
            previous = index;
        }
    }

    #[test]
    fn size_index_clamps_past_the_table() {
        assert_eq!(size_index(usize::MAX), NUM_SIZES - 1);
    }

    #[test]
    fn sizes_are_strictly_ascending() {
        for index in 1..NUM_SIZES {
            assert!(size(index) > size(index - 1));
        }
    }

    #[test]
    fn fast_modulo_matches_plain_modulo() {
        let mut rng = SmallRng::seed_from_u64(0x5EED);

        for index in 0..SIZES_32.len() {
            let d = SIZES_32[index] as u64;
            let edges = [
                0u64,
                1,
                2,
                d - 1,
                d,
                d + 1,
                u32::MAX as u64,
                u64::MAX,
                u64::MAX - 1,
            ];
            for hash in edges.into_iter().chain((0..1000).map(|_| rng.random())) {
                let expected = (fold(hash) as u64 % d) as usize;
                assert_eq!(
                    position(hash, index),
                    expected,
                    "hash {hash:#X} size {d}",
                );
            }
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn wide_position_matches_plain_modulo() {
        let mut rng = SmallRng::seed_from_u64(0x71DE);

        for index in SIZES_32.len()..NUM_SIZES {
            let d = size(index) as u64;
            let edges = [0u64, 1, d - 1, d, d + 1, u64::MAX];
            for hash in edges.into_iter().chain((0..1000).map(|_| rng.random())) {
                assert_eq!(position(hash, index), (hash % d) as usize);
            }
        }
    }

    #[test]
    fn position_is_in_range() {
        let mut rng = SmallRng::seed_from_u64(42);
        for index in 0..NUM_SIZES {
            for _ in 0..100 {
                assert!(position(rng.random(), index) < size(index));
            }
        }
    }

    #[test]
    fn reciprocals_match_their_sizes() {
        for index in 0..SIZES_32.len() {
            let d = SIZES_32[index] as u128;
            assert_eq!(INV_SIZES_32[index] as u128, (1u128 << 64) / d + 1);
        }
    }
}
