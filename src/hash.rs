//! Hashing primitives and hash tables (spec §4.3).
//!
//! [`mix`] is the two-argument avalanche mix every hash table in this
//! module builds on. [`mix64`] mixes a single 64-bit key by fixing `h = 0`.
//! [`mix64_batch4`] computes the same function over four keys at once so
//! the optimizer has a shot at auto-vectorizing it;
//! [`tests::batch_matches_scalar`] pins the two to the same output.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Fixed odd multiplier for [`mix`].
const S: u64 = 0x9e37_79b9_7f4a_7c15;

/// Two-argument 64-bit avalanche mix: combine an accumulator `h` with a key
/// `k`. Used directly by the composite-key group-by path (folding one
/// column's hash into the next) and via [`mix64`] (`h = 0`) everywhere a
/// single scalar key needs hashing.
#[inline]
pub fn mix(h: u64, k: u64) -> u64 {
    let mut a = (h ^ k).wrapping_mul(S);
    a ^= a >> 47;
    let mut b = (k.rotate_left(31) ^ a).wrapping_mul(S);
    b ^= b >> 47;
    b = b.wrapping_mul(S);
    b
}

/// Avalanche-mix a single 64-bit key.
#[inline]
pub fn mix64(x: u64) -> u64 {
    mix(0, x)
}

/// Mix four keys at once. Kept data-parallel (no early exit, no branches
/// that differ across lanes) purely so the four independent dependency
/// chains can overlap; functionally identical to four calls to [`mix64`].
#[inline]
pub fn mix64_batch4(xs: [u64; 4]) -> [u64; 4] {
    let mut a = [0u64; 4];
    for i in 0..4 {
        a[i] = xs[i].wrapping_mul(S);
    }
    for i in 0..4 {
        a[i] ^= a[i] >> 47;
    }
    let mut b = [0u64; 4];
    for i in 0..4 {
        b[i] = (xs[i].rotate_left(31) ^ a[i]).wrapping_mul(S);
    }
    for i in 0..4 {
        b[i] ^= b[i] >> 47;
    }
    for i in 0..4 {
        b[i] = b[i].wrapping_mul(S);
    }
    b
}

/// Hash an arbitrary byte slice down to 64 bits, then run it through
/// [`mix64`] so short and long keys land in the same quality hash space.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    mix64(hasher.finish())
}

/// A cell in the fused hash-aggregate table (spec §4.5): a 16-bit salt to
/// cheaply reject probe mismatches before touching the group's full key,
/// and a 32-bit group id indexing into the aggregate's accumulator arrays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SaltedCell {
    pub salt: u16,
    pub group_id: u32,
}

impl SaltedCell {
    pub const EMPTY: SaltedCell = SaltedCell { salt: 0, group_id: u32::MAX };

    pub fn is_empty(&self) -> bool {
        self.group_id == u32::MAX
    }
}

fn salt_of(hash: u64) -> u16 {
    (hash >> 48) as u16
}

/// Open-addressing table mapping an i64/symbol key to a group id, probing
/// linearly and rejecting most mismatches via the 16-bit salt before
/// comparing full keys (spec §4.3/§4.5 composite-hash-table aggregate
/// path).
pub struct SaltedHashTable {
    cells: Vec<SaltedCell>,
    keys: Vec<i64>,
    mask: usize,
    len: usize,
}

impl SaltedHashTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(16);
        SaltedHashTable {
            cells: vec![SaltedCell::EMPTY; capacity],
            keys: vec![0; capacity],
            mask: capacity - 1,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn load_factor_ok(&self) -> bool {
        self.len * 4 < self.cells.len() * 3
    }

    /// Look up `key`'s group id, assigning the next sequential id (via
    /// `next_id`) the first time it's seen.
    pub fn get_or_insert(&mut self, key: i64, next_id: &mut u32) -> u32 {
        if !self.load_factor_ok() {
            self.grow();
        }
        let hash = mix64(key as u64);
        let salt = salt_of(hash);
        let mut idx = hash as usize & self.mask;
        loop {
            let cell = self.cells[idx];
            if cell.is_empty() {
                let id = *next_id;
                *next_id += 1;
                self.cells[idx] = SaltedCell { salt, group_id: id };
                self.keys[idx] = key;
                self.len += 1;
                return id;
            }
            if cell.salt == salt && self.keys[idx] == key {
                return cell.group_id;
            }
            idx = (idx + 1) & self.mask;
        }
    }

    pub fn get(&self, key: i64) -> Option<u32> {
        let hash = mix64(key as u64);
        let salt = salt_of(hash);
        let mut idx = hash as usize & self.mask;
        loop {
            let cell = self.cells[idx];
            if cell.is_empty() {
                return None;
            }
            if cell.salt == salt && self.keys[idx] == key {
                return Some(cell.group_id);
            }
            idx = (idx + 1) & self.mask;
        }
    }

    fn grow(&mut self) {
        let new_capacity = self.cells.len() * 2;
        let mut grown = SaltedHashTable {
            cells: vec![SaltedCell::EMPTY; new_capacity],
            keys: vec![0; new_capacity],
            mask: new_capacity - 1,
            len: 0,
        };
        for (cell, &key) in self.cells.iter().zip(self.keys.iter()) {
            if !cell.is_empty() {
                let hash = mix64(key as u64);
                let mut idx = hash as usize & grown.mask;
                while !grown.cells[idx].is_empty() {
                    idx = (idx + 1) & grown.mask;
                }
                grown.cells[idx] = *cell;
                grown.keys[idx] = key;
                grown.len += 1;
            }
        }
        *self = grown;
    }
}

/// Open-addressing table for a composite (K>1 column) group-by key (spec
/// §4.5.1's "hardest part"). Unlike [`SaltedHashTable`], which stores the
/// scalar key inline, this table stores only the row index that first
/// inserted each group -- the "representative row" -- and leaves full
/// key-column comparison to a caller-supplied `eq` closure, since the
/// table itself has no access to the group-by's key columns.
pub struct CompositeSaltedHashTable {
    cells: Vec<SaltedCell>,
    hashes: Vec<u64>,
    representative_row: Vec<usize>,
    mask: usize,
    len: usize,
}

impl CompositeSaltedHashTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two().max(16);
        CompositeSaltedHashTable {
            cells: vec![SaltedCell::EMPTY; capacity],
            hashes: vec![0; capacity],
            representative_row: vec![0; capacity],
            mask: capacity - 1,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn load_factor_ok(&self) -> bool {
        self.len * 4 < self.cells.len() * 3
    }

    /// `hash` is the row's composite key hash (the key columns folded
    /// through [`mix`]); `row` is its index. `eq(a, b)` compares two row
    /// indices for full key-column equality and is only called once the
    /// salt has already matched.
    pub fn get_or_insert(&mut self, hash: u64, row: usize, next_id: &mut u32, eq: impl Fn(usize, usize) -> bool) -> u32 {
        if !self.load_factor_ok() {
            self.grow();
        }
        let salt = salt_of(hash);
        let mut idx = hash as usize & self.mask;
        loop {
            let cell = self.cells[idx];
            if cell.is_empty() {
                let id = *next_id;
                *next_id += 1;
                self.cells[idx] = SaltedCell { salt, group_id: id };
                self.hashes[idx] = hash;
                self.representative_row[idx] = row;
                self.len += 1;
                return id;
            }
            if cell.salt == salt && eq(self.representative_row[idx], row) {
                return cell.group_id;
            }
            idx = (idx + 1) & self.mask;
        }
    }

    fn grow(&mut self) {
        let new_capacity = self.cells.len() * 2;
        let mut grown = CompositeSaltedHashTable {
            cells: vec![SaltedCell::EMPTY; new_capacity],
            hashes: vec![0; new_capacity],
            representative_row: vec![0; new_capacity],
            mask: new_capacity - 1,
            len: 0,
        };
        for i in 0..self.cells.len() {
            let cell = self.cells[i];
            if !cell.is_empty() {
                let hash = self.hashes[i];
                let mut idx = hash as usize & grown.mask;
                while !grown.cells[idx].is_empty() {
                    idx = (idx + 1) & grown.mask;
                }
                grown.cells[idx] = cell;
                grown.hashes[idx] = hash;
                grown.representative_row[idx] = self.representative_row[i];
                grown.len += 1;
            }
        }
        *self = grown;
    }
}

/// A perfect-hash table for the common aggregate case: a single dense `i64`
/// key (or interned symbol id) whose range fits comfortably in memory, so
/// the key itself can be the slot index (spec §4.5 "perfect-hash path").
pub struct PerfectHashTable {
    base: i64,
    slots: Vec<Option<u32>>,
}

impl PerfectHashTable {
    /// `base..base+len` must cover every key that will be looked up.
    pub fn new(base: i64, len: usize) -> Self {
        PerfectHashTable { base, slots: vec![None; len] }
    }

    /// Largest `span` (`max - min + 1`) this strategy is worth using over
    /// [`SaltedHashTable`] for `n` distinct keys -- beyond this the slot
    /// array would waste more memory than a salted table of the same
    /// cardinality.
    pub fn is_worthwhile(min: i64, max: i64, distinct_estimate: usize) -> bool {
        let span = (max - min + 1).max(1) as u128;
        span <= (distinct_estimate as u128).saturating_mul(4).max(1024)
    }

    pub fn get_or_insert(&mut self, key: i64, next_id: &mut u32) -> u32 {
        let idx = (key - self.base) as usize;
        match self.slots[idx] {
            Some(id) => id,
            None => {
                let id = *next_id;
                *next_id += 1;
                self.slots[idx] = Some(id);
                id
            }
        }
    }

    pub fn get(&self, key: i64) -> Option<u32> {
        let idx = (key - self.base) as usize;
        self.slots.get(idx).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_matches_scalar() {
        let xs = [1u64, 2, 1234567, u64::MAX];
        let batch = mix64_batch4(xs);
        for (i, &x) in xs.iter().enumerate() {
            assert_eq!(batch[i], mix64(x));
        }
    }

    #[test]
    fn mix64_is_not_identity_and_differs_per_input() {
        assert_ne!(mix64(0), 0);
        assert_ne!(mix64(1), mix64(2));
    }

    #[test]
    fn mix_matches_documented_formula() {
        fn reference(h: u64, k: u64) -> u64 {
            let mut a = (h ^ k).wrapping_mul(S);
            a ^= a >> 47;
            let mut b = (k.rotate_left(31) ^ a).wrapping_mul(S);
            b ^= b >> 47;
            b.wrapping_mul(S)
        }
        assert_eq!(mix(0, 42), reference(0, 42));
        assert_eq!(mix(7, 99), reference(7, 99));
        assert_eq!(mix64(42), mix(0, 42));
    }

    #[test]
    fn composite_table_distinguishes_by_full_key_not_salt_alone() {
        let keys = [(1i64, 2i64), (1, 3), (2, 2)];
        let hash_of = |row: usize| mix(keys[row].0 as u64, keys[row].1 as u64);
        let eq = |a: usize, b: usize| keys[a] == keys[b];

        let mut t = CompositeSaltedHashTable::with_capacity(16);
        let mut next = 0u32;
        let a = t.get_or_insert(hash_of(0), 0, &mut next, eq);
        let b = t.get_or_insert(hash_of(1), 1, &mut next, eq);
        let c = t.get_or_insert(hash_of(2), 2, &mut next, eq);
        let a_again = t.get_or_insert(hash_of(0), 0, &mut next, eq);
        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn composite_table_grows_past_initial_capacity() {
        let keys: Vec<(i64, i64)> = (0..500).map(|i| (i, i * 2)).collect();
        let hash_of = |row: usize| mix(keys[row].0 as u64, keys[row].1 as u64);
        let eq = |a: usize, b: usize| keys[a] == keys[b];

        let mut t = CompositeSaltedHashTable::with_capacity(4);
        let mut next = 0u32;
        let mut ids = Vec::new();
        for row in 0..keys.len() {
            ids.push(t.get_or_insert(hash_of(row), row, &mut next, eq));
        }
        assert_eq!(ids.len(), keys.len());
        assert_eq!(t.get_or_insert(hash_of(0), 0, &mut next, eq), ids[0]);
    }

    #[test]
    fn salted_table_assigns_stable_ids() {
        let mut t = SaltedHashTable::with_capacity(16);
        let mut next = 0u32;
        let a = t.get_or_insert(42, &mut next);
        let b = t.get_or_insert(42, &mut next);
        let c = t.get_or_insert(7, &mut next);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(t.get(42), Some(a));
    }

    #[test]
    fn salted_table_grows_past_initial_capacity() {
        let mut t = SaltedHashTable::with_capacity(4);
        let mut next = 0u32;
        for k in 0..500 {
            t.get_or_insert(k, &mut next);
        }
        for k in 0..500 {
            assert_eq!(t.get(k), Some(k as u32));
        }
    }

    #[test]
    fn perfect_hash_table_handles_dense_range() {
        let mut t = PerfectHashTable::new(100, 10);
        let mut next = 0u32;
        let a = t.get_or_insert(105, &mut next);
        let b = t.get_or_insert(105, &mut next);
        assert_eq!(a, b);
        assert_eq!(t.get(105), Some(a));
        assert_eq!(t.get(109), None);
    }

    #[test]
    fn perfect_hash_worthwhile_heuristic() {
        assert!(PerfectHashTable::is_worthwhile(0, 1000, 900));
        assert!(!PerfectHashTable::is_worthwhile(0, 1_000_000_000, 10));
    }
}
