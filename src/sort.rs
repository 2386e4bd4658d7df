//! Type-specialized parallel sort (spec §4.4).
//!
//! [`plan_for`] picks a strategy by element type, element count, and worker
//! count; [`SortPlan`] names that decision so tests and `tracing` spans can
//! see which path a call took without re-deriving the heuristic. Every path
//! is stable, and every path sorts ascending on the transformed key -- the
//! per-type bias functions below remap signed integers and floats onto an
//! unsigned space where ordinary unsigned comparison gives the correct
//! total order, which radix sort's counting passes need.

use std::sync::Arc;

use crate::error::Result;
use crate::heap::Heap;
use crate::pool::Pool;
use crate::value::Value;

/// Below this length, the fixed overhead of radix's counting passes loses
/// to a plain stable comparison sort.
const RADIX_THRESHOLD: usize = 512;
/// Above this length with more than one worker available, split into
/// per-worker runs and merge, rather than radix-sorting serially.
const PARALLEL_THRESHOLD: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortPlan {
    /// `U8`'s 256-value domain always sorts by direct counting.
    CountingU8,
    RadixI16,
    RadixI32,
    RadixI64,
    RadixF64,
    /// Parallel merge of per-worker radix-sorted runs.
    ParallelRadix,
    /// Plain stable comparison sort (small inputs, or types without a radix
    /// path -- `GUID`, `SYMBOL` ids sorted by interned id, booleans).
    Comparison,
}

/// Choose a strategy for sorting `len` elements of vector type `tag`
/// (`crate::value::T_*`) across `workers` executors.
pub fn plan_for(tag: i8, len: usize, workers: usize) -> SortPlan {
    use crate::value::{T_F64, T_I16, T_I32, T_I64, T_U8};
    let radix = match tag.abs() {
        T_U8 => return if len > 1 { SortPlan::CountingU8 } else { SortPlan::Comparison },
        T_I16 => SortPlan::RadixI16,
        T_I32 => SortPlan::RadixI32,
        T_I64 => SortPlan::RadixI64,
        T_F64 => SortPlan::RadixF64,
        _ => return SortPlan::Comparison,
    };
    if len < RADIX_THRESHOLD {
        return SortPlan::Comparison;
    }
    if workers > 1 && len >= PARALLEL_THRESHOLD {
        SortPlan::ParallelRadix
    } else {
        radix
    }
}

// ---- bias transforms: map onto an unsigned space preserving order ----

#[inline]
fn bias_i16(v: i16) -> u16 {
    (v as u16) ^ 0x8000
}
#[inline]
fn bias_i32(v: i32) -> u32 {
    (v as u32) ^ 0x8000_0000
}
#[inline]
fn bias_i64(v: i64) -> u64 {
    (v as u64) ^ 0x8000_0000_0000_0000
}
#[inline]
fn bias_f64(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & (1 << 63) != 0 { !bits } else { bits | (1 << 63) }
}

/// LSD radix sort over an 8-bit digit at a time, stable at each pass, which
/// composes into a globally stable sort (spec §4.4 "stability").
fn radix_sort_by_key<T: Copy, K: Copy + Into<u64>>(items: &mut [T], key: impl Fn(T) -> K, key_bytes: usize) {
    if items.len() < 2 {
        return;
    }
    let mut src = items.to_vec();
    let mut dst = vec![src[0]; items.len()];
    for pass in 0..key_bytes {
        let shift = pass * 8;
        let mut counts = [0usize; 256];
        for &item in src.iter() {
            let byte = ((key(item).into() >> shift) & 0xFF) as usize;
            counts[byte] += 1;
        }
        let mut offsets = [0usize; 256];
        let mut acc = 0usize;
        for (i, &c) in counts.iter().enumerate() {
            offsets[i] = acc;
            acc += c;
        }
        for &item in src.iter() {
            let byte = ((key(item).into() >> shift) & 0xFF) as usize;
            dst[offsets[byte]] = item;
            offsets[byte] += 1;
        }
        std::mem::swap(&mut src, &mut dst);
    }
    items.copy_from_slice(&src);
}

fn maybe_reverse<T>(items: &mut [T], descending: bool) {
    if descending {
        items.reverse();
    }
}

/// A stable argsort: the canonical index-producing primitive (spec §4.4,
/// "produce an index vector `p` such that `vec[p[i]]` is ordered"). Every
/// `asc_index_*`/`desc_index_*` below is a thin `key` specialization of
/// this. [`sort_u8`] is expressed directly in terms of it, since its
/// counting pass already hands back a stable permutation for free; the
/// radix paths in [`sort_i16`]/[`sort_i32`]/[`sort_i64`]/[`sort_f64`] stay
/// value-sorts for their own performance instead of deriving an index and
/// gathering through it, since the scatter pass already places values in
/// final position in one step.
fn argsort_by_key<T: Copy, K: Ord>(items: &[T], key: impl Fn(&T) -> K) -> Vec<u64> {
    let mut idx: Vec<u64> = (0..items.len() as u64).collect();
    idx.sort_by_key(|&i| key(&items[i as usize]));
    idx
}

pub fn asc_index_u8(items: &[u8]) -> Vec<u64> {
    argsort_by_key(items, |&v| v)
}
pub fn desc_index_u8(items: &[u8]) -> Vec<u64> {
    argsort_by_key(items, |&v| std::cmp::Reverse(v))
}
pub fn asc_index_i16(items: &[i16]) -> Vec<u64> {
    argsort_by_key(items, |&v| v)
}
pub fn desc_index_i16(items: &[i16]) -> Vec<u64> {
    argsort_by_key(items, |&v| std::cmp::Reverse(v))
}
pub fn asc_index_i32(items: &[i32]) -> Vec<u64> {
    argsort_by_key(items, |&v| v)
}
pub fn desc_index_i32(items: &[i32]) -> Vec<u64> {
    argsort_by_key(items, |&v| std::cmp::Reverse(v))
}
pub fn asc_index_i64(items: &[i64]) -> Vec<u64> {
    argsort_by_key(items, |&v| v)
}
pub fn desc_index_i64(items: &[i64]) -> Vec<u64> {
    argsort_by_key(items, |&v| std::cmp::Reverse(v))
}
pub fn asc_index_symbol(items: &[u32]) -> Vec<u64> {
    argsort_by_key(items, |&v| v)
}
pub fn desc_index_symbol(items: &[u32]) -> Vec<u64> {
    argsort_by_key(items, |&v| std::cmp::Reverse(v))
}

pub fn asc_index_f64(items: &[f64]) -> Vec<u64> {
    let mut idx: Vec<u64> = (0..items.len() as u64).collect();
    idx.sort_by(|&a, &b| items[a as usize].total_cmp(&items[b as usize]));
    idx
}
pub fn desc_index_f64(items: &[f64]) -> Vec<u64> {
    let mut idx: Vec<u64> = (0..items.len() as u64).collect();
    idx.sort_by(|&a, &b| items[b as usize].total_cmp(&items[a as usize]));
    idx
}

/// Reorder every column of `table` by permutation `p` (the output of an
/// `asc_index_*`/`desc_index_*` call above), so that a multi-column table
/// can be sorted consistently by one key column (spec §4.4: the reason the
/// sort module hands back an index rather than sorting values in place).
pub fn reorder_table(heap: &Arc<Heap>, table: &Value, p: &[u64]) -> Result<Value> {
    let ids: Vec<i64> = p.iter().map(|&i| i as i64).collect();
    let indices = Value::vector_i64(heap, &ids)?;
    crate::filter::materialize_filter(heap, table, &indices)
}

pub fn sort_u8(items: &mut [u8], descending: bool) {
    let idx = if descending { desc_index_u8(items) } else { asc_index_u8(items) };
    let sorted: Vec<u8> = idx.iter().map(|&i| items[i as usize]).collect();
    items.copy_from_slice(&sorted);
}

pub fn sort_i16(items: &mut [i16], descending: bool) {
    if items.len() < RADIX_THRESHOLD {
        items.sort_by_key(|&v| v);
    } else {
        radix_sort_by_key(items, |v| bias_i16(v), 2);
    }
    maybe_reverse(items, descending);
}

pub fn sort_i32(items: &mut [i32], descending: bool) {
    if items.len() < RADIX_THRESHOLD {
        items.sort_by_key(|&v| v);
    } else {
        radix_sort_by_key(items, |v| bias_i32(v) as u64, 4);
    }
    maybe_reverse(items, descending);
}

pub fn sort_i64(items: &mut [i64], descending: bool) {
    if items.len() < RADIX_THRESHOLD {
        items.sort_by_key(|&v| v);
    } else {
        radix_sort_by_key(items, bias_i64, 8);
    }
    maybe_reverse(items, descending);
}

pub fn sort_f64(items: &mut [f64], descending: bool) {
    if items.len() < RADIX_THRESHOLD {
        items.sort_by(|a, b| a.total_cmp(b));
    } else {
        radix_sort_by_key(items, bias_f64, 8);
    }
    maybe_reverse(items, descending);
}

/// Parallel sort: split into `pool.size()` contiguous runs, sort each run on
/// its own executor, then k-way merge (spec §4.4 worker-count-aware
/// dispatch). `sort_run` must itself be a stable, ascending sort of its
/// slice.
pub fn parallel_sort_runs<T: Copy + Send + Sync>(items: &mut [T], pool: &Pool, sort_run: impl Fn(&mut [T]) + Send + Sync + 'static, le: impl Fn(&T, &T) -> bool) {
    let len = items.len();
    if len < PARALLEL_THRESHOLD || pool.size() <= 1 {
        sort_run(items);
        return;
    }
    let ranges = crate::pool::split_by(len, pool.size());
    let ptr = items.as_mut_ptr() as usize;
    let sort_run = std::sync::Arc::new(sort_run);
    for range in &ranges {
        let sort_run = sort_run.clone();
        let (start, end) = (range.start, range.end);
        pool.add_task(move || {
            // SAFETY: ranges are disjoint and cover 0..len exactly, so each
            // task has exclusive access to its own sub-slice.
            let slice = unsafe { std::slice::from_raw_parts_mut((ptr as *mut T).add(start), end - start) };
            sort_run(slice);
        });
    }
    pool.run();
    let runs: Vec<&[T]> = ranges.iter().map(|r| &items[r.clone()]).collect();
    let merged = k_way_merge(&runs, &le);
    items.copy_from_slice(&merged);
}

fn k_way_merge<T: Copy>(runs: &[&[T]], le: &impl Fn(&T, &T) -> bool) -> Vec<T> {
    let total: usize = runs.iter().map(|r| r.len()).sum();
    let mut out = Vec::with_capacity(total);
    let mut cursors = vec![0usize; runs.len()];
    loop {
        let mut best: Option<usize> = None;
        for (i, run) in runs.iter().enumerate() {
            if cursors[i] >= run.len() {
                continue;
            }
            match best {
                None => best = Some(i),
                Some(b) if le(&run[cursors[i]], &runs[b][cursors[b]]) => best = Some(i),
                _ => {}
            }
        }
        match best {
            Some(i) => {
                out.push(runs[i][cursors[i]]);
                cursors[i] += 1;
            }
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_u8_is_correct() {
        let mut data = vec![5u8, 1, 255, 0, 5, 3];
        sort_u8(&mut data, false);
        assert_eq!(data, vec![0, 1, 3, 5, 5, 255]);
    }

    #[test]
    fn sort_i64_handles_negatives_and_large_inputs() {
        let mut data: Vec<i64> = (0..2000).map(|i| (i * 7919) % 4001 - 2000).collect();
        sort_i64(&mut data, false);
        assert!(data.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn sort_i64_descending() {
        let mut data = vec![3i64, 1, 2];
        sort_i64(&mut data, true);
        assert_eq!(data, vec![3, 2, 1]);
    }

    #[test]
    fn asc_index_i64_is_a_stable_ascending_permutation() {
        let data = vec![3i64, 1, 1, 2];
        let p = asc_index_i64(&data);
        let ordered: Vec<i64> = p.iter().map(|&i| data[i as usize]).collect();
        assert_eq!(ordered, vec![1, 1, 2, 3]);
        // stable: the two equal 1s (original positions 1, 2) keep their order.
        assert_eq!((p[0], p[1]), (1, 2));
    }

    #[test]
    fn desc_index_i64_reverses_order_stably() {
        let data = vec![3i64, 1, 1, 2];
        let p = desc_index_i64(&data);
        let ordered: Vec<i64> = p.iter().map(|&i| data[i as usize]).collect();
        assert_eq!(ordered, vec![3, 2, 1, 1]);
        assert_eq!((p[2], p[3]), (1, 2));
    }

    #[test]
    fn asc_index_f64_handles_nan_and_negatives() {
        let data = vec![2.0, -1.0, f64::NAN, 0.0];
        let p = asc_index_f64(&data);
        let ordered: Vec<f64> = p.iter().map(|&i| data[i as usize]).collect();
        assert_eq!(&ordered[1..3], &[-1.0, 0.0]);
    }

    #[test]
    fn reorder_table_permutes_every_column_consistently() {
        let heap = crate::heap::Heap::new(crate::heap::HeapConfig::default());
        let names = crate::value::Value::vector_symbol_from_strs(&heap, &["k", "v"]).unwrap();
        let k = crate::value::Value::vector_i64(&heap, &[3, 1, 2]).unwrap();
        let v = crate::value::Value::vector_i64(&heap, &[30, 10, 20]).unwrap();
        let table = crate::value::Value::table(names, crate::value::Value::list(vec![k, v])).unwrap();

        let order = asc_index_i64(&[3, 1, 2]);
        let reordered = reorder_table(&heap, &table, &order).unwrap();
        let (_, cols) = reordered.as_table().unwrap();
        let cols = cols.as_list().unwrap();
        assert_eq!(cols[0].as_i64_slice().unwrap(), &[1, 2, 3]);
        assert_eq!(cols[1].as_i64_slice().unwrap(), &[10, 20, 30]);
    }

    #[test]
    fn sort_f64_orders_negatives_and_positives() {
        let mut data: Vec<f64> = (0..2000).map(|i| (i as f64 - 1000.0) * 0.37).collect();
        sort_f64(&mut data, false);
        assert!(data.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn parallel_sort_matches_serial_on_small_input() {
        let pool = Pool::create(1, crate::heap::HeapConfig::default());
        let mut data = vec![5i64, 3, 1, 4, 2];
        parallel_sort_runs(&mut data, &pool, |s| sort_i64(s, false), |a, b| a <= b);
        assert_eq!(data, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn plan_for_picks_counting_for_u8_and_comparison_for_small_inputs() {
        use crate::value::{T_I64, T_U8};
        assert_eq!(plan_for(T_U8, 10, 1), SortPlan::CountingU8);
        assert_eq!(plan_for(T_I64, 10, 1), SortPlan::Comparison);
        assert_eq!(plan_for(T_I64, 10_000, 1), SortPlan::RadixI64);
        assert_eq!(plan_for(T_I64, 1_000_000, 8), SortPlan::ParallelRadix);
    }

    #[test]
    fn k_way_merge_merges_sorted_runs() {
        let runs: Vec<&[i64]> = vec![&[1, 4, 7], &[2, 3, 9], &[0, 5]];
        let merged = k_way_merge(&runs, &|a, b| a <= b);
        assert_eq!(merged, vec![0, 1, 2, 3, 4, 5, 7, 9]);
    }
}
