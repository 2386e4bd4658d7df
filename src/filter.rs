//! Filter, row-gather, and set operations (spec §4.6).
//!
//! `where` never materializes a boolean mask as the query result -- it
//! resolves to index positions, and [`at_ids`] is the one place those
//! positions turn into an actual gathered `Value`. Keeping the two
//! separate is what lets [`crate::value::Value::map_filter`] stay a cheap
//! "base + indices" handle right up until something demands the real rows.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::heap::Heap;
use crate::value::{ColumnData, Value};

/// Row positions where a boolean predicate column is `true`.
pub fn where_true(mask: &Value) -> Result<Vec<u64>> {
    let bits = mask.as_b8_slice()?;
    Ok(bits.iter().enumerate().filter(|(_, &b)| b).map(|(i, _)| i as u64).collect())
}

/// Gather `base[ids]` into a freshly allocated vector of the same element
/// type (spec §4.6 `at_ids`). Any composite or atom type that isn't a
/// primitive vector is gathered as a `List`.
pub fn at_ids(heap: &Arc<Heap>, base: &Value, ids: &[u64]) -> Result<Value> {
    match base.body() {
        crate::value::Body::Vector(col) => gather_column(heap, col, ids),
        crate::value::Body::List(items) => Ok(Value::list(ids.iter().map(|&i| items[i as usize].clone()).collect())),
        _ => Ok(Value::list(ids.iter().map(|_| base.clone()).collect())),
    }
}

fn gather_column(heap: &Arc<Heap>, col: &ColumnData, ids: &[u64]) -> Result<Value> {
    macro_rules! gather {
        ($variant:ident, $ctor:ident) => {{
            let src = match col {
                ColumnData::$variant(v) => v.as_slice(),
                _ => unreachable!(),
            };
            let out: Vec<_> = ids.iter().map(|&i| src[i as usize]).collect();
            Value::$ctor(heap, &out)
        }};
    }
    match col {
        ColumnData::B8(_) => gather!(B8, vector_b8),
        ColumnData::U8(_) => gather!(U8, vector_u8),
        ColumnData::C8(_) => {
            let src = match col {
                ColumnData::C8(v) => v.as_slice(),
                _ => unreachable!(),
            };
            let out: Vec<u8> = ids.iter().map(|&i| src[i as usize]).collect();
            Ok(Value::new_c8_vector(heap, &out)?)
        }
        ColumnData::I16(v) => {
            let out: Vec<i16> = ids.iter().map(|&i| v.as_slice()[i as usize]).collect();
            Value::vector_i16(heap, &out)
        }
        ColumnData::I32(v) => {
            let out: Vec<i32> = ids.iter().map(|&i| v.as_slice()[i as usize]).collect();
            Value::vector_i32(heap, &out)
        }
        ColumnData::I64(v) => {
            let out: Vec<i64> = ids.iter().map(|&i| v.as_slice()[i as usize]).collect();
            Value::vector_i64(heap, &out)
        }
        ColumnData::F64(v) => {
            let out: Vec<f64> = ids.iter().map(|&i| v.as_slice()[i as usize]).collect();
            Value::vector_f64(heap, &out)
        }
        ColumnData::Symbol(v) => {
            let out: Vec<u32> = ids.iter().map(|&i| v.as_slice()[i as usize]).collect();
            Value::vector_symbol(heap, &out)
        }
        ColumnData::Date(v) => {
            let out: Vec<i32> = ids.iter().map(|&i| v.as_slice()[i as usize]).collect();
            Value::new_date_vector(heap, &out)
        }
        ColumnData::Time(v) => {
            let out: Vec<i32> = ids.iter().map(|&i| v.as_slice()[i as usize]).collect();
            Value::new_time_vector(heap, &out)
        }
        ColumnData::Timestamp(v) => {
            let out: Vec<i64> = ids.iter().map(|&i| v.as_slice()[i as usize]).collect();
            Value::new_timestamp_vector(heap, &out)
        }
        ColumnData::Guid(v) => {
            let out: Vec<[u8; 16]> = ids.iter().map(|&i| v.as_slice()[i as usize]).collect();
            Value::new_guid_vector(heap, &out)
        }
    }
}

/// Materialize a `MAPFILTER` intermediate into a concrete vector/table
/// (spec §4.5/§4.6 deferred materialization).
pub fn materialize_filter(heap: &Arc<Heap>, base: &Value, indices: &Value) -> Result<Value> {
    let ids = indices.as_i64_slice()?.iter().map(|&i| i as u64).collect::<Vec<_>>();
    if let Ok((names, columns)) = base.as_table() {
        let cols = columns.as_list()?;
        let gathered: Result<Vec<Value>> = cols.iter().map(|c| at_ids(heap, c, &ids)).collect();
        return Value::table(names.clone(), Value::list(gathered?));
    }
    at_ids(heap, base, &ids)
}

fn i64_key_set(v: &Value) -> Result<HashSet<i64>> {
    Ok(v.as_i64_slice()?.iter().copied().collect())
}

/// `union`: distinct values present in either vector, in first-seen order.
pub fn union_i64(heap: &Arc<Heap>, a: &Value, b: &Value) -> Result<Value> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for v in a.as_i64_slice()?.iter().chain(b.as_i64_slice()?.iter()) {
        if seen.insert(*v) {
            out.push(*v);
        }
    }
    Value::vector_i64(heap, &out)
}

/// `except`: values in `a` not present in `b`, preserving `a`'s order.
pub fn except_i64(heap: &Arc<Heap>, a: &Value, b: &Value) -> Result<Value> {
    let rhs = i64_key_set(b)?;
    let out: Vec<i64> = a.as_i64_slice()?.iter().copied().filter(|v| !rhs.contains(v)).collect();
    Value::vector_i64(heap, &out)
}

/// `sect` (intersection): values present in both `a` and `b`, preserving
/// `a`'s order, each value emitted at most once.
pub fn sect_i64(heap: &Arc<Heap>, a: &Value, b: &Value) -> Result<Value> {
    let rhs = i64_key_set(b)?;
    let mut seen = HashSet::new();
    let out: Vec<i64> = a.as_i64_slice()?.iter().copied().filter(|v| rhs.contains(v) && seen.insert(*v)).collect();
    Value::vector_i64(heap, &out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    fn heap() -> Arc<Heap> {
        Heap::new(HeapConfig::default())
    }

    #[test]
    fn where_true_extracts_positions() {
        let h = heap();
        let mask = Value::vector_b8(&h, &[true, false, true, true]).unwrap();
        assert_eq!(where_true(&mask).unwrap(), vec![0, 2, 3]);
    }

    #[test]
    fn at_ids_gathers_i64_vector() {
        let h = heap();
        let base = Value::vector_i64(&h, &[10, 20, 30, 40]).unwrap();
        let out = at_ids(&h, &base, &[3, 1]).unwrap();
        assert_eq!(out.as_i64_slice().unwrap(), &[40, 20]);
    }

    #[test]
    fn set_ops_on_i64_vectors() {
        let h = heap();
        let a = Value::vector_i64(&h, &[1, 2, 3]).unwrap();
        let b = Value::vector_i64(&h, &[2, 3, 4]).unwrap();
        assert_eq!(union_i64(&h, &a, &b).unwrap().as_i64_slice().unwrap(), &[1, 2, 3, 4]);
        assert_eq!(except_i64(&h, &a, &b).unwrap().as_i64_slice().unwrap(), &[1]);
        assert_eq!(sect_i64(&h, &a, &b).unwrap().as_i64_slice().unwrap(), &[2, 3]);
    }

    #[test]
    fn materialize_filter_gathers_table_rows() {
        let h = heap();
        let names = Value::vector_symbol_from_strs(&h, &["id"]).unwrap();
        let col = Value::vector_i64(&h, &[10, 20, 30]).unwrap();
        let table = Value::table(names, Value::list(vec![col])).unwrap();
        let idx = Value::vector_i64(&h, &[2, 0]).unwrap();
        let out = materialize_filter(&h, &table, &idx).unwrap();
        let (_, cols) = out.as_table().unwrap();
        assert_eq!(cols.as_list().unwrap()[0].as_i64_slice().unwrap(), &[30, 10]);
    }
}
