//! Hash join (spec §4.7): inner and left-outer only, per SPEC_FULL.md §4.7 --
//! right/full-outer were never named by any testable scenario and are left
//! unbuilt rather than grown past what's actually exercised.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RayError, Result};
use crate::filter::at_ids;
use crate::heap::Heap;
use crate::value::Value;

/// Build side: bucket every row of `keys` by value, so probing is O(1)
/// expected per probe row (spec §4.7 "hash-based").
fn build(keys: &[i64]) -> HashMap<i64, Vec<u64>> {
    let mut map: HashMap<i64, Vec<u64>> = HashMap::with_capacity(keys.len());
    for (i, &k) in keys.iter().enumerate() {
        map.entry(k).or_default().push(i as u64);
    }
    map
}

fn table_columns<'a>(table: &'a Value) -> Result<(&'a Value, &'a [Value])> {
    let (names, columns) = table.as_table()?;
    Ok((names, columns.as_list()?))
}

/// Inner join `left` and `right` on their respective `i64`/`SYMBOL` key
/// columns. Output columns are one per name in `(left ∪ right) − {right's
/// key name}` (spec §4.7 step 5): a name that appears on both sides is
/// overlaid into a single column rather than duplicated, and the right
/// side's own key column never reappears since it carries no information
/// the left key column doesn't already have.
pub fn inner_join(heap: &Arc<Heap>, left: &Value, left_key: &Value, right: &Value, right_key: &Value) -> Result<Value> {
    let (left_names, left_cols) = table_columns(left)?;
    let (right_names, right_cols) = table_columns(right)?;
    let rkeys = right_key.as_i64_slice()?;
    let lkeys = left_key.as_i64_slice()?;
    let index = build(rkeys);

    let mut left_ids = Vec::new();
    let mut right_ids: Vec<Option<u64>> = Vec::new();
    for (li, &k) in lkeys.iter().enumerate() {
        if let Some(matches) = index.get(&k) {
            for &ri in matches {
                left_ids.push(li as u64);
                right_ids.push(Some(ri));
            }
        }
    }

    assemble(heap, left_names, left_cols, &left_ids, right_names, right_cols, right_key, &right_ids)
}

/// Left-outer join: every left row appears at least once; unmatched left
/// rows pair with a null-filled right side (spec §4.7 `lj`). Column
/// selection follows the same name-union-minus-key-with-overlay rule as
/// [`inner_join`].
pub fn left_join(heap: &Arc<Heap>, left: &Value, left_key: &Value, right: &Value, right_key: &Value) -> Result<Value> {
    let (left_names, left_cols) = table_columns(left)?;
    let (right_names, right_cols) = table_columns(right)?;
    let rkeys = right_key.as_i64_slice()?;
    let lkeys = left_key.as_i64_slice()?;
    let index = build(rkeys);

    let mut left_ids = Vec::new();
    let mut right_ids: Vec<Option<u64>> = Vec::new();
    for (li, &k) in lkeys.iter().enumerate() {
        match index.get(&k) {
            Some(matches) if !matches.is_empty() => {
                for &ri in matches {
                    left_ids.push(li as u64);
                    right_ids.push(Some(ri));
                }
            }
            _ => {
                left_ids.push(li as u64);
                right_ids.push(None);
            }
        }
    }

    assemble(heap, left_names, left_cols, &left_ids, right_names, right_cols, right_key, &right_ids)
}

/// Build the joined table's columns: one per name in `left_names`, overlaid
/// with the same-named right column when one exists (and it isn't the
/// right's own key column); then one per remaining right name not already
/// covered.
fn assemble(
    heap: &Arc<Heap>,
    left_names: &Value,
    left_cols: &[Value],
    left_ids: &[u64],
    right_names: &Value,
    right_cols: &[Value],
    right_key: &Value,
    right_ids: &[Option<u64>],
) -> Result<Value> {
    let left_name_ids = left_names.as_symbol_slice()?;
    let right_name_ids = right_names.as_symbol_slice()?;
    let right_key_idx = right_cols.iter().position(|c| c.ptr_eq(right_key));

    let mut names = Vec::new();
    let mut columns = Vec::new();

    for (i, &name) in left_name_ids.iter().enumerate() {
        let right_match = right_name_ids.iter().position(|&n| n == name).filter(|&j| Some(j) != right_key_idx);
        names.push(name);
        columns.push(match right_match {
            Some(j) => gather_overlay(heap, &left_cols[i], left_ids, &right_cols[j], right_ids)?,
            None => at_ids(heap, &left_cols[i], left_ids)?,
        });
    }

    for (j, &name) in right_name_ids.iter().enumerate() {
        if Some(j) == right_key_idx || left_name_ids.contains(&name) {
            continue;
        }
        names.push(name);
        columns.push(gather_nullable(heap, &right_cols[j], right_ids)?);
    }

    Value::table(Value::vector_symbol(heap, &names)?, Value::list(columns))
}

/// Overlay a same-named left/right column pair into one output column:
/// position `i` is `right_col[hit]` when the probe matched, else
/// `left_col[left_ids[i]]` (spec §4.7 step 5).
fn gather_overlay(heap: &Arc<Heap>, left_col: &Value, left_ids: &[u64], right_col: &Value, right_ids: &[Option<u64>]) -> Result<Value> {
    match (left_col.body(), right_col.body()) {
        (crate::value::Body::Vector(crate::value::ColumnData::I64(_)), crate::value::Body::Vector(crate::value::ColumnData::I64(_))) => {
            let lsrc = left_col.as_i64_slice()?;
            let rsrc = right_col.as_i64_slice()?;
            let out: Vec<i64> =
                left_ids.iter().zip(right_ids).map(|(&li, ri)| ri.map(|r| rsrc[r as usize]).unwrap_or(lsrc[li as usize])).collect();
            Value::vector_i64(heap, &out)
        }
        (crate::value::Body::Vector(crate::value::ColumnData::F64(_)), crate::value::Body::Vector(crate::value::ColumnData::F64(_))) => {
            let lsrc = left_col.as_f64_slice()?;
            let rsrc = right_col.as_f64_slice()?;
            let out: Vec<f64> =
                left_ids.iter().zip(right_ids).map(|(&li, ri)| ri.map(|r| rsrc[r as usize]).unwrap_or(lsrc[li as usize])).collect();
            Value::vector_f64(heap, &out)
        }
        (crate::value::Body::Vector(crate::value::ColumnData::Symbol(_)), crate::value::Body::Vector(crate::value::ColumnData::Symbol(_))) => {
            let lsrc = left_col.as_symbol_slice()?;
            let rsrc = right_col.as_symbol_slice()?;
            let out: Vec<u32> =
                left_ids.iter().zip(right_ids).map(|(&li, ri)| ri.map(|r| rsrc[r as usize]).unwrap_or(lsrc[li as usize])).collect();
            Value::vector_symbol(heap, &out)
        }
        _ => Err(RayError::Nyi("join overlay on this column type")),
    }
}

/// Gather a right-side column for a left-outer join: positions with no
/// match get the column's type-appropriate null sentinel (spec §3 "Per-type
/// null sentinels exist for numerics").
fn gather_nullable(heap: &Arc<Heap>, col: &Value, ids: &[Option<u64>]) -> Result<Value> {
    match col.body() {
        crate::value::Body::Vector(crate::value::ColumnData::I64(_)) => {
            let src = col.as_i64_slice()?;
            let out: Vec<i64> = ids.iter().map(|id| id.map(|i| src[i as usize]).unwrap_or(i64::MIN)).collect();
            Value::vector_i64(heap, &out)
        }
        crate::value::Body::Vector(crate::value::ColumnData::F64(_)) => {
            let src = col.as_f64_slice()?;
            let out: Vec<f64> = ids.iter().map(|id| id.map(|i| src[i as usize]).unwrap_or(f64::NAN)).collect();
            Value::vector_f64(heap, &out)
        }
        crate::value::Body::Vector(crate::value::ColumnData::Symbol(_)) => {
            let src = col.as_symbol_slice()?;
            let out: Vec<u32> = ids.iter().map(|id| id.map(|i| src[i as usize]).unwrap_or(u32::MAX)).collect();
            Value::vector_symbol(heap, &out)
        }
        _ => Err(RayError::Nyi("left join on this column type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    fn heap() -> Arc<Heap> {
        Heap::new(HeapConfig::default())
    }

    fn orders(heap: &Arc<Heap>) -> Value {
        let names = Value::vector_symbol_from_strs(heap, &["cust", "amt"]).unwrap();
        let cust = Value::vector_i64(heap, &[1, 2, 2, 3]).unwrap();
        let amt = Value::vector_i64(heap, &[100, 200, 250, 300]).unwrap();
        Value::table(names, Value::list(vec![cust, amt])).unwrap()
    }

    fn customers(heap: &Arc<Heap>) -> Value {
        let names = Value::vector_symbol_from_strs(heap, &["id", "tier"]).unwrap();
        let id = Value::vector_i64(heap, &[1, 2]).unwrap();
        let tier = Value::vector_i64(heap, &[10, 20]).unwrap();
        Value::table(names, Value::list(vec![id, tier])).unwrap()
    }

    #[test]
    fn inner_join_drops_unmatched_rows() {
        let h = heap();
        let o = orders(&h);
        let c = customers(&h);
        let cust_key = o.as_table().unwrap().1.as_list().unwrap()[0].clone();
        let id_key = c.as_table().unwrap().1.as_list().unwrap()[0].clone();
        let joined = inner_join(&h, &o, &cust_key, &c, &id_key).unwrap();
        let (names, cols) = joined.as_table().unwrap();
        assert_eq!(names.as_symbol_slice().unwrap().len(), 3);
        assert_eq!(cols.as_list().unwrap()[0].as_i64_slice().unwrap(), &[1, 2, 2]);
    }

    #[test]
    fn left_join_keeps_unmatched_left_rows_with_nulls() {
        let h = heap();
        let o = orders(&h);
        let c = customers(&h);
        let cust_key = o.as_table().unwrap().1.as_list().unwrap()[0].clone();
        let id_key = c.as_table().unwrap().1.as_list().unwrap()[0].clone();
        let joined = left_join(&h, &o, &cust_key, &c, &id_key).unwrap();
        let (_, cols) = joined.as_table().unwrap();
        let cols = cols.as_list().unwrap();
        assert_eq!(cols[0].as_i64_slice().unwrap(), &[1, 2, 2, 3]);
        let tiers = cols[2].as_i64_slice().unwrap();
        assert_eq!(tiers, &[10, 20, 20, i64::MIN]);
    }

    #[test]
    fn same_named_non_key_columns_overlay_instead_of_duplicating() {
        let h = heap();
        let left_names = Value::vector_symbol_from_strs(&h, &["cust", "amt", "note"]).unwrap();
        let cust = Value::vector_i64(&h, &[1, 2, 2, 3]).unwrap();
        let amt = Value::vector_i64(&h, &[100, 200, 250, 300]).unwrap();
        let left_note = Value::vector_i64(&h, &[7, 7, 7, 7]).unwrap();
        let left = Value::table(left_names, Value::list(vec![cust, amt, left_note])).unwrap();

        let right_names = Value::vector_symbol_from_strs(&h, &["id", "tier", "note"]).unwrap();
        let id = Value::vector_i64(&h, &[1, 2]).unwrap();
        let tier = Value::vector_i64(&h, &[10, 20]).unwrap();
        let right_note = Value::vector_i64(&h, &[9, 9]).unwrap();
        let right = Value::table(right_names, Value::list(vec![id, tier, right_note])).unwrap();

        let cust_key = left.as_table().unwrap().1.as_list().unwrap()[0].clone();
        let id_key = right.as_table().unwrap().1.as_list().unwrap()[0].clone();
        let joined = left_join(&h, &left, &cust_key, &right, &id_key).unwrap();
        let (names, cols) = joined.as_table().unwrap();

        // id (the right key) never reappears; cust/amt/note/tier each appear once.
        assert_eq!(names.as_symbol_slice().unwrap().len(), 4);
        let cols = cols.as_list().unwrap();
        assert_eq!(cols[0].as_i64_slice().unwrap(), &[1, 2, 2, 3]);
        assert_eq!(cols[2].as_i64_slice().unwrap(), &[9, 9, 9, 7]);
        assert_eq!(cols[3].as_i64_slice().unwrap(), &[10, 20, 20, i64::MIN]);
    }
}
