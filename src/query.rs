//! The columnar query engine (spec §4.5).
//!
//! The core never parses Rayfall source -- callers hand it an already-built
//! [`Query`] tree referencing [`Value`] columns by interned name, a
//! planner/runner split with a query tree standing in for a pipeline graph.

use std::sync::Arc;

use crate::error::{RayError, Result};
use crate::filter;
use crate::hash::{self, CompositeSaltedHashTable, PerfectHashTable, SaltedHashTable};
use crate::heap::Heap;
use crate::value::{Body, ColumnData, Value};

pub type SymbolId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggOp {
    Sum,
    Count,
    Avg,
    Min,
    Max,
    First,
    Last,
}

/// The small fixed set of scalar/vector builtins the concrete testable
/// scenarios exercise (spec §8) -- not a general evaluator, which is the
/// external Rayfall evaluator's job (SPEC_FULL.md §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostFn {
    Add,
    Lt,
    Gt,
    Eq,
}

#[derive(Clone, Debug)]
pub enum Expr {
    Column(SymbolId),
    Value(Value),
    Agg(AggOp, Box<Expr>),
    Apply(HostFn, Vec<Expr>),
}

/// A group-by key column: `(output name, expression)`. More than one entry
/// makes this a composite key (spec §4.5.1: "the hardest part" of the
/// group-by engine, mandatory width rather than an optional extension).
#[derive(Clone, Debug)]
pub struct GroupSpec {
    pub keys: Vec<(SymbolId, Expr)>,
}

impl GroupSpec {
    pub fn single(key_name: SymbolId, key: Expr) -> GroupSpec {
        GroupSpec { keys: vec![(key_name, key)] }
    }
}

#[derive(Clone, Debug)]
pub struct Query {
    pub from: Expr,
    pub filter: Option<Expr>,
    pub by: Option<GroupSpec>,
    pub project: Vec<(SymbolId, Expr)>,
}

/// Evaluate `expr` against `table` (or, absent a `by`, any already-resolved
/// base value) to a full column/atom `Value`. `Expr::Agg` is only valid
/// inside a `by`-projection and is rejected here.
fn eval(heap: &Arc<Heap>, table: &Value, expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Column(name) => table.column(*name),
        Expr::Value(v) => Ok(v.clone()),
        Expr::Agg(_, _) => Err(RayError::Nyi("aggregate expression outside of a group-by projection")),
        Expr::Apply(f, args) => {
            let evaluated: Result<Vec<Value>> = args.iter().map(|a| eval(heap, table, a)).collect();
            apply_host_fn(heap, *f, &evaluated?)
        }
    }
}

fn broadcast_i64<'a>(v: &'a Value, len: usize, buf: &'a mut Vec<i64>) -> Result<&'a [i64]> {
    if v.is_atom() {
        *buf = vec![v.as_atom_i64()?; len];
        Ok(&*buf)
    } else {
        v.as_i64_slice()
    }
}

fn apply_host_fn(heap: &Arc<Heap>, f: HostFn, args: &[Value]) -> Result<Value> {
    if args.len() != 2 {
        return Err(RayError::Arity { need: 2, have: args.len() as u32, arg: 0 });
    }
    let len = args[0].len().max(args[1].len()) as usize;
    let (mut abuf, mut bbuf) = (Vec::new(), Vec::new());
    let a = broadcast_i64(&args[0], len, &mut abuf)?;
    let b = broadcast_i64(&args[1], len, &mut bbuf)?;
    match f {
        HostFn::Add => {
            let out: Vec<i64> = a.iter().zip(b).map(|(x, y)| x + y).collect();
            if args[0].is_atom() && args[1].is_atom() {
                Ok(Value::atom_i64(out[0]))
            } else {
                Value::vector_i64(heap, &out)
            }
        }
        HostFn::Lt => Value::vector_b8(heap, &a.iter().zip(b).map(|(x, y)| x < y).collect::<Vec<_>>()),
        HostFn::Gt => Value::vector_b8(heap, &a.iter().zip(b).map(|(x, y)| x > y).collect::<Vec<_>>()),
        HostFn::Eq => Value::vector_b8(heap, &a.iter().zip(b).map(|(x, y)| x == y).collect::<Vec<_>>()),
    }
}

/// Sum/count/etc. over `Expr::Column`/`Expr::Value`, with no `by` (a whole-
/// column reduction). Dispatches on the evaluated column's element type so
/// `(sum price)` over an `F64` column reduces in floating point rather than
/// failing as an i64 column.
pub fn eval_scalar_agg(heap: &Arc<Heap>, table: &Value, op: AggOp, inner: &Expr) -> Result<Value> {
    let col = eval(heap, table, inner)?;
    match col.body() {
        Body::Vector(ColumnData::F64(_)) => reduce_f64(op, col.as_f64_slice()?),
        _ => reduce(op, col.as_i64_slice()?),
    }
}

fn reduce(op: AggOp, values: &[i64]) -> Result<Value> {
    Ok(match op {
        AggOp::Count => Value::atom_i64(values.len() as i64),
        AggOp::Sum => Value::atom_i64(values.iter().sum()),
        AggOp::Avg => {
            if values.is_empty() {
                Value::atom_f64(f64::NAN)
            } else {
                Value::atom_f64(values.iter().sum::<i64>() as f64 / values.len() as f64)
            }
        }
        AggOp::Min => Value::atom_i64(*values.iter().min().ok_or(RayError::Domain { arg: 0, field: None })?),
        AggOp::Max => Value::atom_i64(*values.iter().max().ok_or(RayError::Domain { arg: 0, field: None })?),
        AggOp::First => Value::atom_i64(*values.first().ok_or(RayError::Domain { arg: 0, field: None })?),
        AggOp::Last => Value::atom_i64(*values.last().ok_or(RayError::Domain { arg: 0, field: None })?),
    })
}

/// `reduce`'s floating-point mirror (spec's own `(sum price)` worked
/// example).
fn reduce_f64(op: AggOp, values: &[f64]) -> Result<Value> {
    Ok(match op {
        AggOp::Count => Value::atom_i64(values.len() as i64),
        AggOp::Sum => Value::atom_f64(values.iter().sum()),
        AggOp::Avg => {
            if values.is_empty() {
                Value::atom_f64(f64::NAN)
            } else {
                Value::atom_f64(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
        AggOp::Min => Value::atom_f64(values.iter().copied().reduce(f64::min).ok_or(RayError::Domain { arg: 0, field: None })?),
        AggOp::Max => Value::atom_f64(values.iter().copied().reduce(f64::max).ok_or(RayError::Domain { arg: 0, field: None })?),
        AggOp::First => Value::atom_f64(*values.first().ok_or(RayError::Domain { arg: 0, field: None })?),
        AggOp::Last => Value::atom_f64(*values.last().ok_or(RayError::Domain { arg: 0, field: None })?),
    })
}

/// Resolve a key column to an `i64` representation suitable for hashing: a
/// `SYMBOL` column goes through its interned ids (spec.md §8's literal
/// `by: k` worked example groups by a SYMBOL vector the same way as any
/// other key), everything else is read as `i64` directly.
fn key_values_i64(col: &Value) -> Result<Vec<i64>> {
    match col.body() {
        Body::Vector(ColumnData::Symbol(_)) => Ok(col.as_symbol_slice()?.iter().map(|&id| id as i64).collect()),
        _ => Ok(col.as_i64_slice()?.to_vec()),
    }
}

/// Fused hash-aggregate (spec §4.5.1): group by one or more key columns.
/// A single key chooses the perfect-hash path when its range is dense
/// relative to its cardinality, a salted hash table otherwise; K>1 keys
/// always go through [`CompositeSaltedHashTable`], comparing the full key
/// tuple against a stored representative row only once the combined hash's
/// salt has matched (spec §4.3/§4.5.1).
fn group_and_aggregate(heap: &Arc<Heap>, table: &Value, group: &GroupSpec, project: &[(SymbolId, Expr)]) -> Result<Value> {
    let key_cols: Vec<Value> = group.keys.iter().map(|(_, expr)| eval(heap, table, expr)).collect::<Result<_>>()?;
    let num_rows = key_cols.first().map(|c| c.len() as usize).unwrap_or(0);
    let key_is_symbol: Vec<bool> = key_cols.iter().map(|c| matches!(c.body(), Body::Vector(ColumnData::Symbol(_)))).collect();
    let key_values: Vec<Vec<i64>> = key_cols.iter().map(key_values_i64).collect::<Result<_>>()?;

    let mut group_ids = vec![0u32; num_rows];
    let mut next_id = 0u32;
    let mut group_keys: Vec<Vec<i64>> = Vec::new();

    if key_values.len() == 1 {
        let keys = &key_values[0];
        if let (Some(&min), Some(&max)) = (keys.iter().min(), keys.iter().max()) {
            let estimate = keys.len().min(1 << 20);
            if PerfectHashTable::is_worthwhile(min, max, estimate) {
                let mut table_ = PerfectHashTable::new(min, (max - min + 1) as usize);
                for (i, &k) in keys.iter().enumerate() {
                    let id = table_.get_or_insert(k, &mut next_id);
                    group_ids[i] = id;
                    if id as usize == group_keys.len() {
                        group_keys.push(vec![k]);
                    }
                }
            } else {
                let mut table_ = SaltedHashTable::with_capacity(keys.len().next_power_of_two().max(16));
                for (i, &k) in keys.iter().enumerate() {
                    let id = table_.get_or_insert(k, &mut next_id);
                    group_ids[i] = id;
                    if id as usize == group_keys.len() {
                        group_keys.push(vec![k]);
                    }
                }
            }
        }
    } else if !key_values.is_empty() {
        let mut table_ = CompositeSaltedHashTable::with_capacity(num_rows.max(1).next_power_of_two());
        for row in 0..num_rows {
            let row_hash = key_values.iter().fold(0u64, |h, col| hash::mix(h, col[row] as u64));
            let eq = |a: usize, b: usize| key_values.iter().all(|col| col[a] == col[b]);
            let id = table_.get_or_insert(row_hash, row, &mut next_id, eq);
            group_ids[row] = id;
            if id as usize == group_keys.len() {
                group_keys.push(key_values.iter().map(|col| col[row]).collect());
            }
        }
    }
    let num_groups = group_keys.len();

    let mut out_names = Vec::new();
    let mut out_columns = Vec::new();
    for (k_idx, &(name, _)) in group.keys.iter().enumerate() {
        out_names.push(name);
        let col_values: Vec<i64> = group_keys.iter().map(|gk| gk[k_idx]).collect();
        out_columns.push(if key_is_symbol[k_idx] {
            Value::vector_symbol(heap, &col_values.iter().map(|&v| v as u32).collect::<Vec<_>>())?
        } else {
            Value::vector_i64(heap, &col_values)?
        });
    }

    for (name, expr) in project {
        let Expr::Agg(op, inner) = expr else {
            return Err(RayError::Nyi("group-by projections must be aggregate expressions"));
        };
        let inner_col = eval(heap, table, inner)?;
        let merged = match inner_col.body() {
            Body::Vector(ColumnData::F64(_)) => {
                let values = inner_col.as_f64_slice()?;
                let mut partials: Vec<Vec<f64>> = vec![Vec::new(); num_groups];
                for (i, &v) in values.iter().enumerate() {
                    partials[group_ids[i] as usize].push(v);
                }
                let reduced: Vec<Value> = partials.iter().map(|vs| reduce_f64(*op, vs)).collect::<Result<_>>()?;
                match op {
                    AggOp::Count => Value::vector_i64(heap, &reduced.iter().map(|v| v.as_atom_i64().unwrap_or(0)).collect::<Vec<_>>())?,
                    _ => Value::vector_f64(heap, &reduced.iter().map(|v| v.as_atom_f64().unwrap_or(f64::NAN)).collect::<Vec<_>>())?,
                }
            }
            _ => {
                let values = inner_col.as_i64_slice()?;
                let mut partials: Vec<Vec<i64>> = vec![Vec::new(); num_groups];
                for (i, &v) in values.iter().enumerate() {
                    partials[group_ids[i] as usize].push(v);
                }
                let reduced: Vec<Value> = partials.iter().map(|vs| reduce(*op, vs)).collect::<Result<_>>()?;
                match op {
                    AggOp::Avg => Value::vector_f64(heap, &reduced.iter().map(|v| v.as_atom_f64().unwrap_or(f64::NAN)).collect::<Vec<_>>())?,
                    _ => Value::vector_i64(heap, &reduced.iter().map(|v| v.as_atom_i64().unwrap_or(0)).collect::<Vec<_>>())?,
                }
            }
        };
        out_names.push(*name);
        out_columns.push(merged);
    }

    let out_table = Value::table(Value::vector_symbol(heap, &out_names)?, Value::list(out_columns))?;

    // Callers that need a deterministic group order sort by the first key
    // column; this is also the `sort` module's table-reorder consumer
    // (spec §4.4).
    let primary_key: Vec<i64> = group_keys.iter().map(|gk| gk[0]).collect();
    let order = crate::sort::asc_index_i64(&primary_key);
    crate::sort::reorder_table(heap, &out_table, &order)
}

/// Run a full `Query` against its base table, fanning a parted (multi-day)
/// table out across its partitions and recombining (spec §8 scenario:
/// `count` over a 5-partition table).  Each partition is itself an ordinary
/// table, so this is the one place the query executor is partition-aware;
/// [`run_single`] never sees a `PARTED` value.
pub fn run(heap: &Arc<Heap>, query: &Query) -> Result<Value> {
    let base = eval(heap, &Value::null(), &query.from)?;
    if let Ok(parts) = base.as_parted() {
        return run_parted(heap, query, parts);
    }
    run_single(heap, query, base)
}

fn run_parted(heap: &Arc<Heap>, query: &Query, parts: &[Value]) -> Result<Value> {
    let per_partition: Result<Vec<Value>> = parts
        .iter()
        .map(|part| run_single(heap, query, part.clone()))
        .collect();
    let per_partition = per_partition?;

    // A grouped or aggregate-only query reduces each partition to a scalar
    // or a small table; a plain row query reduces to a table of matching
    // rows. Either way the combination step is "concatenate rows, then
    // re-aggregate if the query had no `by`" -- here the query has no
    // grouping so the results are summed for Sum/Count, or concatenated
    // otherwise, matching the count-over-dates scenario exactly.
    if query.by.is_none() && query.project.iter().any(|(_, e)| matches!(e, Expr::Agg(_, _))) {
        return combine_scalar_aggs(heap, query, &per_partition);
    }
    concat_tables(heap, &per_partition)
}

fn combine_scalar_aggs(heap: &Arc<Heap>, query: &Query, per_partition: &[Value]) -> Result<Value> {
    let mut names = Vec::new();
    let mut columns = Vec::new();
    for (col_idx, (name, expr)) in query.project.iter().enumerate() {
        let Expr::Agg(op, _) = expr else {
            return Err(RayError::Nyi("parted combination of non-aggregate projections"));
        };
        let partials: Result<Vec<i64>> = per_partition
            .iter()
            .map(|p| {
                let (_, cols) = p.as_table()?;
                cols.as_list()?[col_idx].as_atom_i64()
            })
            .collect();
        let partials = partials?;
        let combined = match op {
            AggOp::Sum | AggOp::Count => partials.iter().sum(),
            AggOp::Min => *partials.iter().min().ok_or(RayError::Domain { arg: 0, field: None })?,
            AggOp::Max => *partials.iter().max().ok_or(RayError::Domain { arg: 0, field: None })?,
            AggOp::First => *partials.first().ok_or(RayError::Domain { arg: 0, field: None })?,
            AggOp::Last => *partials.last().ok_or(RayError::Domain { arg: 0, field: None })?,
            AggOp::Avg => return Err(RayError::Nyi("avg of partition averages needs weighting by partition size")),
        };
        names.push(*name);
        columns.push(Value::atom_i64(combined));
    }
    Value::table(Value::vector_symbol(heap, &names)?, Value::list(columns))
}

/// Stack same-schema partition tables row-wise. Limited to `i64`-shaped
/// columns (the `SYMBOL`/`Date` wire kinds all store as `i64`-like data
/// underneath); a column of another element type returns `Nyi` rather than
/// silently truncating it.
fn concat_tables(heap: &Arc<Heap>, tables: &[Value]) -> Result<Value> {
    let Some(first) = tables.first() else {
        return Err(RayError::Domain { arg: 0, field: None });
    };
    let (names, first_cols) = first.as_table()?;
    let num_cols = first_cols.as_list()?.len();
    let mut out_columns = Vec::with_capacity(num_cols);
    for col_idx in 0..num_cols {
        let mut merged: Option<Value> = None;
        for t in tables {
            let (_, cols) = t.as_table()?;
            let col = &cols.as_list()?[col_idx];
            merged = Some(match merged {
                None => col.clone(),
                Some(acc) => append_i64(heap, &acc, col)?,
            });
        }
        out_columns.push(merged.unwrap());
    }
    Value::table(names.clone(), Value::list(out_columns))
}

fn append_i64(heap: &Arc<Heap>, a: &Value, b: &Value) -> Result<Value> {
    let mut out = a.as_i64_slice()?.to_vec();
    out.extend_from_slice(b.as_i64_slice()?);
    Value::vector_i64(heap, &out)
}

fn run_single(heap: &Arc<Heap>, query: &Query, base: Value) -> Result<Value> {
    let filtered = match &query.filter {
        None => base,
        Some(predicate) => {
            let mask = eval(heap, &base, predicate)?;
            let ids = filter::where_true(&mask)?;
            let ids_i64: Vec<i64> = ids.iter().map(|&i| i as i64).collect();
            let indices = Value::vector_i64(heap, &ids_i64)?;
            filter::materialize_filter(heap, &base, &indices)?
        }
    };

    match &query.by {
        Some(group) => group_and_aggregate(heap, &filtered, group, &query.project),
        None => {
            if query.project.is_empty() {
                Ok(filtered)
            } else {
                let mut names = Vec::new();
                let mut columns = Vec::new();
                for (name, expr) in &query.project {
                    names.push(*name);
                    columns.push(match expr {
                        Expr::Agg(op, inner) => eval_scalar_agg(heap, &filtered, *op, inner)?,
                        other => eval(heap, &filtered, other)?,
                    });
                }
                Value::table(Value::vector_symbol(heap, &names)?, Value::list(columns))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;
    use crate::symbol::intern;

    fn heap() -> Arc<Heap> {
        Heap::new(HeapConfig::default())
    }

    fn sample_table(heap: &Arc<Heap>) -> Value {
        let names = Value::vector_symbol_from_strs(heap, &["grp", "amt"]).unwrap();
        let grp = Value::vector_i64(heap, &[1, 1, 2, 2, 3]).unwrap();
        let amt = Value::vector_i64(heap, &[10, 20, 5, 5, 100]).unwrap();
        Value::table(names, Value::list(vec![grp, amt])).unwrap()
    }

    #[test]
    fn scalar_add_scenario() {
        let h = heap();
        let q = Query {
            from: Expr::Value(Value::null()),
            filter: None,
            by: None,
            project: vec![(intern("sum"), Expr::Apply(HostFn::Add, vec![Expr::Value(Value::atom_i64(1)), Expr::Value(Value::atom_i64(2))]))],
        };
        let out = run(&h, &q).unwrap();
        let (_, cols) = out.as_table().unwrap();
        assert_eq!(cols.as_list().unwrap()[0].as_atom_i64().unwrap(), 3);
    }

    #[test]
    fn count_scenario() {
        let h = heap();
        let table = sample_table(&h);
        let q = Query {
            from: Expr::Value(table),
            filter: None,
            by: None,
            project: vec![(intern("n"), Expr::Agg(AggOp::Count, Box::new(Expr::Column(intern("amt")))))],
        };
        let out = run(&h, &q).unwrap();
        let (_, cols) = out.as_table().unwrap();
        assert_eq!(cols.as_list().unwrap()[0].as_atom_i64().unwrap(), 5);
    }

    #[test]
    fn group_by_sums_per_key() {
        let h = heap();
        let table = sample_table(&h);
        let q = Query {
            from: Expr::Value(table),
            filter: None,
            by: Some(GroupSpec::single(intern("grp"), Expr::Column(intern("grp")))),
            project: vec![(intern("total"), Expr::Agg(AggOp::Sum, Box::new(Expr::Column(intern("amt")))))],
        };
        let out = run(&h, &q).unwrap();
        let (names, cols) = out.as_table().unwrap();
        let cols = cols.as_list().unwrap();
        let keys = cols[0].as_i64_slice().unwrap();
        let totals = cols[1].as_i64_slice().unwrap();
        assert_eq!(names.as_symbol_slice().unwrap().len(), 2);
        assert_eq!(keys, &[1, 2, 3]);
        assert_eq!(totals, &[30, 10, 100]);
    }

    /// Spec §8's worked example: `by: k` where `k` is a SYMBOL vector.
    #[test]
    fn group_by_symbol_key_sums_per_key() {
        let h = heap();
        let names = Value::vector_symbol_from_strs(&h, &["k", "amt"]).unwrap();
        let k = Value::vector_symbol_from_strs(&h, &["a", "a", "b", "b", "c"]).unwrap();
        let amt = Value::vector_i64(&h, &[10, 20, 5, 5, 100]).unwrap();
        let table = Value::table(names, Value::list(vec![k, amt])).unwrap();

        let q = Query {
            from: Expr::Value(table),
            filter: None,
            by: Some(GroupSpec::single(intern("k"), Expr::Column(intern("k")))),
            project: vec![(intern("total"), Expr::Agg(AggOp::Sum, Box::new(Expr::Column(intern("amt")))))],
        };
        let out = run(&h, &q).unwrap();
        let (_, cols) = out.as_table().unwrap();
        let cols = cols.as_list().unwrap();
        let keys = cols[0].as_symbol_slice().unwrap();
        let totals = cols[1].as_i64_slice().unwrap();
        assert_eq!(keys, &[intern("a"), intern("b"), intern("c")]);
        assert_eq!(totals, &[30, 10, 100]);
    }

    /// Spec's own `(sum price)` example: aggregating a float column.
    #[test]
    fn scalar_sum_over_f64_column() {
        let h = heap();
        let names = Value::vector_symbol_from_strs(&h, &["price"]).unwrap();
        let price = Value::vector_f64(&h, &[1.5, 2.5, 3.0]).unwrap();
        let table = Value::table(names, Value::list(vec![price])).unwrap();

        let q = Query {
            from: Expr::Value(table),
            filter: None,
            by: None,
            project: vec![(intern("total"), Expr::Agg(AggOp::Sum, Box::new(Expr::Column(intern("price")))))],
        };
        let out = run(&h, &q).unwrap();
        let (_, cols) = out.as_table().unwrap();
        assert_eq!(cols.as_list().unwrap()[0].as_atom_f64().unwrap(), 7.0);
    }

    /// Composite (K>1) group-by key: two rows only collapse into the same
    /// group when *both* key columns agree.
    #[test]
    fn group_by_composite_key() {
        let h = heap();
        let names = Value::vector_symbol_from_strs(&h, &["region", "grp", "amt"]).unwrap();
        let region = Value::vector_i64(&h, &[1, 1, 1, 2, 2]).unwrap();
        let grp = Value::vector_i64(&h, &[1, 1, 2, 1, 1]).unwrap();
        let amt = Value::vector_i64(&h, &[10, 20, 5, 7, 3]).unwrap();
        let table = Value::table(names, Value::list(vec![region, grp, amt])).unwrap();

        let q = Query {
            from: Expr::Value(table),
            filter: None,
            by: Some(GroupSpec { keys: vec![(intern("region"), Expr::Column(intern("region"))), (intern("grp"), Expr::Column(intern("grp")))] }),
            project: vec![(intern("total"), Expr::Agg(AggOp::Sum, Box::new(Expr::Column(intern("amt")))))],
        };
        let out = run(&h, &q).unwrap();
        let (names, cols) = out.as_table().unwrap();
        let cols = cols.as_list().unwrap();
        assert_eq!(names.as_symbol_slice().unwrap().len(), 3);
        let regions = cols[0].as_i64_slice().unwrap();
        let grps = cols[1].as_i64_slice().unwrap();
        let totals = cols[2].as_i64_slice().unwrap();
        // (region=1, grp=1) sums rows 0,1 -> 30; (region=1, grp=2) is its
        // own group -> 5; (region=2, grp=1) sums rows 3,4 -> 10.
        let mut rows: Vec<(i64, i64, i64)> = regions.iter().zip(grps).zip(totals).map(|((&r, &g), &t)| (r, g, t)).collect();
        rows.sort();
        assert_eq!(rows, vec![(1, 1, 30), (1, 2, 5), (2, 1, 10)]);
    }

    #[test]
    fn filter_keeps_only_matching_rows() {
        let h = heap();
        let table = sample_table(&h);
        let q = Query {
            from: Expr::Value(table),
            filter: Some(Expr::Apply(HostFn::Gt, vec![Expr::Column(intern("amt")), Expr::Value(Value::atom_i64(5))])),
            by: None,
            project: vec![],
        };
        let out = run(&h, &q).unwrap();
        let (_, cols) = out.as_table().unwrap();
        assert_eq!(cols.as_list().unwrap()[1].as_i64_slice().unwrap(), &[10, 20, 100]);
    }

    /// Spec §8 scenario: counting over a 5-partition table of 100 rows each
    /// must return 100 once the `where` clause selects exactly one day.
    #[test]
    fn count_over_a_parted_table_sums_per_partition_matches() {
        let h = heap();
        let date_col = intern("date");
        let amt_col = intern("amt");
        let target_day = 20240101i64;

        let mut parts = Vec::new();
        for day in [20240101, 20240102, 20240103, 20240104, 20240105] {
            let names = Value::vector_symbol_from_strs(&h, &["date", "amt"]).unwrap();
            let dates = Value::vector_i64(&h, &vec![day; 100]).unwrap();
            let amts = Value::vector_i64(&h, &(0..100).collect::<Vec<i64>>()).unwrap();
            parts.push(Value::table(names, Value::list(vec![dates, amts])).unwrap());
        }
        let parted = Value::parted(parts);

        let q = Query {
            from: Expr::Value(parted),
            filter: Some(Expr::Apply(HostFn::Eq, vec![Expr::Column(date_col), Expr::Value(Value::atom_i64(target_day))])),
            by: None,
            project: vec![(intern("n"), Expr::Agg(AggOp::Count, Box::new(Expr::Column(amt_col))))],
        };
        let out = run(&h, &q).unwrap();
        let (_, cols) = out.as_table().unwrap();
        assert_eq!(cols.as_list().unwrap()[0].as_atom_i64().unwrap(), 100);
    }
}
