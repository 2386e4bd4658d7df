//! The tagged value model (spec §3).
//!
//! `Value` is a reference-counted handle onto a closed sum of kinds. Unlike
//! a type-erased `Box<dyn Any>` downcast at fixed points in a typed
//! pipeline, every `Value` here carries its own runtime tag, because
//! Rayfall query trees mix types dynamically at the leaves (a `TABLE`
//! column can be any one of a dozen primitive kinds). Reference counting is
//! delegated to `Arc` -- `clone`/
//! `drop` are exactly `Arc::clone`/`Arc`'s `Drop`, and releasing a
//! composite's children falls out of `Arc<ValueInner>`'s own recursive
//! drop glue, which already satisfies spec §3's "rc = 0 triggers release of
//! any owned children" invariant without hand-rolled bookkeeping.
//!
//! The one place raw memory still matters is a vector of atoms, which must
//! be a genuinely contiguous array for the sort/hash/aggregate paths to be
//! SIMD- and cache-friendly -- that storage is [`column::HeapVec`], carved
//! out of the buddy heap in [`crate::heap`].

pub mod column;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{RayError, Result};
use crate::heap::Heap;
use column::{ColumnElement, HeapVec};

// Vector type tags (spec §3: "an atom type is the negative of its vector
// type"). NULL_OBJ and ERR are sentinels outside the atom/vector pairing.
pub const T_NULL: i8 = 0;
pub const T_B8: i8 = 1;
pub const T_U8: i8 = 2;
pub const T_C8: i8 = 3;
pub const T_I16: i8 = 4;
pub const T_I32: i8 = 5;
pub const T_I64: i8 = 6;
pub const T_F64: i8 = 7;
pub const T_SYMBOL: i8 = 8;
pub const T_DATE: i8 = 9;
pub const T_TIME: i8 = 10;
pub const T_TIMESTAMP: i8 = 11;
pub const T_GUID: i8 = 12;
pub const T_LIST: i8 = 13;
pub const T_DICT: i8 = 14;
pub const T_TABLE: i8 = 15;
pub const T_LAMBDA: i8 = 16;
pub const T_UNARY: i8 = 17;
pub const T_BINARY: i8 = 18;
pub const T_VARY: i8 = 19;
pub const T_MAPFILTER: i8 = 20;
pub const T_MAPGROUP: i8 = 21;
pub const T_MAPCOMMON: i8 = 22;
pub const T_PARTEDI64: i8 = 23;
pub const T_ERR: i8 = 24;

pub fn type_name(tag: i8) -> &'static str {
    match tag.abs() {
        T_NULL => "null",
        T_B8 => "b8",
        T_U8 => "u8",
        T_C8 => "c8",
        T_I16 => "i16",
        T_I32 => "i32",
        T_I64 => "i64",
        T_F64 => "f64",
        T_SYMBOL => "symbol",
        T_DATE => "date",
        T_TIME => "time",
        T_TIMESTAMP => "timestamp",
        T_GUID => "guid",
        T_LIST => "list",
        T_DICT => "dict",
        T_TABLE => "table",
        T_LAMBDA => "lambda",
        T_UNARY => "unary",
        T_BINARY => "binary",
        T_VARY => "vary",
        T_MAPFILTER => "mapfilter",
        T_MAPGROUP => "mapgroup",
        T_MAPCOMMON => "mapcommon",
        T_PARTEDI64 => "partedi64",
        T_ERR => "err",
        _ => "unknown",
    }
}

/// Advisory sortedness/distinctness bits (spec §3: "Attribute bits ... are
/// advisory; reading code may exploit them but must never assume them
/// without checking the bit").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Attrs(pub u8);

impl Attrs {
    pub const ASC: u8 = 0b0000_0001;
    pub const DESC: u8 = 0b0000_0010;
    pub const DISTINCT: u8 = 0b0000_0100;

    pub fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
    pub fn with(self, bit: u8) -> Self {
        Attrs(self.0 | bit)
    }
}

/// Whether a value's payload is heap-owned or an mmap'd, read-only,
/// externally-backed view (spec §6: splayed-table columns are "wrapped as a
/// vector value with an attribute bit indicating it is file-backed").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Owned,
    Borrowed,
}

pub type HostFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

pub enum ColumnData {
    B8(HeapVec<bool>),
    U8(HeapVec<u8>),
    C8(HeapVec<u8>),
    I16(HeapVec<i16>),
    I32(HeapVec<i32>),
    I64(HeapVec<i64>),
    F64(HeapVec<f64>),
    Symbol(HeapVec<u32>),
    Date(HeapVec<i32>),
    Time(HeapVec<i32>),
    Timestamp(HeapVec<i64>),
    Guid(HeapVec<[u8; 16]>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::B8(v) => v.len(),
            ColumnData::U8(v) => v.len(),
            ColumnData::C8(v) => v.len(),
            ColumnData::I16(v) => v.len(),
            ColumnData::I32(v) => v.len(),
            ColumnData::I64(v) => v.len(),
            ColumnData::F64(v) => v.len(),
            ColumnData::Symbol(v) => v.len(),
            ColumnData::Date(v) => v.len(),
            ColumnData::Time(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
            ColumnData::Guid(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tag(&self) -> i8 {
        match self {
            ColumnData::B8(_) => T_B8,
            ColumnData::U8(_) => T_U8,
            ColumnData::C8(_) => T_C8,
            ColumnData::I16(_) => T_I16,
            ColumnData::I32(_) => T_I32,
            ColumnData::I64(_) => T_I64,
            ColumnData::F64(_) => T_F64,
            ColumnData::Symbol(_) => T_SYMBOL,
            ColumnData::Date(_) => T_DATE,
            ColumnData::Time(_) => T_TIME,
            ColumnData::Timestamp(_) => T_TIMESTAMP,
            ColumnData::Guid(_) => T_GUID,
        }
    }

    fn deep_clone(&self) -> Result<ColumnData> {
        Ok(match self {
            ColumnData::B8(v) => ColumnData::B8(v.deep_clone()?),
            ColumnData::U8(v) => ColumnData::U8(v.deep_clone()?),
            ColumnData::C8(v) => ColumnData::C8(v.deep_clone()?),
            ColumnData::I16(v) => ColumnData::I16(v.deep_clone()?),
            ColumnData::I32(v) => ColumnData::I32(v.deep_clone()?),
            ColumnData::I64(v) => ColumnData::I64(v.deep_clone()?),
            ColumnData::F64(v) => ColumnData::F64(v.deep_clone()?),
            ColumnData::Symbol(v) => ColumnData::Symbol(v.deep_clone()?),
            ColumnData::Date(v) => ColumnData::Date(v.deep_clone()?),
            ColumnData::Time(v) => ColumnData::Time(v.deep_clone()?),
            ColumnData::Timestamp(v) => ColumnData::Timestamp(v.deep_clone()?),
            ColumnData::Guid(v) => ColumnData::Guid(v.deep_clone()?),
        })
    }
}

#[derive(Clone, Copy, Debug)]
pub enum Atom {
    B8(bool),
    U8(u8),
    C8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Symbol(u32),
    Date(i32),
    Time(i32),
    Timestamp(i64),
    Guid([u8; 16]),
}

pub enum Body {
    Null,
    Err,
    Atom(Atom),
    Vector(ColumnData),
    List(Vec<Value>),
    Dict { keys: Value, values: Value },
    Table { names: Value, columns: Value },
    Lambda { bytecode: Arc<[u8]>, closure: Vec<Value> },
    Unary(HostFn),
    Binary(HostFn),
    Vary(HostFn),
    MapFilter { base: Value, indices: Value },
    MapGroup { base: Value, group: Value },
    MapCommon { value: Value, partitions: Vec<usize> },
    PartedI64(Vec<Value>),
}

pub struct ValueInner {
    pub tag: i8,
    pub mode: Mode,
    /// Advisory attribute bits, mutable in place: tagging a shared value as
    /// sorted (e.g. after `sort` notices its output happens to be monotone)
    /// must not force a deep copy just to flip a hint bit.
    attrs: AtomicU8,
    pub body: Body,
}

/// A reference-counted handle onto a tagged value.
#[derive(Clone)]
pub struct Value(Arc<ValueInner>);

impl Value {
    fn new(tag: i8, body: Body) -> Value {
        Value(Arc::new(ValueInner { tag, mode: Mode::Owned, attrs: AtomicU8::new(0), body }))
    }

    pub fn tag(&self) -> i8 {
        self.0.tag
    }

    pub fn type_name(&self) -> &'static str {
        type_name(self.0.tag)
    }

    pub fn is_atom(&self) -> bool {
        self.0.tag < 0
    }

    pub fn mode(&self) -> Mode {
        self.0.mode
    }

    pub fn attrs(&self) -> Attrs {
        Attrs(self.0.attrs.load(Ordering::Relaxed))
    }

    /// Set an advisory attribute bit on the shared value in place (every
    /// clone observes the update -- these bits are hints, never load-bearing
    /// for correctness per spec §3).
    pub fn set_attr(&self, bit: u8) {
        self.0.attrs.fetch_or(bit, Ordering::Relaxed);
    }

    pub fn clear_attrs(&self) {
        self.0.attrs.store(0, Ordering::Relaxed);
    }

    /// Live reference count, delegated to `Arc::strong_count` (spec §3:
    /// "rc >= 1 for every live value").
    pub fn rc(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether `self` and `other` are the same allocation -- used to locate
    /// a join key column's position within its own table's column list by
    /// identity rather than by comparing contents.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn body(&self) -> &Body {
        &self.0.body
    }

    pub fn len(&self) -> u64 {
        match &self.0.body {
            Body::Null | Body::Err | Body::Atom(_) | Body::Lambda { .. } | Body::Unary(_) | Body::Binary(_) | Body::Vary(_) => 1,
            Body::Vector(c) => c.len() as u64,
            Body::List(items) => items.len() as u64,
            Body::Dict { keys, .. } => keys.len(),
            Body::Table { columns, .. } => match columns.body() {
                Body::List(cols) => cols.first().map(|c| c.len()).unwrap_or(0),
                _ => 0,
            },
            Body::MapFilter { indices, .. } => indices.len(),
            Body::MapGroup { base, .. } => base.len(),
            Body::MapCommon { partitions, .. } => partitions.iter().sum::<usize>() as u64,
            Body::PartedI64(parts) => parts.iter().map(|p| p.len()).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ---- sentinels ----

    pub fn null() -> Value {
        Value::new(T_NULL, Body::Null)
    }

    pub fn err() -> Value {
        Value::new(T_ERR, Body::Err)
    }

    // ---- atoms ----

    pub fn atom_i64(v: i64) -> Value {
        Value::new(-T_I64, Body::Atom(Atom::I64(v)))
    }
    pub fn atom_i32(v: i32) -> Value {
        Value::new(-T_I32, Body::Atom(Atom::I32(v)))
    }
    pub fn atom_i16(v: i16) -> Value {
        Value::new(-T_I16, Body::Atom(Atom::I16(v)))
    }
    pub fn atom_f64(v: f64) -> Value {
        Value::new(-T_F64, Body::Atom(Atom::F64(v)))
    }
    pub fn atom_b8(v: bool) -> Value {
        Value::new(-T_B8, Body::Atom(Atom::B8(v)))
    }
    pub fn atom_u8(v: u8) -> Value {
        Value::new(-T_U8, Body::Atom(Atom::U8(v)))
    }
    pub fn atom_symbol(id: u32) -> Value {
        Value::new(-T_SYMBOL, Body::Atom(Atom::Symbol(id)))
    }

    /// Intern `s` into the process-global symbol table and wrap the
    /// resulting id as a `SYMBOL` atom.
    pub fn symbol(s: &str) -> Value {
        Value::atom_symbol(crate::symbol::intern(s))
    }

    pub fn as_atom_i64(&self) -> Result<i64> {
        match &self.0.body {
            Body::Atom(Atom::I64(v)) => Ok(*v),
            _ => Err(type_error("i64", self, 0)),
        }
    }

    pub fn as_atom_f64(&self) -> Result<f64> {
        match &self.0.body {
            Body::Atom(Atom::F64(v)) => Ok(*v),
            _ => Err(type_error("f64", self, 0)),
        }
    }

    // ---- vectors ----

    pub fn vector_i64(heap: &Arc<Heap>, data: &[i64]) -> Result<Value> {
        Ok(Value::new(T_I64, Body::Vector(ColumnData::I64(HeapVec::from_slice(heap, data)?))))
    }
    pub fn vector_i32(heap: &Arc<Heap>, data: &[i32]) -> Result<Value> {
        Ok(Value::new(T_I32, Body::Vector(ColumnData::I32(HeapVec::from_slice(heap, data)?))))
    }
    pub fn vector_i16(heap: &Arc<Heap>, data: &[i16]) -> Result<Value> {
        Ok(Value::new(T_I16, Body::Vector(ColumnData::I16(HeapVec::from_slice(heap, data)?))))
    }
    pub fn vector_f64(heap: &Arc<Heap>, data: &[f64]) -> Result<Value> {
        Ok(Value::new(T_F64, Body::Vector(ColumnData::F64(HeapVec::from_slice(heap, data)?))))
    }
    pub fn vector_b8(heap: &Arc<Heap>, data: &[bool]) -> Result<Value> {
        Ok(Value::new(T_B8, Body::Vector(ColumnData::B8(HeapVec::from_slice(heap, data)?))))
    }
    pub fn vector_u8(heap: &Arc<Heap>, data: &[u8]) -> Result<Value> {
        Ok(Value::new(T_U8, Body::Vector(ColumnData::U8(HeapVec::from_slice(heap, data)?))))
    }
    pub fn vector_symbol(heap: &Arc<Heap>, ids: &[u32]) -> Result<Value> {
        Ok(Value::new(T_SYMBOL, Body::Vector(ColumnData::Symbol(HeapVec::from_slice(heap, ids)?))))
    }

    pub fn vector_symbol_from_strs(heap: &Arc<Heap>, names: &[&str]) -> Result<Value> {
        let ids: Vec<u32> = names.iter().map(|s| crate::symbol::intern(s)).collect();
        Value::vector_symbol(heap, &ids)
    }

    pub fn new_c8_vector(heap: &Arc<Heap>, data: &[u8]) -> Result<Value> {
        Ok(Value::new(T_C8, Body::Vector(ColumnData::C8(HeapVec::from_slice(heap, data)?))))
    }
    pub fn new_date_vector(heap: &Arc<Heap>, data: &[i32]) -> Result<Value> {
        Ok(Value::new(T_DATE, Body::Vector(ColumnData::Date(HeapVec::from_slice(heap, data)?))))
    }
    pub fn new_time_vector(heap: &Arc<Heap>, data: &[i32]) -> Result<Value> {
        Ok(Value::new(T_TIME, Body::Vector(ColumnData::Time(HeapVec::from_slice(heap, data)?))))
    }
    pub fn new_timestamp_vector(heap: &Arc<Heap>, data: &[i64]) -> Result<Value> {
        Ok(Value::new(T_TIMESTAMP, Body::Vector(ColumnData::Timestamp(HeapVec::from_slice(heap, data)?))))
    }
    pub fn new_guid_vector(heap: &Arc<Heap>, data: &[[u8; 16]]) -> Result<Value> {
        Ok(Value::new(T_GUID, Body::Vector(ColumnData::Guid(HeapVec::from_slice(heap, data)?))))
    }

    pub fn as_i64_slice(&self) -> Result<&[i64]> {
        match &self.0.body {
            Body::Vector(ColumnData::I64(v)) => Ok(v.as_slice()),
            _ => Err(type_error("i64 vector", self, 0)),
        }
    }
    pub fn as_i32_slice(&self) -> Result<&[i32]> {
        match &self.0.body {
            Body::Vector(ColumnData::I32(v)) => Ok(v.as_slice()),
            _ => Err(type_error("i32 vector", self, 0)),
        }
    }
    pub fn as_f64_slice(&self) -> Result<&[f64]> {
        match &self.0.body {
            Body::Vector(ColumnData::F64(v)) => Ok(v.as_slice()),
            _ => Err(type_error("f64 vector", self, 0)),
        }
    }
    pub fn as_symbol_slice(&self) -> Result<&[u32]> {
        match &self.0.body {
            Body::Vector(ColumnData::Symbol(v)) => Ok(v.as_slice()),
            _ => Err(type_error("symbol vector", self, 0)),
        }
    }
    pub fn as_b8_slice(&self) -> Result<&[bool]> {
        match &self.0.body {
            Body::Vector(ColumnData::B8(v)) => Ok(v.as_slice()),
            _ => Err(type_error("b8 vector", self, 0)),
        }
    }

    // ---- composites ----

    pub fn list(items: Vec<Value>) -> Value {
        Value::new(T_LIST, Body::List(items))
    }

    pub fn as_list(&self) -> Result<&[Value]> {
        match &self.0.body {
            Body::List(items) => Ok(items),
            _ => Err(type_error("list", self, 0)),
        }
    }

    /// Build a DICT, validating the parallel-length invariant (spec §3).
    pub fn dict(keys: Value, values: Value) -> Result<Value> {
        if keys.len() != values.len() {
            return Err(RayError::Length { need: keys.len(), have: values.len(), positions: vec![] });
        }
        Ok(Value::new(T_DICT, Body::Dict { keys, values }))
    }

    pub fn as_dict(&self) -> Result<(&Value, &Value)> {
        match &self.0.body {
            Body::Dict { keys, values } => Ok((keys, values)),
            _ => Err(type_error("dict", self, 0)),
        }
    }

    /// Build a TABLE, validating spec §3's invariant: `names` is a SYMBOL
    /// vector of length C, `columns` is a LIST of length C, and every
    /// column has equal length R.
    pub fn table(names: Value, columns: Value) -> Result<Value> {
        let name_ids = names.as_symbol_slice()?;
        let cols = columns.as_list()?;
        if name_ids.len() != cols.len() {
            return Err(RayError::Length { need: name_ids.len() as u64, have: cols.len() as u64, positions: vec![] });
        }
        if let Some(first) = cols.first() {
            let r = first.len();
            for (i, c) in cols.iter().enumerate() {
                if c.len() != r {
                    return Err(RayError::Length { need: r, have: c.len(), positions: vec![i as u64] });
                }
            }
        }
        Ok(Value::new(T_TABLE, Body::Table { names, columns }))
    }

    pub fn as_table(&self) -> Result<(&Value, &Value)> {
        match &self.0.body {
            Body::Table { names, columns } => Ok((names, columns)),
            _ => Err(type_error("table", self, 0)),
        }
    }

    pub fn row_count(&self) -> Result<u64> {
        let (_, columns) = self.as_table()?;
        Ok(columns.as_list()?.first().map(|c| c.len()).unwrap_or(0))
    }

    pub fn column(&self, name_id: u32) -> Result<Value> {
        let (names, columns) = self.as_table()?;
        let ids = names.as_symbol_slice()?;
        let cols = columns.as_list()?;
        ids.iter()
            .position(|&id| id == name_id)
            .map(|i| cols[i].clone())
            .ok_or(RayError::Value(name_id))
    }

    // ---- deferred-materialisation intermediates (spec §4.5, §4.6) ----

    pub fn map_filter(base: Value, indices: Value) -> Value {
        Value::new(T_MAPFILTER, Body::MapFilter { base, indices })
    }

    pub fn map_group(base: Value, group: Value) -> Value {
        Value::new(T_MAPGROUP, Body::MapGroup { base, group })
    }

    pub fn map_common(value: Value, partitions: Vec<usize>) -> Value {
        Value::new(T_MAPCOMMON, Body::MapCommon { value, partitions })
    }

    /// A parted table: an ordered list of same-schema partition tables
    /// (spec §3/§6, one `Value::table` per on-disk date partition).
    pub fn parted(parts: Vec<Value>) -> Value {
        Value::new(T_PARTEDI64, Body::PartedI64(parts))
    }

    pub fn as_parted(&self) -> Result<&[Value]> {
        match &self.0.body {
            Body::PartedI64(parts) => Ok(parts),
            _ => Err(RayError::Type { expected: "PARTED", actual: type_name(self.tag()), arg: 0, field: None }),
        }
    }

    /// Deep copy if shared, identity if uniquely owned (spec §3 `cow`).
    ///
    /// List/Dict/Table copies are shallow at the top: a fresh container is
    /// allocated but child `Value`s are shared (their own `cow` runs lazily
    /// when something actually mutates through them).
    pub fn cow(&self) -> Result<Value> {
        if self.rc() == 1 {
            return Ok(self.clone());
        }
        let body = match &self.0.body {
            Body::Null => Body::Null,
            Body::Err => Body::Err,
            Body::Atom(a) => Body::Atom(*a),
            Body::Vector(c) => Body::Vector(c.deep_clone()?),
            Body::List(items) => Body::List(items.clone()),
            Body::Dict { keys, values } => Body::Dict { keys: keys.clone(), values: values.clone() },
            Body::Table { names, columns } => Body::Table { names: names.clone(), columns: columns.clone() },
            Body::Lambda { bytecode, closure } => Body::Lambda { bytecode: bytecode.clone(), closure: closure.clone() },
            Body::Unary(f) => Body::Unary(f.clone()),
            Body::Binary(f) => Body::Binary(f.clone()),
            Body::Vary(f) => Body::Vary(f.clone()),
            Body::MapFilter { base, indices } => Body::MapFilter { base: base.clone(), indices: indices.clone() },
            Body::MapGroup { base, group } => Body::MapGroup { base: base.clone(), group: group.clone() },
            Body::MapCommon { value, partitions } => Body::MapCommon { value: value.clone(), partitions: partitions.clone() },
            Body::PartedI64(parts) => Body::PartedI64(parts.clone()),
        };
        Ok(Value(Arc::new(ValueInner {
            tag: self.0.tag,
            mode: self.0.mode,
            attrs: AtomicU8::new(self.0.attrs.load(Ordering::Relaxed)),
            body,
        })))
    }
}

fn type_error(expected: &'static str, actual: &Value, arg: u32) -> RayError {
    RayError::Type { expected, actual: actual.type_name(), arg, field: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Heap, HeapConfig};

    fn heap() -> Arc<Heap> {
        Heap::new(HeapConfig::default())
    }

    #[test]
    fn atom_rc_lifecycle() {
        let v = Value::atom_i64(42);
        assert_eq!(v.rc(), 1);
        let v2 = v.clone();
        assert_eq!(v.rc(), 2);
        drop(v2);
        assert_eq!(v.rc(), 1);
    }

    #[test]
    fn vector_round_trip() {
        let h = heap();
        let v = Value::vector_i64(&h, &[1, 2, 3]).unwrap();
        assert_eq!(v.as_i64_slice().unwrap(), &[1, 2, 3]);
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn cow_is_identity_when_unique() {
        let h = heap();
        let v = Value::vector_i64(&h, &[1, 2, 3]).unwrap();
        let v2 = v.cow().unwrap();
        assert_eq!(v2.as_i64_slice().unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn cow_deep_copies_when_shared() {
        let h = heap();
        let v = Value::vector_i64(&h, &[1, 2, 3]).unwrap();
        let shared = v.clone();
        assert_eq!(shared.rc(), 2);
        let owned = v.cow().unwrap();
        assert_eq!(owned.as_i64_slice().unwrap(), v.as_i64_slice().unwrap());
    }

    #[test]
    fn table_rejects_mismatched_column_lengths() {
        let h = heap();
        let names = Value::vector_symbol(&h, &[0, 1]).unwrap();
        let a = Value::vector_i64(&h, &[1, 2, 3]).unwrap();
        let b = Value::vector_i64(&h, &[1, 2]).unwrap();
        let cols = Value::list(vec![a, b]);
        assert!(Value::table(names, cols).is_err());
    }

    #[test]
    fn dict_rejects_mismatched_lengths() {
        let h = heap();
        let keys = Value::vector_i64(&h, &[1, 2]).unwrap();
        let values = Value::vector_i64(&h, &[1]).unwrap();
        assert!(Value::dict(keys, values).is_err());
    }
}
