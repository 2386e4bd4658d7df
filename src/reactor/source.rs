//! Reading persisted splayed/parted tables (spec §6: "consumed, not produced,
//! by the core"). A splayed table is a directory of column files, each file
//! a single leading type-tag byte followed by the column's raw payload with
//! no length prefix -- the file's own size determines the element count. A
//! parted table is a directory of date-named partition directories, each a
//! splayed table sharing one schema.
//!
//! Column names come from the column filenames themselves (sorted, for a
//! deterministic table column order); partitions are read in directory-name
//! (lexicographic, hence date) order and combined into a [`Value::parted`].

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use memmap2::Mmap;

use crate::heap::Heap;
use crate::symbol;
use crate::value::{self, Value};

fn column_files(dir: &Path) -> Result<Vec<(String, std::path::PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading splayed directory {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            let name = entry.file_name().to_string_lossy().into_owned();
            out.push((name, entry.path()));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Memory-map one column file and decode it into a heap-owned vector
/// `Value`. The mapping itself is dropped once the payload has been copied
/// into heap storage -- the buddy heap's `ColumnData` has no borrowed-mmap
/// variant, so "file-backed" here means "read via mmap", not "aliases the
/// file for its lifetime" (a scope decision recorded in `DESIGN.md`).
fn read_column(heap: &Arc<Heap>, path: &Path) -> Result<Value> {
    let file = fs::File::open(path).with_context(|| format!("opening column file {}", path.display()))?;
    let mapping = unsafe { Mmap::map(&file) }.with_context(|| format!("mapping column file {}", path.display()))?;
    if mapping.is_empty() {
        bail!("column file {} is empty, missing its type-tag byte", path.display());
    }
    let tag = mapping[0] as i8;
    let payload = &mapping[1..];
    decode_payload(heap, tag, payload).with_context(|| format!("decoding column file {}", path.display()))
}

fn decode_payload(heap: &Arc<Heap>, tag: i8, payload: &[u8]) -> Result<Value> {
    macro_rules! elems {
        ($size:expr, $parse:expr) => {{
            if payload.len() % $size != 0 {
                bail!("payload length {} not a multiple of element size {}", payload.len(), $size);
            }
            payload.chunks_exact($size).map($parse).collect::<Vec<_>>()
        }};
    }
    Ok(match tag {
        value::T_B8 => Value::vector_b8(heap, &elems!(1, |c: &[u8]| c[0] != 0))?,
        value::T_U8 => Value::vector_u8(heap, &elems!(1, |c: &[u8]| c[0]))?,
        value::T_I16 => Value::vector_i16(heap, &elems!(2, |c: &[u8]| i16::from_le_bytes(c.try_into().unwrap())))?,
        value::T_I32 => Value::vector_i32(heap, &elems!(4, |c: &[u8]| i32::from_le_bytes(c.try_into().unwrap())))?,
        value::T_I64 => Value::vector_i64(heap, &elems!(8, |c: &[u8]| i64::from_le_bytes(c.try_into().unwrap())))?,
        value::T_F64 => Value::vector_f64(heap, &elems!(8, |c: &[u8]| f64::from_le_bytes(c.try_into().unwrap())))?,
        value::T_SYMBOL => Value::vector_symbol(heap, &elems!(4, |c: &[u8]| u32::from_le_bytes(c.try_into().unwrap())))?,
        value::T_DATE => Value::new_date_vector(heap, &elems!(4, |c: &[u8]| i32::from_le_bytes(c.try_into().unwrap())))?,
        value::T_TIME => Value::new_time_vector(heap, &elems!(4, |c: &[u8]| i32::from_le_bytes(c.try_into().unwrap())))?,
        value::T_TIMESTAMP => Value::new_timestamp_vector(heap, &elems!(8, |c: &[u8]| i64::from_le_bytes(c.try_into().unwrap())))?,
        value::T_GUID => Value::new_guid_vector(heap, &elems!(16, |c: &[u8]| c.try_into().unwrap()))?,
        other => bail!("unsupported splayed column tag {other}"),
    })
}

fn stem(filename: &str) -> &str {
    filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename)
}

/// Read a single splayed-table directory into a `TABLE` value.
pub fn open_splayed(heap: &Arc<Heap>, dir: &Path) -> Result<Value> {
    let files = column_files(dir)?;
    if files.is_empty() {
        bail!("splayed directory {} has no column files", dir.display());
    }
    let mut names = Vec::with_capacity(files.len());
    let mut columns = Vec::with_capacity(files.len());
    for (filename, path) in &files {
        names.push(symbol::intern(stem(filename)));
        columns.push(read_column(heap, path)?);
    }
    Value::vector_symbol(heap, &names)
        .and_then(|n| Value::table(n, Value::list(columns)))
        .map_err(anyhow::Error::from)
}

/// Read a parted-table directory (one splayed-table subdirectory per date
/// partition, visited in lexicographic/date order) into a `PARTED` value.
pub fn open_parted(heap: &Arc<Heap>, dir: &Path) -> Result<Value> {
    let mut partitions: Vec<std::path::PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("reading parted directory {}", dir.display()))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    partitions.sort();
    if partitions.is_empty() {
        bail!("parted directory {} has no partitions", dir.display());
    }
    let parts: Result<Vec<Value>> = partitions.iter().map(|p| open_splayed(heap, p)).collect();
    Ok(Value::parted(parts?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;
    use std::io::Write;

    fn heap() -> Arc<Heap> {
        Heap::new(HeapConfig::default())
    }

    fn write_column(dir: &Path, name: &str, tag: i8, payload: &[u8]) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(&[tag as u8]).unwrap();
        f.write_all(payload).unwrap();
    }

    #[test]
    fn reads_a_splayed_table_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let mut amt_bytes = Vec::new();
        for v in [10i64, 20, 30] {
            amt_bytes.extend_from_slice(&v.to_le_bytes());
        }
        write_column(tmp.path(), "amt", value::T_I64, &amt_bytes);

        let h = heap();
        let table = open_splayed(&h, tmp.path()).unwrap();
        let (names, cols) = table.as_table().unwrap();
        assert_eq!(names.as_symbol_slice().unwrap().len(), 1);
        assert_eq!(cols.as_list().unwrap()[0].as_i64_slice().unwrap(), &[10, 20, 30]);
    }

    #[test]
    fn reads_a_parted_table_across_date_partitions() {
        let tmp = tempfile::tempdir().unwrap();
        for (day, values) in [("2024-01-01", [1i64, 2]), ("2024-01-02", [3, 4])] {
            let part_dir = tmp.path().join(day);
            fs::create_dir(&part_dir).unwrap();
            let mut bytes = Vec::new();
            for v in values {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            write_column(&part_dir, "x", value::T_I64, &bytes);
        }

        let h = heap();
        let parted = open_parted(&h, tmp.path()).unwrap();
        let parts = parted.as_parted().unwrap();
        assert_eq!(parts.len(), 2);
        let (_, cols0) = parts[0].as_table().unwrap();
        assert_eq!(cols0.as_list().unwrap()[0].as_i64_slice().unwrap(), &[1, 2]);
    }
}
