//! Contiguous heap-backed storage for vectors of atoms (spec §3: "A vector
//! of atoms of type T is stored as a contiguous array").
//!
//! [`HeapVec<T>`] is the direct consumer of the [`crate::heap`] allocator:
//! every vector-typed `Value` owns one `HeapVec`, carved out of the buddy
//! heap rather than the global Rust allocator. Composite values (list/
//! dict/table) are ordinary `Vec<Value>` -- their "payload" is a sequence of
//! independently refcounted handles, not raw bytes, so there is nothing for
//! the buddy heap to usefully carve there.

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{RayError, Result};
use crate::heap::Heap;

/// Marker for the fixed-width primitive element types a column can hold.
/// Implementors must be safely bit-copyable (`Copy`) -- `ColumnElement`
/// values never contain pointers or Drop glue, matching the "inline
/// payload" contract of spec §3.
pub trait ColumnElement: Copy + PartialOrd + 'static {
    /// Name used in type errors (spec §7 `RayError::Type`).
    const NAME: &'static str;
    /// The per-type null sentinel, when one exists (spec §3: "Per-type null
    /// sentinels exist for numerics").
    const NULL: Option<Self> = None;
    fn is_null(&self) -> bool {
        false
    }
}

macro_rules! impl_column_element {
    ($ty:ty, $name:literal) => {
        impl ColumnElement for $ty {
            const NAME: &'static str = $name;
        }
    };
    ($ty:ty, $name:literal, null = $null:expr) => {
        impl ColumnElement for $ty {
            const NAME: &'static str = $name;
            const NULL: Option<Self> = Some($null);
            fn is_null(&self) -> bool {
                *self == $null
            }
        }
    };
}

impl_column_element!(bool, "b8");
impl_column_element!(u8, "u8", null = u8::MAX);
impl_column_element!(i16, "i16", null = i16::MIN);
impl_column_element!(i32, "i32", null = i32::MIN);
impl_column_element!(i64, "i64", null = i64::MIN);
impl_column_element!(f64, "f64", null = f64::NAN);
impl_column_element!(u32, "symbol"); // interned string id
impl_column_element!([u8; 16], "guid");

/// A heap-allocated, fixed-width, contiguous array of `T`.
pub struct HeapVec<T: ColumnElement> {
    heap: Arc<Heap>,
    ptr: NonNull<u8>,
    len: usize,
    _marker: PhantomData<T>,
}

// SAFETY: the buffer is exclusively owned by this `HeapVec`; `T: Copy` rules
// out any aliasing through Drop glue. Cross-thread use requires `T: Send`.
unsafe impl<T: ColumnElement + Send> Send for HeapVec<T> {}
unsafe impl<T: ColumnElement + Sync> Sync for HeapVec<T> {}

impl<T: ColumnElement> HeapVec<T> {
    pub fn from_slice(heap: &Arc<Heap>, data: &[T]) -> Result<Self> {
        let bytes = std::mem::size_of_val(data);
        let ptr = heap.alloc(bytes).ok_or(RayError::Limit(bytes as u64))?;
        if !data.is_empty() {
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr() as *const u8, ptr.as_ptr(), bytes);
            }
        }
        Ok(HeapVec { heap: heap.clone(), ptr, len: data.len(), _marker: PhantomData })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[T] {
        if self.len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const T, self.len) }
    }

    /// Deep copy, used by [`crate::value::Value::cow`] when `rc > 1`.
    pub fn deep_clone(&self) -> Result<Self> {
        Self::from_slice(&self.heap, self.as_slice())
    }

    pub fn null_count(&self) -> usize {
        self.as_slice().iter().filter(|v| v.is_null()).count()
    }
}

impl<T: ColumnElement> Drop for HeapVec<T> {
    fn drop(&mut self) {
        self.heap.free(self.ptr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    #[test]
    fn round_trips_contents() {
        let heap = Heap::new(HeapConfig::default());
        let data = [1i64, 2, 3, i64::MIN, 5];
        let v = HeapVec::from_slice(&heap, &data).unwrap();
        assert_eq!(v.as_slice(), &data);
        assert_eq!(v.null_count(), 1);
    }

    #[test]
    fn deep_clone_is_independent() {
        let heap = Heap::new(HeapConfig::default());
        let v = HeapVec::from_slice(&heap, &[1.0f64, 2.0, 3.0]).unwrap();
        let cloned = v.deep_clone().unwrap();
        assert_eq!(v.as_slice(), cloned.as_slice());
    }
}
