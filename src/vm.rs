//! Thread-local execution context (spec §5: "the current heap is a
//! thread-local", and the per-thread last-error record of spec §7).
//!
//! Every OS thread that executes query/value-model code -- the caller
//! thread and every worker spun up by [`crate::pool`] -- has its own
//! `VmContext`: its own heap handle and its own stack of name-binding
//! frames that `ray_amend` (SPEC_FULL.md §9 open question 2) consults to
//! decide whether a binding is uniquely owned.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RayError, Result, SymbolId};
use crate::heap::Heap;
use crate::value::Value;

#[derive(Default)]
struct Frame {
    bindings: HashMap<SymbolId, Value>,
}

struct VmContext {
    heap: Arc<Heap>,
    frames: Vec<Frame>,
}

impl VmContext {
    fn new(heap: Arc<Heap>) -> Self {
        VmContext { heap, frames: vec![Frame::default()] }
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<VmContext>> = const { RefCell::new(None) };
}

fn not_initialized() -> RayError {
    RayError::User("vm context not initialized on this thread".to_string())
}

/// Install a heap as this thread's current heap. Called once on the main
/// thread at startup and once per worker when [`crate::pool::Pool`] spins
/// workers up.
pub fn init(heap: Arc<Heap>) {
    CONTEXT.with(|c| *c.borrow_mut() = Some(VmContext::new(heap)));
}

pub fn is_initialized() -> bool {
    CONTEXT.with(|c| c.borrow().is_some())
}

pub fn current_heap() -> Result<Arc<Heap>> {
    CONTEXT.with(|c| c.borrow().as_ref().map(|ctx| ctx.heap.clone()).ok_or_else(not_initialized))
}

pub fn push_frame() -> Result<()> {
    CONTEXT.with(|c| {
        let mut c = c.borrow_mut();
        let ctx = c.as_mut().ok_or_else(not_initialized)?;
        ctx.frames.push(Frame::default());
        Ok(())
    })
}

pub fn pop_frame() -> Result<()> {
    CONTEXT.with(|c| {
        let mut c = c.borrow_mut();
        let ctx = c.as_mut().ok_or_else(not_initialized)?;
        if ctx.frames.len() > 1 {
            ctx.frames.pop();
        }
        Ok(())
    })
}

pub fn bind(name: SymbolId, value: Value) -> Result<()> {
    CONTEXT.with(|c| {
        let mut c = c.borrow_mut();
        let ctx = c.as_mut().ok_or_else(not_initialized)?;
        ctx.frames.last_mut().expect("frame stack is never empty").bindings.insert(name, value);
        Ok(())
    })
}

pub fn lookup(name: SymbolId) -> Result<Option<Value>> {
    CONTEXT.with(|c| {
        let c = c.borrow();
        let ctx = c.as_ref().ok_or_else(not_initialized)?;
        for frame in ctx.frames.iter().rev() {
            if let Some(v) = frame.bindings.get(&name) {
                return Ok(Some(v.clone()));
            }
        }
        Ok(None)
    })
}

/// Remove `name` from whichever frame currently binds it, handing the sole
/// local copy to the caller. Used by `amend` so the uniqueness check below
/// isn't thrown off by the binding slot's own strong reference.
fn take(name: SymbolId) -> Result<Option<Value>> {
    CONTEXT.with(|c| {
        let mut c = c.borrow_mut();
        let ctx = c.as_mut().ok_or_else(not_initialized)?;
        for frame in ctx.frames.iter_mut().rev() {
            if let Some(v) = frame.bindings.remove(&name) {
                return Ok(Some(v));
            }
        }
        Ok(None)
    })
}

/// Count of live query-context slots referencing `name` across every frame
/// on this thread, used by `ray_amend` to decide whether a rebind is safe
/// without a copy (SPEC_FULL.md §9 open question 2: aliasing is resolved by
/// requiring `rc == 1` *and* no other frame slot pointing at the value).
pub fn binding_alias_count(name: SymbolId) -> Result<usize> {
    CONTEXT.with(|c| {
        let c = c.borrow();
        let ctx = c.as_ref().ok_or_else(not_initialized)?;
        Ok(ctx.frames.iter().filter(|f| f.bindings.contains_key(&name)).count())
    })
}

/// `ray_amend`: rebind `name` to `f(current value)`, taking a `cow` copy
/// first if the binding isn't uniquely owned (SPEC_FULL.md §9 open
/// question 2). Pulling the binding out of its frame before checking `rc`
/// means the frame's own strong reference doesn't masquerade as an alias.
pub fn amend(name: SymbolId, f: impl FnOnce(Value) -> Result<Value>) -> Result<()> {
    let current = take(name)?.ok_or(RayError::Value(name))?;
    let base = if current.rc() == 1 { current } else { current.cow()? };
    let updated = f(base)?;
    bind(name, updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    fn setup() {
        init(Heap::new(HeapConfig::default()));
    }

    #[test]
    fn bind_and_lookup_round_trip() {
        setup();
        let name = crate::symbol::intern("vm-test-x");
        bind(name, Value::atom_i64(7)).unwrap();
        assert_eq!(lookup(name).unwrap().unwrap().as_atom_i64().unwrap(), 7);
    }

    #[test]
    fn frames_shadow_outer_bindings() {
        setup();
        let name = crate::symbol::intern("vm-test-shadow");
        bind(name, Value::atom_i64(1)).unwrap();
        push_frame().unwrap();
        bind(name, Value::atom_i64(2)).unwrap();
        assert_eq!(lookup(name).unwrap().unwrap().as_atom_i64().unwrap(), 2);
        pop_frame().unwrap();
        assert_eq!(lookup(name).unwrap().unwrap().as_atom_i64().unwrap(), 1);
    }

    #[test]
    fn amend_mutates_in_place_when_unique() {
        setup();
        let name = crate::symbol::intern("vm-test-amend-unique");
        bind(name, Value::atom_i64(10)).unwrap();
        amend(name, |v| Ok(Value::atom_i64(v.as_atom_i64().unwrap() + 1))).unwrap();
        assert_eq!(lookup(name).unwrap().unwrap().as_atom_i64().unwrap(), 11);
    }

    #[test]
    fn uninitialized_thread_reports_error() {
        std::thread::spawn(|| {
            assert!(current_heap().is_err());
        })
        .join()
        .unwrap();
    }
}
