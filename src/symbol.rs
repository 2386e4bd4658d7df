//! Process-global symbol interner (spec §4.3 `ht_bk`, consumed by `SYMBOL`
//! atoms/vectors across the value model).
//!
//! Every `SYMBOL` column stores a `u32` id rather than a string so that
//! equality, hashing, and grouping on symbols never touch string memory.
//! The interner is the one place that id is translated back to text --
//! at query-result formatting time and at the IPC/serialization boundary.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::{RayError, Result};

struct InternerState {
    ids: HashMap<Arc<str>, u32>,
    names: Vec<Arc<str>>,
}

/// A lock-guarded chained string table. The read/write split follows the
/// same `parking_lot::RwLock` idiom used for the heap's process registry
/// (`crate::heap`), since symbol lookups vastly outnumber inserts once a
/// workload's vocabulary is warm.
pub struct Interner {
    state: RwLock<InternerState>,
}

impl Interner {
    fn new() -> Self {
        Interner { state: RwLock::new(InternerState { ids: HashMap::new(), names: Vec::new() }) }
    }

    pub fn intern(&self, s: &str) -> u32 {
        if let Some(id) = self.state.read().ids.get(s) {
            return *id;
        }
        let mut state = self.state.write();
        // Re-check: another writer may have interned `s` while we waited for
        // the write lock.
        if let Some(id) = state.ids.get(s) {
            return *id;
        }
        let id = state.names.len() as u32;
        let name: Arc<str> = Arc::from(s);
        state.names.push(name.clone());
        state.ids.insert(name, id);
        id
    }

    pub fn resolve(&self, id: u32) -> Result<Arc<str>> {
        self.state
            .read()
            .names
            .get(id as usize)
            .cloned()
            .ok_or(RayError::Value(id))
    }

    pub fn len(&self) -> usize {
        self.state.read().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static INTERNER: OnceLock<Interner> = OnceLock::new();

pub fn interner() -> &'static Interner {
    INTERNER.get_or_init(Interner::new)
}

pub fn intern(s: &str) -> u32 {
    interner().intern(s)
}

pub fn resolve(id: u32) -> Result<Arc<str>> {
    interner().resolve(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_string_twice_returns_same_id() {
        let interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("foo");
        assert_eq!(a, b);
        let c = interner.intern("bar");
        assert_ne!(a, c);
    }

    #[test]
    fn resolve_round_trips() {
        let interner = Interner::new();
        let id = interner.intern("quux");
        assert_eq!(&*interner.resolve(id).unwrap(), "quux");
    }

    #[test]
    fn resolve_unknown_id_errors() {
        let interner = Interner::new();
        assert!(interner.resolve(9999).is_err());
    }

    #[test]
    fn global_interner_is_shared() {
        let a = intern("shared-global-symbol-test");
        let b = intern("shared-global-symbol-test");
        assert_eq!(a, b);
        assert_eq!(&*resolve(a).unwrap(), "shared-global-symbol-test");
    }
}
