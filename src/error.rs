//! The ERR value model (spec §7).
//!
//! Every fallible entry point in the crate returns `Result<T, RayError>`.
//! `RayError` is a concrete, matchable enum -- callers branch on variant by
//! `kind` -- rather than `anyhow::Error`, which is reserved for the
//! reactor/IPC boundary where failures are OS-flavored and not meant to be
//! pattern-matched by query code.
//!
//! The VM keeps a single shared "last error" per thread: [`take_last_error`]
//! drains it, and [`set_last_error`] is called by any code path that wants
//! the reactor to be able to recover the most recent failure after a call
//! returns `Err`.

use std::cell::RefCell;
use thiserror::Error;

/// Crate-wide result alias for value-model operations.
pub type Result<T> = std::result::Result<T, RayError>;

/// A symbol id, used by [`RayError::Value`] to name an offending symbol
/// without pulling the string back out of the interner on the error path.
pub type SymbolId = u32;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RayError {
    #[error("type error: expected {expected}, got {actual} (arg {arg}, field {field:?})")]
    Type {
        expected: &'static str,
        actual: &'static str,
        arg: u32,
        field: Option<&'static str>,
    },

    #[error("arity error: need {need}, have {have} (arg {arg})")]
    Arity { need: u32, have: u32, arg: u32 },

    #[error("length error: need {need}, have {have}")]
    Length {
        need: u64,
        have: u64,
        positions: Vec<u64>,
    },

    #[error("index {idx} out of bounds for length {len}")]
    Index { idx: i64, len: u64 },

    #[error("domain error (arg {arg}, field {field:?})")]
    Domain { arg: u32, field: Option<&'static str> },

    #[error("value error for symbol {0}")]
    Value(SymbolId),

    #[error("limit exceeded: {0}")]
    Limit(u64),

    #[error("os error: {0}")]
    Os(i32),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not yet implemented: {0}")]
    Nyi(&'static str),

    #[error("{0}")]
    User(String),
}

impl RayError {
    /// Short kind tag matching the header byte used in wire ERR values and
    /// in the `** [Ekind] ...` REPL rendering (spec §7).
    pub fn kind(&self) -> &'static str {
        match self {
            RayError::Type { .. } => "type",
            RayError::Arity { .. } => "arity",
            RayError::Length { .. } => "length",
            RayError::Index { .. } => "index",
            RayError::Domain { .. } => "domain",
            RayError::Value(_) => "value",
            RayError::Limit(_) => "limit",
            RayError::Os(_) => "os",
            RayError::Parse(_) => "parse",
            RayError::Nyi(_) => "nyi",
            RayError::User(_) => "user",
        }
    }

    /// REPL/log rendering: `** [Ekind] <context>`.
    pub fn render(&self) -> String {
        format!("** [E{}] {}", self.kind(), self)
    }

    /// Whether this error class is retried at the IPC boundary (EINTR-style
    /// transient OS signals only -- spec §7 "Propagation policy").
    pub fn is_transient_os(&self) -> bool {
        matches!(self, RayError::Os(errno) if *errno == libc::EINTR)
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<RayError>> = const { RefCell::new(None) };
}

/// Record `err` in the thread-local "last error" slot, mirroring the VM's
/// per-thread error record that every fallible entry point writes into
/// before returning the shared `ERR_OBJ`.
pub fn set_last_error(err: RayError) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(err));
}

/// Drain the thread-local "last error" slot. Used by the reactor to build an
/// ERR-valued RESP frame for a failed SYNC request.
pub fn take_last_error() -> Option<RayError> {
    LAST_ERROR.with(|cell| cell.borrow_mut().take())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_matches_repl_format() {
        let e = RayError::Arity { need: 2, have: 1, arg: 0 };
        assert_eq!(e.render(), "** [Earity] arity error: need 2, have 1 (arg 0)");
    }

    #[test]
    fn last_error_round_trips_per_thread() {
        assert!(take_last_error().is_none());
        set_last_error(RayError::Nyi("parted serialization"));
        match take_last_error() {
            Some(RayError::Nyi(s)) => assert_eq!(s, "parted serialization"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(take_last_error().is_none());
    }

    #[test]
    fn eintr_is_transient() {
        assert!(RayError::Os(libc::EINTR).is_transient_os());
        assert!(!RayError::Os(libc::ENOENT).is_transient_os());
    }
}
