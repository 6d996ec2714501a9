//! The result value type threaded through pattern frames and the
//! cooperative stack. Intentionally small: this crate
//! is about *scheduling* values, not the full result-pattern vocabulary
//! (`graphd-pattern` owns the pattern tree that produces these).

use crate::DeferredHandle;
use graphd_guid::Guid;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Guid(Guid),
    Sequence(Vec<Value>),
    /// A set-level value not yet materialized (Deferred
    /// values): re-entering the engine through `DeferredHandle::push`
    /// resolves it.
    Deferred(DeferredHandle),
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Guid(g) => write!(f, "Guid({g})"),
            Value::Sequence(items) => f.debug_tuple("Sequence").field(items).finish(),
            Value::Deferred(_) => write!(f, "Deferred(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            // Deferred values are never structurally equal; compare after
            // resolving them via `push` instead.
            _ => false,
        }
    }
}
