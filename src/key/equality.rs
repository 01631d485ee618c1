//! Key Equality Module
//!
//! Decides whether two keys denote the same cached computation.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::key::{Key, Value};

/// Compares one argument position of two keys.
pub type ArgMatcherFn = dyn Fn(&Value, &Value) -> bool + Send + Sync;

/// Compares two whole keys (stored key first, incoming key second).
pub type KeyMatcherFn = dyn Fn(&Key, &Key) -> bool + Send + Sync;

// == Key Matcher ==
/// Concrete equality strategy, resolved once when a memoizer is built.
#[derive(Clone, Default)]
pub enum KeyMatcher {
    /// SameValueZero on primitives, reference identity on everything else.
    #[default]
    Identity,
    /// Recursive structural equality, cycle-safe.
    Deep,
    /// One level of structure; nested values compared by identity.
    Shallow,
    /// Caller-supplied comparison applied position by position.
    PerArg(Arc<ArgMatcherFn>),
    /// Caller-supplied comparison of the full keys.
    WholeKey(Arc<KeyMatcherFn>),
}

impl fmt::Debug for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyMatcher::Identity => "Identity",
            KeyMatcher::Deep => "Deep",
            KeyMatcher::Shallow => "Shallow",
            KeyMatcher::PerArg(_) => "PerArg",
            KeyMatcher::WholeKey(_) => "WholeKey",
        };
        f.write_str(name)
    }
}

impl KeyMatcher {
    /// Returns true when `incoming` matches the `stored` key.
    ///
    /// Every strategy except [`KeyMatcher::WholeKey`] requires equal arity
    /// and stops at the first mismatching position.
    pub fn matches(&self, stored: &Key, incoming: &Key) -> bool {
        let arg_eq: &dyn Fn(&Value, &Value) -> bool = match self {
            KeyMatcher::WholeKey(f) => return f(stored, incoming),
            KeyMatcher::Identity => &is_same_value_zero,
            KeyMatcher::Deep => &deep_equal,
            KeyMatcher::Shallow => &shallow_equal,
            KeyMatcher::PerArg(f) => f.as_ref(),
        };

        stored.len() == incoming.len()
            && stored
                .iter()
                .zip(incoming.iter())
                .all(|(a, b)| arg_eq(a, b))
    }

    /// True for caller-supplied comparisons, which may run arbitrary code
    /// and so are never called with store locks held.
    pub fn is_user_defined(&self) -> bool {
        matches!(self, KeyMatcher::PerArg(_) | KeyMatcher::WholeKey(_))
    }
}

// == Identity ==
/// Identity comparison of two arguments.
///
/// Numbers use SameValueZero (NaN matches NaN, `0` matches `-0`, integers
/// and floats compare numerically), strings compare by content and every
/// reference value compares by pointer.
pub fn is_same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => *i as f64 == *f,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x.ptr_eq(y),
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::List(x), Value::List(y)) => x.ptr_eq(y),
        (Value::Map(x), Value::Map(y)) => x.ptr_eq(y),
        (Value::Opaque(x), Value::Opaque(y)) => x.ptr_eq(y),
        _ => false,
    }
}

// == Shallow ==
/// Compares lists element-wise and maps field-wise with identity; any other
/// pair falls back to identity.
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            let (xs, ys) = (x.items(), y.items());
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(p, q)| is_same_value_zero(p, q))
        }
        (Value::Map(x), Value::Map(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            let (xs, ys) = (x.fields(), y.fields());
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|((kp, p), (kq, q))| kp == kq && is_same_value_zero(p, q))
        }
        _ => is_same_value_zero(a, b),
    }
}

// == Deep ==
/// Recursive structural equality.
///
/// Pairs of containers already under comparison are remembered; meeting
/// the same pair again is treated as equal, which terminates cycles.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    let mut visited = HashSet::new();
    deep_equal_inner(a, b, &mut visited)
}

fn deep_equal_inner(a: &Value, b: &Value, visited: &mut HashSet<(usize, usize)>) -> bool {
    if let (Some(pa), Some(pb)) = (a.ref_addr(), b.ref_addr()) {
        if pa == pb || !visited.insert((pa, pb)) {
            return true;
        }
    }

    match (a, b) {
        (Value::List(x), Value::List(y)) => {
            let (xs, ys) = (x.items(), y.items());
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(p, q)| deep_equal_inner(p, q, visited))
        }
        (Value::Map(x), Value::Map(y)) => {
            let (xs, ys) = (x.fields(), y.fields());
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|((kp, p), (kq, q))| kp == kq && deep_equal_inner(p, q, visited))
        }
        _ => is_same_value_zero(a, b),
    }
}
