//! Key Module
//!
//! Turns call arguments into lookup keys and decides when two keys match.

mod equality;
mod pipeline;
mod serialize;
mod value;

use std::fmt;
use std::ops::Deref;

pub use equality::{
    deep_equal, is_same_value_zero, shallow_equal, ArgMatcherFn, KeyMatcher, KeyMatcherFn,
};
pub use pipeline::{KeyPipeline, ProjectionFn, SerializerFn};
pub use serialize::{serialize_args, serialize_value};
pub use value::{Function, ListRef, MapRef, NativeFn, Opaque, Symbol, Value};

// == Key ==
/// Lookup key: the (possibly transformed) argument list of one call.
#[derive(Clone, Default)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(args: Vec<Value>) -> Self {
        Self(args)
    }

    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl Deref for Key {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for Key {
    fn from(args: Vec<Value>) -> Self {
        Self(args)
    }
}

impl From<&[Value]> for Key {
    fn from(args: &[Value]) -> Self {
        Self(args.to_vec())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serialize_args(&self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}
