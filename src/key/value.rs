//! Argument Value Module
//!
//! Dynamic argument model used to build cache keys. Reference values
//! (lists, maps, symbols, functions, opaque host objects) carry identity so
//! that identity and structural equality can be told apart, and lists/maps
//! are shared and mutable so cyclic structures can be expressed.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Callable stored inside a [`Value::Function`].
pub type NativeFn = dyn Fn(&[Value]) -> Value + Send + Sync;

// == Value ==
/// A single call argument.
#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Symbol(Symbol),
    Function(Function),
    List(ListRef),
    Map(MapRef),
    Opaque(Opaque),
}

impl Value {
    /// Creates a string value.
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Creates a new list with its own identity.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(ListRef::new(items.into_iter().collect()))
    }

    /// Creates a new map with its own identity.
    pub fn map<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(MapRef::new(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Creates a new, unique symbol.
    pub fn symbol(description: impl Into<String>) -> Self {
        Value::Symbol(Symbol::new(Some(description.into())))
    }

    /// Wraps a native function.
    pub fn function<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Value::Function(Function::new(name, f))
    }

    /// Wraps an arbitrary host object. Such values compare by identity only
    /// and cannot be serialized.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Value::Opaque(Opaque(Arc::new(value)))
    }

    /// Short type name, used in logs and debug output.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Function(_) => "function",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Returns the pointer used to identify reference values.
    pub(crate) fn ref_addr(&self) -> Option<usize> {
        match self {
            Value::List(l) => Some(Arc::as_ptr(&l.0) as *const () as usize),
            Value::Map(m) => Some(Arc::as_ptr(&m.0) as *const () as usize),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::key::serialize_value(self))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

// == Symbol ==
#[derive(Clone)]
pub struct Symbol(Arc<Option<String>>);

impl Symbol {
    pub fn new(description: Option<String>) -> Self {
        Self(Arc::new(description))
    }

    pub fn description(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn ptr_eq(&self, other: &Symbol) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// == Function ==
#[derive(Clone)]
pub struct Function(Arc<FunctionInner>);

struct FunctionInner {
    name: String,
    f: Box<NativeFn>,
}

impl Function {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(FunctionInner {
            name: name.into(),
            f: Box::new(f),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0.f)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// == Opaque ==
/// A host object that the key model can only compare by identity.
#[derive(Clone)]
pub struct Opaque(Arc<dyn Any + Send + Sync>);

impl Opaque {
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

// == List ==
/// Shared, mutable, ordered collection of values.
#[derive(Clone)]
pub struct ListRef(Arc<RwLock<Vec<Value>>>);

impl ListRef {
    pub fn new(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    /// Appends an item. Pushing a list into itself creates a cycle.
    pub fn push(&self, item: Value) {
        self.0.write().push(item);
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Copies the current items out of the lock.
    ///
    /// Callers walk the returned copy so no lock is held while descending
    /// into nested (possibly cyclic) values.
    pub fn items(&self) -> Vec<Value> {
        self.0.read().clone()
    }

    pub fn ptr_eq(&self, other: &ListRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

// == Map ==
/// Shared, mutable, string-keyed record. Fields iterate in key order.
#[derive(Clone)]
pub struct MapRef(Arc<RwLock<BTreeMap<String, Value>>>);

impl MapRef {
    pub fn new(fields: BTreeMap<String, Value>) -> Self {
        Self(Arc::new(RwLock::new(fields)))
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.0.write().insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Copies the current fields out of the lock, in key order.
    pub fn fields(&self) -> Vec<(String, Value)> {
        self.0
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &MapRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
