//! Key Pipeline Module
//!
//! Applies the configured key transformations to raw call arguments.

use std::fmt;
use std::sync::Arc;

use crate::key::{serialize_args, Key, Value};

/// Caller-supplied projection of the argument list.
pub type ProjectionFn = dyn Fn(&[Value]) -> Vec<Value> + Send + Sync;

/// Caller-supplied serializer producing the whole key as one string.
pub type SerializerFn = dyn Fn(&[Value]) -> String + Send + Sync;

// == Key Pipeline ==
/// Ordered key transformation: truncate, then project, then serialize.
///
/// Each stage receives the previous stage's output. With no stages the raw
/// argument list is the key.
#[derive(Clone, Default)]
pub struct KeyPipeline {
    max_args: Option<usize>,
    projection: Option<Arc<ProjectionFn>>,
    serializer: Option<Arc<SerializerFn>>,
}

impl fmt::Debug for KeyPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPipeline")
            .field("max_args", &self.max_args)
            .field("projection", &self.projection.is_some())
            .field("serializer", &self.serializer.is_some())
            .finish()
    }
}

impl KeyPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only the first `n` arguments.
    pub fn with_max_args(mut self, n: usize) -> Self {
        self.max_args = Some(n);
        self
    }

    pub fn with_projection(mut self, projection: Arc<ProjectionFn>) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Serializes with the built-in serializer.
    pub fn with_default_serializer(self) -> Self {
        self.with_serializer(Arc::new(serialize_args))
    }

    pub fn with_serializer(mut self, serializer: Arc<SerializerFn>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    /// True when keys are single serialized strings.
    pub fn is_serialized(&self) -> bool {
        self.serializer.is_some()
    }

    pub fn is_identity(&self) -> bool {
        self.max_args.is_none() && self.projection.is_none() && self.serializer.is_none()
    }

    // == Transform ==
    /// Builds the lookup key for one call.
    pub fn transform(&self, args: &[Value]) -> Key {
        let truncated = match self.max_args {
            Some(n) if n < args.len() => &args[..n],
            _ => args,
        };

        let projected = match &self.projection {
            Some(project) => project(truncated),
            None => truncated.to_vec(),
        };

        match &self.serializer {
            Some(serialize) => Key::new(vec![Value::str(serialize(&projected))]),
            None => Key::new(projected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Vec<Value> {
        vec![Value::Int(1), Value::Int(2), Value::Int(3)]
    }

    #[test]
    fn test_empty_pipeline_passes_through() {
        let pipeline = KeyPipeline::new();
        assert!(pipeline.is_identity());
        assert_eq!(pipeline.transform(&args()).len(), 3);
    }

    #[test]
    fn test_max_args_truncates() {
        let pipeline = KeyPipeline::new().with_max_args(2);
        assert_eq!(pipeline.transform(&args()).to_string(), "[1,2]");

        let pipeline = KeyPipeline::new().with_max_args(10);
        assert_eq!(pipeline.transform(&args()).len(), 3);

        let pipeline = KeyPipeline::new().with_max_args(0);
        assert!(pipeline.transform(&args()).is_empty());
    }

    #[test]
    fn test_stage_order_truncate_project_serialize() {
        // The projection sees the truncated list, the serializer the projection.
        let pipeline = KeyPipeline::new()
            .with_max_args(2)
            .with_projection(Arc::new(|args: &[Value]| {
                let mut out = args.to_vec();
                out.reverse();
                out.push(Value::Int(args.len() as i64));
                out
            }))
            .with_default_serializer();

        let key = pipeline.transform(&args());
        assert_eq!(key.len(), 1);
        match &key[0] {
            Value::Str(s) => assert_eq!(&**s, "[2,1,2]"),
            other => panic!("expected a string key, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_serializer() {
        let pipeline = KeyPipeline::new().with_serializer(Arc::new(|args: &[Value]| {
            format!("{} args", args.len())
        }));
        assert!(pipeline.is_serialized());
        assert_eq!(pipeline.transform(&args()).to_string(), r#"["3 args"]"#);
    }
}
