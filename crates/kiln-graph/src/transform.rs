//! In-process artifact transforms and their registry.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{GraphError, Result};
use crate::exec::{CancelToken, Executor};

/// What a transform may use besides the artifact itself.
pub struct TransformContext<'a> {
    pub executor: &'a dyn Executor,
    pub cancel: &'a CancelToken,
    /// Scratch space discarded after the transform.
    pub scratch: &'a Path,
}

/// A named mutation applied to a private copy of an artifact.
///
/// Object-safe so transforms can be stored in `Box<dyn ArtifactTransform>`.
pub trait ArtifactTransform: fmt::Debug + Send + Sync {
    /// Name used by `Node::Transform`.
    fn name(&self) -> &str;

    /// Rewrite the tree at `root` in place.
    fn apply(&self, root: &Path, params: &serde_json::Value, ctx: &TransformContext<'_>)
        -> Result<()>;
}

/// Registry of transforms by name.
#[derive(Debug, Default)]
pub struct TransformRegistry {
    transforms: BTreeMap<String, Box<dyn ArtifactTransform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform, replacing any earlier one of the same name.
    pub fn register(&mut self, transform: Box<dyn ArtifactTransform>) {
        self.transforms.insert(transform.name().to_string(), transform);
    }

    pub fn get(&self, name: &str) -> Result<&dyn ArtifactTransform> {
        self.transforms
            .get(name)
            .map(Box::as_ref)
            .ok_or_else(|| GraphError::UnknownTransform(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.transforms.keys().map(String::as_str)
    }
}

impl GraphError {
    /// A transform-specific failure.
    pub fn transform(name: &str, message: impl fmt::Display) -> Self {
        GraphError::Transform {
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}
