//! Registry of interpreter constructors keyed by class name.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Interpreter, Properties, builtin};
use crate::error::{Error, Result};

/// Builds an interpreter from its properties.
pub type InterpreterConstructor =
    Arc<dyn Fn(&Properties) -> Result<Box<dyn Interpreter>> + Send + Sync>;

/// Maps interpreter class names to constructors.
#[derive(Clone, Default)]
pub struct InterpreterFactory {
    constructors: HashMap<String, InterpreterConstructor>,
}

impl InterpreterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory preloaded with the interpreters shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        builtin::register(&mut factory);
        factory
    }

    /// Register a constructor, replacing any previous one for `class_name`.
    pub fn register<F>(&mut self, class_name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&Properties) -> Result<Box<dyn Interpreter>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(class_name.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.constructors.contains_key(class_name)
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create(&self, class_name: &str, properties: &Properties) -> Result<Box<dyn Interpreter>> {
        let constructor = self
            .constructors
            .get(class_name)
            .ok_or_else(|| Error::UnknownInterpreterClass(class_name.to_string()))?;
        constructor(properties)
    }
}
