//! Operation registry
//!
//! Holds the immutable set of callable operations exposed through `tools/list` and `tools/call`.
//! A registry is assembled once by [`RegistryBuilder`] and published through a
//! [`RegistryHandle`], which swaps whole registries and never mutates one in place.

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

const FULL_NAME_PATTERN: &str = r"^[a-z][a-z0-9-]*_[a-z][a-z0-9_]*$";

/// Failure reported by an operation. Surfaced to MCP clients as an internal error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
}

impl OperationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArguments(_) => "invalid_arguments",
            Self::Failed(_) => "failed",
        }
    }
}

#[async_trait]
pub trait Operation: Send + Sync {
    /// Full `service_operation` name.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the argument object.
    fn input_schema(&self) -> &Arc<Value>;

    async fn invoke(&self, call_id: &str, args: Map<String, Value>)
        -> Result<Value, OperationError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("operation name `{0}` must look like service_operation")]
    InvalidName(String),
    #[error("operation `{0}` is registered twice")]
    Duplicate(String),
    #[error("operation `{0}` has an empty description")]
    MissingDescription(String),
    #[error("operation `{0}` input schema must be a JSON object")]
    InvalidSchema(String),
}

#[derive(Default)]
pub struct OperationRegistry {
    operations: Vec<Arc<dyn Operation>>,
    index: HashMap<String, usize>,
}

impl OperationRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Operation>> {
        self.index.get(name).map(|position| &self.operations[*position])
    }

    /// Operations in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Operation>> {
        self.operations.iter()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    registry: OperationRegistry,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, operation: Arc<dyn Operation>) -> Result<Self, RegistryError> {
        let name = operation.name().to_string();
        if !name_pattern().is_match(&name) {
            return Err(RegistryError::InvalidName(name));
        }
        if self.registry.index.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        if operation.description().trim().is_empty() {
            return Err(RegistryError::MissingDescription(name));
        }
        if !operation.input_schema().is_object() {
            return Err(RegistryError::InvalidSchema(name));
        }

        let position = self.registry.operations.len();
        self.registry.operations.push(operation);
        self.registry.index.insert(name, position);
        Ok(self)
    }

    pub fn build(self) -> OperationRegistry {
        self.registry
    }
}

/// Current registry, replaced wholesale on reload.
pub struct RegistryHandle {
    current: RwLock<Arc<OperationRegistry>>,
}

impl RegistryHandle {
    pub fn new(registry: OperationRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn snapshot(&self) -> Arc<OperationRegistry> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, registry: OperationRegistry) {
        let registry = Arc::new(registry);
        match self.current.write() {
            Ok(mut guard) => *guard = registry,
            Err(poisoned) => *poisoned.into_inner() = registry,
        }
        tracing::info!("operation registry replaced");
    }
}

pub fn full_name(service: &str, operation: &str) -> String {
    format!("{service}_{operation}")
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(FULL_NAME_PATTERN).expect("operation name pattern compiles"))
}
