// logsight-parsers/src/registry.rs
//! Parser registry for format auto-detection.
//!
//! The registry provides a centralized way to register, discover, and
//! instantiate parsers. Detection is content-based: parsers are probed in
//! a fixed priority order and the first `can_parse` winner takes the file.
//! A probe failure in one parser never prevents the others from running.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use crate::traits::LogParser;

/// Factory function type for creating parser instances
pub type ParserFactory = Box<dyn Fn() -> Arc<dyn LogParser> + Send + Sync>;

/// Registration entry for a parser
pub struct ParserRegistration {
    /// Unique identifier for this parser (its stable `name()`)
    pub id: String,
    /// Description of what this parser handles
    pub description: String,
    /// Probe order for detection (higher = probed earlier)
    pub priority: i32,
    /// Factory function to create parser instance
    pub factory: ParserFactory,
}

/// Parser information for display
#[derive(Debug, Clone, serde::Serialize)]
pub struct ParserInfo {
    pub id: String,
    pub description: String,
    pub priority: i32,
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Parser with ID '{0}' already registered")]
    DuplicateId(String),

    #[error("Parser with ID '{0}' not found")]
    NotFound(String),

    #[error("No parser recognized file: {0}")]
    NoParserForPath(std::path::PathBuf),

    #[error("Registry lock poisoned")]
    LockPoisoned,
}

/// Global parser registry
pub struct ParserRegistry {
    /// Map of parser ID to registration
    parsers: RwLock<HashMap<String, ParserRegistration>>,
    /// Parser IDs in probe order
    probe_order: RwLock<Vec<String>>,
    /// Cached parser instances
    instances: RwLock<HashMap<String, Arc<dyn LogParser>>>,
}

impl ParserRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            parsers: RwLock::new(HashMap::new()),
            probe_order: RwLock::new(Vec::new()),
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new parser
    pub fn register(&self, registration: ParserRegistration) -> Result<(), RegistryError> {
        let id = registration.id.clone();

        let mut parsers = self.parsers.write().map_err(|_| RegistryError::LockPoisoned)?;
        if parsers.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }

        let mut order = self.probe_order.write().map_err(|_| RegistryError::LockPoisoned)?;
        parsers.insert(id.clone(), registration);
        order.push(id);

        // Keep probe order sorted by priority (descending), stable for ties.
        order.sort_by(|a, b| {
            let pa = parsers.get(a).map(|p| p.priority).unwrap_or(0);
            let pb = parsers.get(b).map(|p| p.priority).unwrap_or(0);
            pb.cmp(&pa)
        });

        Ok(())
    }

    /// Get a parser instance by ID
    pub fn get(&self, id: &str) -> Result<Arc<dyn LogParser>, RegistryError> {
        // Check cache first
        {
            let instances = self.instances.read().map_err(|_| RegistryError::LockPoisoned)?;
            if let Some(instance) = instances.get(id) {
                return Ok(Arc::clone(instance));
            }
        }

        // Create new instance
        let instance = {
            let parsers = self.parsers.read().map_err(|_| RegistryError::LockPoisoned)?;
            let registration = parsers
                .get(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            (registration.factory)()
        };

        // Cache it
        {
            let mut instances = self.instances.write().map_err(|_| RegistryError::LockPoisoned)?;
            instances.insert(id.to_string(), Arc::clone(&instance));
        }

        Ok(instance)
    }

    /// Detect which parser handles `path`
    ///
    /// Probes in priority order; the first `can_parse` winner is returned.
    /// Parsers whose probe errors internally simply answer false and the
    /// scan moves on.
    pub fn detect(&self, path: &Path) -> Result<Arc<dyn LogParser>, RegistryError> {
        let order = {
            let order = self.probe_order.read().map_err(|_| RegistryError::LockPoisoned)?;
            order.clone()
        };

        for id in &order {
            let parser = match self.get(id) {
                Ok(parser) => parser,
                Err(_) => continue,
            };
            if parser.can_parse(path) {
                tracing::debug!(parser = %id, path = %path.display(), "Format detected");
                return Ok(parser);
            }
        }

        Err(RegistryError::NoParserForPath(path.to_path_buf()))
    }

    /// List all registered parsers in probe order
    pub fn list(&self) -> Result<Vec<ParserInfo>, RegistryError> {
        let parsers = self.parsers.read().map_err(|_| RegistryError::LockPoisoned)?;
        let order = self.probe_order.read().map_err(|_| RegistryError::LockPoisoned)?;

        Ok(order
            .iter()
            .filter_map(|id| parsers.get(id))
            .map(|p| ParserInfo {
                id: p.id.clone(),
                description: p.description.clone(),
                priority: p.priority,
            })
            .collect())
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for parser registration
pub struct ParserRegistrationBuilder {
    id: Option<String>,
    description: String,
    priority: i32,
    factory: Option<ParserFactory>,
}

impl ParserRegistrationBuilder {
    pub fn new() -> Self {
        Self {
            id: None,
            description: String::new(),
            priority: 0,
            factory: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn factory<F, P>(mut self, factory: F) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: LogParser + 'static,
    {
        self.factory = Some(Box::new(move || Arc::new(factory())));
        self
    }

    pub fn build(self) -> Result<ParserRegistration, &'static str> {
        let id = self.id.ok_or("ID is required")?;
        let factory = self.factory.ok_or("Factory is required")?;

        Ok(ParserRegistration {
            id,
            description: self.description,
            priority: self.priority,
            factory,
        })
    }
}

impl Default for ParserRegistrationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Global registry instance, populated with the built-in parsers
pub static GLOBAL_REGISTRY: Lazy<ParserRegistry> = Lazy::new(|| {
    let registry = ParserRegistry::new();
    crate::register_builtin_parsers(&registry);
    registry
});
