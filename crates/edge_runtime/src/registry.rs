//! Stage and service definitions available to pipeline builds.

use crate::context::ServiceHandle;
use crate::error::ConfigError;
use crate::stage::{Stage, StageKind};
use edge_protocol::Config;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type StageFactory = Arc<dyn Fn() -> Box<dyn Stage> + Send + Sync>;
pub type ServiceFactory =
    Arc<dyn Fn(&[Config]) -> Result<ServiceHandle, ConfigError> + Send + Sync>;

#[derive(Clone)]
pub struct StageDefinition {
    pub library: String,
    pub name: String,
    pub kind: StageKind,
    pub label: String,
    factory: StageFactory,
}

impl StageDefinition {
    pub fn new<F, S>(library: &str, name: &str, kind: StageKind, label: &str, factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stage + 'static,
    {
        Self {
            library: library.to_string(),
            name: name.to_string(),
            kind,
            label: label.to_string(),
            factory: Arc::new(move || Box::new(factory()) as Box<dyn Stage>),
        }
    }

    pub fn key(&self) -> String {
        format!("{}::{}", self.library, self.name)
    }

    pub fn create(&self) -> Box<dyn Stage> {
        (self.factory)()
    }
}

impl fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDefinition")
            .field("library", &self.library)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Definitions keyed by `library::stageName`, services by service name.
#[derive(Clone, Default)]
pub struct StageRegistry {
    stages: BTreeMap<String, StageDefinition>,
    services: BTreeMap<String, ServiceFactory>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the `basic` library.
    pub fn with_builtin_stages() -> Self {
        let mut registry = Self::new();
        crate::stages::register(&mut registry);
        registry
    }

    pub fn register(&mut self, definition: StageDefinition) {
        self.stages.insert(definition.key(), definition);
    }

    pub fn register_service<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&[Config]) -> Result<ServiceHandle, ConfigError> + Send + Sync + 'static,
    {
        self.services.insert(name.to_string(), Arc::new(factory));
    }

    pub fn get(&self, library: &str, stage_name: &str) -> Option<&StageDefinition> {
        self.stages.get(&format!("{}::{}", library, stage_name))
    }

    pub fn service(&self, name: &str) -> Option<&ServiceFactory> {
        self.services.get(name)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.values()
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_library() {
        let registry = StageRegistry::with_builtin_stages();
        let generator = registry.get("basic", "dev_data_generator").unwrap();
        assert_eq!(generator.kind, StageKind::Origin);
        assert_eq!(registry.get("basic", "trash").unwrap().kind, StageKind::Target);
        assert_eq!(registry.get("basic", "selector").unwrap().kind, StageKind::Processor);
        assert!(registry.get("basic", "fragment_source").is_none());
        assert!(registry.get("other", "trash").is_none());
    }

    #[test]
    fn test_services() {
        let mut registry = StageRegistry::new();
        registry.register_service("counter", |_configs| Ok(Arc::new(7u32) as ServiceHandle));
        let handle = (registry.service("counter").unwrap())(&[]).unwrap();
        assert_eq!(*handle.downcast::<u32>().unwrap(), 7);
    }
}
