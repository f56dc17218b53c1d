use crate::component::{ComponentFactory, ComponentMetadata};
use crate::error::EngineError;
use flowcore::ComponentTypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available component types, keyed by the stable type id.
///
/// Populated at start-up, then frozen behind an `Arc` and shared with engines.
/// There is no way to remove or replace a registered type.
pub struct ComponentRegistry {
    factories: HashMap<ComponentTypeId, Arc<dyn ComponentFactory>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a component factory
    pub fn register(&mut self, factory: Arc<dyn ComponentFactory>) -> Result<(), EngineError> {
        let type_id = factory.component_type();
        if self.factories.contains_key(&type_id) {
            return Err(EngineError::DuplicateComponentType(type_id));
        }
        tracing::info!(
            "Registering component type: {} ({})",
            factory.type_name(),
            type_id
        );
        self.factories.insert(type_id, factory);
        Ok(())
    }

    pub fn resolve(&self, type_id: ComponentTypeId) -> Option<&Arc<dyn ComponentFactory>> {
        self.factories.get(&type_id)
    }

    pub fn find_by_name(&self, type_name: &str) -> Option<&Arc<dyn ComponentFactory>> {
        self.factories
            .values()
            .find(|factory| factory.type_name() == type_name)
    }

    /// All registered types, ordered by type id
    pub fn list_component_types(&self) -> Vec<(ComponentTypeId, String)> {
        let mut types: Vec<_> = self
            .factories
            .values()
            .map(|f| (f.component_type(), f.type_name().to_string()))
            .collect();
        types.sort_by_key(|(id, _)| *id);
        types
    }

    pub fn get_metadata(&self, type_id: ComponentTypeId) -> Option<ComponentMetadata> {
        self.factories.get(&type_id).map(|f| f.metadata())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
