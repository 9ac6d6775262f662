use std::collections::HashMap;
use std::sync::Arc;

use stepwise_core::{Component, Trigger};

use crate::components::{
    Approval, Filter, GroupBy, If, Merge, Noop, TimeGate, Wait,
};
use crate::triggers::Start;

/// Registry of components and triggers, built once at start-up.
#[derive(Clone, Default)]
pub struct Registry {
    components: HashMap<String, Arc<dyn Component>>,
    triggers: HashMap<String, Arc<dyn Trigger>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every built-in component and trigger.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_component(GroupBy::new());
        registry.register_component(Merge::new());
        registry.register_component(TimeGate);
        registry.register_component(Approval);
        registry.register_component(Wait);
        registry.register_component(If::new());
        registry.register_component(Filter::new());
        registry.register_component(Noop);
        registry.register_trigger(Start::new());
        registry
    }

    /// Register a component under its name.
    pub fn register_component<C: Component>(&mut self, component: C) {
        let name = component.name().to_string();
        if self
            .components
            .insert(name.clone(), Arc::new(component))
            .is_some()
        {
            tracing::warn!(component = %name, "Replaced registered component");
        }
    }

    /// Register a trigger under its name.
    pub fn register_trigger<T: Trigger>(&mut self, trigger: T) {
        let name = trigger.name().to_string();
        if self
            .triggers
            .insert(name.clone(), Arc::new(trigger))
            .is_some()
        {
            tracing::warn!(trigger = %name, "Replaced registered trigger");
        }
    }

    pub fn component(&self, name: &str) -> Option<Arc<dyn Component>> {
        self.components.get(name).cloned()
    }

    pub fn trigger(&self, name: &str) -> Option<Arc<dyn Trigger>> {
        self.triggers.get(name).cloned()
    }

    /// Get all component names.
    pub fn component_names(&self) -> Vec<&str> {
        self.components.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.components.len() + self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.triggers.is_empty()
    }
}
