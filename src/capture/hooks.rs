//! Hook interface between the persistence layer and change capture.

use std::collections::HashMap;
use std::sync::Arc;

use crate::capture::entity::EntitySnapshot;

/// Persistence capability used to classify writes.
pub trait RowLookup: Send + Sync {
    /// Whether a committed row of `entity_type` with identity `id` exists.
    fn exists(&self, entity_type: &str, id: i64) -> bool;
}

/// Callbacks fired by the persistence layer before a write is finalized.
///
/// Implementations run synchronously inside the flush and must not block
/// on I/O or fail it.
pub trait LifecycleHooks: Send + Sync {
    fn before_insert(&self, entity: &EntitySnapshot, rows: &dyn RowLookup);
    fn before_update(&self, entity: &EntitySnapshot, rows: &dyn RowLookup);
    fn before_delete(&self, entity: &EntitySnapshot, rows: &dyn RowLookup);
}

/// Hooks keyed by the entity type they are registered against.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: HashMap<String, Vec<Arc<dyn LifecycleHooks>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, entity_type: impl Into<String>, hooks: Arc<dyn LifecycleHooks>) {
        let entity_type = entity_type.into();
        tracing::info!(entity_type = %entity_type, "Lifecycle hooks registered");
        self.hooks.entry(entity_type).or_default().push(hooks);
    }

    /// Register `hooks` for each of `entity_types`.
    pub fn register_all<S: AsRef<str>>(&mut self, entity_types: &[S], hooks: Arc<dyn LifecycleHooks>) {
        for entity_type in entity_types {
            self.register(entity_type.as_ref(), hooks.clone());
        }
    }

    pub fn is_registered(&self, entity_type: &str) -> bool {
        self.hooks.contains_key(entity_type)
    }

    pub fn hooks_for(&self, entity_type: &str) -> &[Arc<dyn LifecycleHooks>] {
        self.hooks.get(entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn fire_insert(&self, entity: &EntitySnapshot, rows: &dyn RowLookup) {
        for hooks in self.hooks_for(&entity.entity_type) {
            hooks.before_insert(entity, rows);
        }
    }

    pub fn fire_update(&self, entity: &EntitySnapshot, rows: &dyn RowLookup) {
        for hooks in self.hooks_for(&entity.entity_type) {
            hooks.before_update(entity, rows);
        }
    }

    pub fn fire_delete(&self, entity: &EntitySnapshot, rows: &dyn RowLookup) {
        for hooks in self.hooks_for(&entity.entity_type) {
            hooks.before_delete(entity, rows);
        }
    }
}
