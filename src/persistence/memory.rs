//! In-memory row store with session-based writes.
//!
//! A [`Session`] stages inserts, updates and deletes; [`Session::flush`]
//! fires the registered lifecycle hooks for each staged change, with the
//! committed and current column values, before applying it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::capture::entity::{Entity, EntitySnapshot};
use crate::capture::hooks::{HookRegistry, RowLookup};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{entity_type} {id} not found")]
    NotFound { entity_type: &'static str, id: i64 },

    #[error("{0} has no identity")]
    MissingIdentity(&'static str),

    #[error("failed to encode row: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no identities left to allocate")]
    IdsExhausted,
}

#[derive(Debug, Clone)]
struct Row {
    columns: BTreeMap<String, String>,
    value: Value,
}

/// Thread-safe store shared by every session.
#[derive(Clone)]
pub struct MemoryStore {
    rows: Arc<DashMap<(String, i64), Row>>,
    next_id: Arc<AtomicI64>,
    hooks: Arc<HookRegistry>,
}

impl MemoryStore {
    pub fn new(hooks: HookRegistry) -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicI64::new(1)),
            hooks: Arc::new(hooks),
        }
    }

    pub fn session(&self) -> Session {
        Session {
            store: self.clone(),
            pending: Vec::new(),
        }
    }

    pub fn get<E: Entity + DeserializeOwned>(&self, id: i64) -> Result<Option<E>, PersistenceError> {
        match self.rows.get(&(E::ENTITY_TYPE.to_string(), id)) {
            Some(row) => Ok(Some(serde_json::from_value(row.value.clone())?)),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn committed_columns(&self, entity_type: &'static str, id: i64) -> Option<BTreeMap<String, String>> {
        self.rows
            .get(&(entity_type.to_string(), id))
            .map(|row| row.columns.clone())
    }

    fn allocate_id(&self) -> Result<i64, PersistenceError> {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| next.checked_add(1))
            .map_err(|_| PersistenceError::IdsExhausted)
    }
}

impl RowLookup for MemoryStore {
    fn exists(&self, entity_type: &str, id: i64) -> bool {
        self.rows.contains_key(&(entity_type.to_string(), id))
    }
}

/// Type-erased staged entity.
trait Staged: Send {
    fn entity_type(&self) -> &'static str;
    fn id(&self) -> Option<i64>;
    fn set_id(&mut self, id: i64);
    fn columns(&self) -> BTreeMap<String, String>;
    fn encode(&self) -> Result<Value, serde_json::Error>;
}

impl<E: Entity + Serialize> Staged for E {
    fn entity_type(&self) -> &'static str {
        E::ENTITY_TYPE
    }

    fn id(&self) -> Option<i64> {
        Entity::id(self)
    }

    fn set_id(&mut self, id: i64) {
        Entity::set_id(self, id)
    }

    fn columns(&self) -> BTreeMap<String, String> {
        Entity::columns(self)
    }

    fn encode(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

enum Change {
    Insert,
    Update,
    Delete,
}

/// A unit of work against the store.
pub struct Session {
    store: MemoryStore,
    pending: Vec<(Change, Box<dyn Staged>)>,
}

impl Session {
    /// Stage an insert, or an update when the entity's row already exists.
    pub fn add<E: Entity + Serialize>(&mut self, entity: E) {
        let change = match Entity::id(&entity) {
            Some(id) if self.store.exists(E::ENTITY_TYPE, id) => Change::Update,
            _ => Change::Insert,
        };
        self.pending.push((change, Box::new(entity)));
    }

    pub fn delete<E: Entity + Serialize>(&mut self, entity: E) {
        self.pending.push((Change::Delete, Box::new(entity)));
    }

    /// Apply every staged change in order. Returns the written identities.
    pub fn flush(&mut self) -> Result<Vec<i64>, PersistenceError> {
        let mut written = Vec::with_capacity(self.pending.len());
        for (change, entity) in std::mem::take(&mut self.pending) {
            written.push(self.apply(change, entity)?);
        }
        Ok(written)
    }

    pub fn commit(mut self) -> Result<Vec<i64>, PersistenceError> {
        self.flush()
    }

    fn apply(&self, change: Change, mut entity: Box<dyn Staged>) -> Result<i64, PersistenceError> {
        let store = &self.store;
        let hooks = &store.hooks;
        let entity_type = entity.entity_type();
        let mut snapshot = EntitySnapshot {
            entity_type: entity_type.to_string(),
            id: entity.id(),
            committed: BTreeMap::new(),
            current: entity.columns(),
            attached: true,
        };

        match change {
            Change::Insert => {
                hooks.fire_insert(&snapshot, store);
                let id = match entity.id() {
                    Some(id) => {
                        store.next_id.fetch_max(id.saturating_add(1), Ordering::SeqCst);
                        id
                    }
                    None => store.allocate_id()?,
                };
                entity.set_id(id);
                store.rows.insert(
                    (entity_type.to_string(), id),
                    Row {
                        columns: entity.columns(),
                        value: entity.encode()?,
                    },
                );
                Ok(id)
            }
            Change::Update => {
                let id = entity.id().ok_or(PersistenceError::MissingIdentity(entity_type))?;
                snapshot.committed = store
                    .committed_columns(entity_type, id)
                    .ok_or(PersistenceError::NotFound { entity_type, id })?;
                let value = entity.encode()?;
                hooks.fire_update(&snapshot, store);
                store.rows.insert(
                    (entity_type.to_string(), id),
                    Row {
                        columns: snapshot.current,
                        value,
                    },
                );
                Ok(id)
            }
            Change::Delete => {
                let id = entity.id().ok_or(PersistenceError::MissingIdentity(entity_type))?;
                snapshot.committed = store
                    .committed_columns(entity_type, id)
                    .ok_or(PersistenceError::NotFound { entity_type, id })?;
                hooks.fire_delete(&snapshot, store);
                store.rows.remove(&(entity_type.to_string(), id));
                Ok(id)
            }
        }
    }
}
