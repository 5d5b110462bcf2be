//! Reference persistence layer.
//!
//! An in-memory store exposing the lifecycle-hook contract the change
//! capture depends on. Not a query engine.

pub mod memory;
pub mod models;

pub use memory::{MemoryStore, PersistenceError, Session};
pub use models::{Passenger, ShipCallManifest};
