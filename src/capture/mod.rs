//! Persistence-layer change capture.
//!
//! # Data Flow
//! ```text
//! Session flush (crate::persistence)
//!     → hooks.rs (before_insert / before_update / before_delete)
//!     → change.rs (classify via RowLookup, diff columns, read request scope)
//!     → crate::audit::delivery (fire-and-forget)
//! ```

pub mod change;
pub mod entity;
pub mod hooks;

pub use change::{CaptureError, ChangeCapture, ChangeEvent, Operation};
pub use entity::{ColumnValue, Entity, EntitySnapshot};
pub use hooks::{HookRegistry, LifecycleHooks, RowLookup};
