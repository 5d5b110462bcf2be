//! Audit subsystem.
//!
//! # Data Flow
//! ```text
//! Traced operation / HTTP request exit
//!     → decorator.rs (timing, span id rotation)
//!     → record.rs (audit record → span + log line)
//!
//! Change-capture hook (crate::capture)
//!     → delivery.rs (bounded queue → worker → audit service)
//! ```

pub mod decorator;
pub mod delivery;
pub mod record;

pub use decorator::{TracedAsyncFn, TracedFn};
pub use delivery::{
    AuditDispatcher, AuditPayload, AuditSink, DeliveryError, DeliveryOutcome, DeliverySnapshot,
    DeliveryWorker,
};
pub use record::{AuditError, AuditRecord, AuditRecorder, AuditStatus, OperationTrace};
