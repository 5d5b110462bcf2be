//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Tracer (collector selection) → metrics backend
//!     → delivery worker → hooks → AppState
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C → server stops accepting → broadcast to background tasks
//!     → span batch task flushes → metrics push task flushes
//!     → drain awaits both tracked handles (bounded by the export timeout)
//! ```
//!
//! # Design Decisions
//! - Background tasks subscribe before they start, so no signal is missed
//! - In-flight audit deliveries are not cancelled; they finish on their own

pub mod shutdown;
pub mod startup;

pub use shutdown::{ctrl_c, Shutdown};
pub use startup::{start, StartupError};
