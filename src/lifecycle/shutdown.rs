//! Shutdown coordination for background pipeline tasks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// The span batch task and the metrics push task subscribe at startup and
/// stop after draining what they hold once the signal fires. Their handles
/// are tracked here so [`Shutdown::drain`] can wait for the final flush.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Keep a background task's handle until [`Shutdown::drain`].
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Wait up to `limit` for every tracked task to finish.
    ///
    /// Returns `false` if some task was still running at the deadline.
    pub async fn drain(&self, limit: Duration) -> bool {
        let handles = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        let pending = handles.len();
        let joined = tokio::time::timeout(limit, async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Background task failed during shutdown");
                }
            }
        })
        .await;

        match joined {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(tasks = pending, limit = ?limit, "Background tasks still running at shutdown deadline");
                false
            }
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fire the signal. Returns how many tasks were listening.
    pub fn trigger(&self) -> usize {
        self.tx.send(()).unwrap_or(0)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve on Ctrl+C. If the handler cannot be installed, never resolve.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
