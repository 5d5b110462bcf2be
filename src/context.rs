//! Request-scoped correlation context.
//!
//! # Responsibilities
//! - Hold the trace id, parent span id, authorization token, header snapshot
//!   and actor id of the request currently executing
//! - Rotate the parent span id as spans are recorded, forming a linear chain
//! - Return documented defaults (empty string / empty map) outside a request
//!
//! # Design Decisions
//! - Storage is a `tokio::task_local!`, so values never cross into another
//!   request's task
//! - Work spawned onto another task must be wrapped with [`propagate`] to
//!   keep observing the same request
//! - Synchronous code running inside the scope (persistence hooks) reads the
//!   same storage without suspending

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};

tokio::task_local! {
    static CURRENT: Arc<RequestScope>;
}

/// Mutable storage behind one request's scope.
#[derive(Debug, Default)]
pub struct RequestScope {
    trace_id: RwLock<String>,
    parent_span_id: Mutex<String>,
    authorization: RwLock<String>,
    actor_id: RwLock<String>,
    headers: RwLock<HashMap<String, String>>,
}

impl RequestScope {
    /// Empty scope; values are filled by the request entry point.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Scope pre-populated with a trace id.
    pub fn with_trace_id(trace_id: impl Into<String>) -> Arc<Self> {
        let scope = Self::default();
        *write(&scope.trace_id) = trace_id.into();
        Arc::new(scope)
    }

    /// Immutable copy of the current values.
    pub fn snapshot(&self) -> CorrelationContext {
        CorrelationContext {
            trace_id: read(&self.trace_id).clone(),
            parent_span_id: lock(&self.parent_span_id).clone(),
            authorization: read(&self.authorization).clone(),
            actor_id: read(&self.actor_id).clone(),
            headers: read(&self.headers).clone(),
        }
    }
}

/// Point-in-time copy of a request's correlation values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelationContext {
    pub trace_id: String,
    pub parent_span_id: String,
    pub authorization: String,
    pub actor_id: String,
    pub headers: HashMap<String, String>,
}

// Writers only assign whole values, so a poisoned lock still holds a valid one.
fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn with_current<R>(f: impl FnOnce(&RequestScope) -> R) -> Option<R> {
    CURRENT.try_with(|scope| f(scope)).ok()
}

/// Run `fut` inside `scope`. Every accessor called while it executes,
/// synchronously or across await points, observes this scope.
pub async fn scope<F: Future>(scope: Arc<RequestScope>, fut: F) -> F::Output {
    CURRENT.scope(scope, fut).await
}

/// Synchronous counterpart of [`scope`] for code outside the async runtime.
pub fn sync_scope<R>(scope: Arc<RequestScope>, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(scope, f)
}

/// Wrap `fut` so that, when spawned onto another task, it keeps the caller's
/// request scope. Outside any scope the future runs unscoped.
pub fn propagate<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let current = CURRENT.try_with(Arc::clone).ok();
    async move {
        match current {
            Some(s) => CURRENT.scope(s, fut).await,
            None => fut.await,
        }
    }
}

/// Whether the caller runs inside a request scope.
pub fn in_scope() -> bool {
    with_current(|_| ()).is_some()
}

/// Copy of the current request's values, if any.
pub fn current() -> Option<CorrelationContext> {
    with_current(RequestScope::snapshot)
}

pub fn set_trace_id(id: impl Into<String>) {
    let id = id.into();
    if with_current(|s| *write(&s.trace_id) = id).is_none() {
        tracing::trace!("set_trace_id called outside a request scope; ignored");
    }
}

pub fn get_trace_id() -> String {
    with_current(|s| read(&s.trace_id).clone()).unwrap_or_default()
}

/// Replace the parent span id; the next recorded span becomes its child.
pub fn set_parent_span(id: impl Into<String>) {
    let id = id.into();
    if with_current(|s| *lock(&s.parent_span_id) = id).is_none() {
        tracing::trace!("set_parent_span called outside a request scope; ignored");
    }
}

pub fn get_parent_span() -> String {
    with_current(|s| lock(&s.parent_span_id).clone()).unwrap_or_default()
}

/// Atomically read the current parent and install `next` in its place.
///
/// Returns the previous parent (empty outside a scope).
pub fn rotate_parent_span(next: impl Into<String>) -> String {
    let next = next.into();
    with_current(|s| std::mem::replace(&mut *lock(&s.parent_span_id), next)).unwrap_or_default()
}

pub fn set_authorization(token: impl Into<String>) {
    let token = token.into();
    if with_current(|s| *write(&s.authorization) = token).is_none() {
        tracing::trace!("set_authorization called outside a request scope; ignored");
    }
}

pub fn get_authorization() -> String {
    with_current(|s| read(&s.authorization).clone()).unwrap_or_default()
}

pub fn set_actor_id(id: impl Into<String>) {
    let id = id.into();
    if with_current(|s| *write(&s.actor_id) = id).is_none() {
        tracing::trace!("set_actor_id called outside a request scope; ignored");
    }
}

pub fn get_actor_id() -> String {
    with_current(|s| read(&s.actor_id).clone()).unwrap_or_default()
}

pub fn set_headers(headers: HashMap<String, String>) {
    if with_current(|s| *write(&s.headers) = headers).is_none() {
        tracing::trace!("set_headers called outside a request scope; ignored");
    }
}

pub fn get_headers() -> HashMap<String, String> {
    with_current(|s| read(&s.headers).clone()).unwrap_or_default()
}
