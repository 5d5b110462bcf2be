//! Entity change events and their capture.
//!
//! # Responsibilities
//! - Classify a pending write as INSERT, UPDATE or DELETE
//! - Diff committed against current column values
//! - Attach the request's correlation data and hand the payload to delivery
//!
//! # Design Decisions
//! - Classification asks the persistence layer through [`RowLookup`] instead
//!   of querying a session mid-flush
//! - UPDATE diffs always carry every mapped column on both sides; a column
//!   with no committed value reads as its current value
//! - Without a request scope or an owning session nothing is captured

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use crate::audit::delivery::{AuditPayload, AuditSink};
use crate::capture::entity::EntitySnapshot;
use crate::capture::hooks::{LifecycleHooks, RowLookup};
use crate::context;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("{0} entity is not attached to a session")]
    Detached(String),

    #[error("no request scope is active")]
    NoRequestScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        })
    }
}

/// One captured entity change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub entity_type: String,
    pub operation: Operation,
    pub before: BTreeMap<String, String>,
    pub after: BTreeMap<String, String>,
    pub correlation_id: String,
    pub actor_headers: HashMap<String, String>,
    pub actor_id: Option<String>,
}

impl ChangeEvent {
    pub fn into_payload(self, system_id: &str) -> AuditPayload {
        AuditPayload {
            correlation_id: self.correlation_id,
            system_id: system_id.to_string(),
            entity_type: self.entity_type,
            operation: self.operation.to_string(),
            before: self.before,
            after: self.after,
            headers: self.actor_headers,
            actor_id: self.actor_id,
            recorded_at: Utc::now(),
        }
    }
}

/// INSERT when the entity has no identity or its row is not persisted yet.
pub fn classify(entity: &EntitySnapshot, rows: &dyn RowLookup) -> Operation {
    match entity.id {
        Some(id) if rows.exists(&entity.entity_type, id) => Operation::Update,
        _ => Operation::Insert,
    }
}

/// Build the change event for `entity` from the current request scope.
pub fn build_event(entity: &EntitySnapshot, operation: Operation) -> Result<ChangeEvent, CaptureError> {
    if !entity.attached {
        return Err(CaptureError::Detached(entity.entity_type.clone()));
    }
    let scope = context::current().ok_or(CaptureError::NoRequestScope)?;

    let (before, after) = match operation {
        Operation::Insert => (BTreeMap::new(), entity.current.clone()),
        Operation::Update => {
            let before = entity
                .current
                .iter()
                .map(|(column, current)| {
                    let committed = entity.committed.get(column).unwrap_or(current);
                    (column.clone(), committed.clone())
                })
                .collect();
            (before, entity.current.clone())
        }
        Operation::Delete => (entity.current.clone(), BTreeMap::new()),
    };

    Ok(ChangeEvent {
        entity_type: entity.entity_type.clone(),
        operation,
        before,
        after,
        correlation_id: scope.trace_id,
        actor_headers: scope.headers,
        actor_id: (!scope.actor_id.is_empty()).then_some(scope.actor_id),
    })
}

/// Lifecycle hooks that turn entity writes into audit deliveries.
pub struct ChangeCapture {
    sink: Arc<dyn AuditSink>,
    system_id: String,
}

impl ChangeCapture {
    pub fn new(sink: Arc<dyn AuditSink>, system_id: impl Into<String>) -> Self {
        Self {
            sink,
            system_id: system_id.into(),
        }
    }

    /// Capture one change. Returns the event handed to delivery, if any.
    pub fn capture(&self, entity: &EntitySnapshot, operation: Operation) -> Option<ChangeEvent> {
        let event = match build_event(entity, operation) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(entity_type = %entity.entity_type, reason = %e, "Change not audited");
                return None;
            }
        };

        tracing::debug!(
            entity_type = %event.entity_type,
            operation = %event.operation,
            correlation_id = %event.correlation_id,
            "Entity change captured"
        );
        let authorization = context::get_authorization();
        self.sink
            .dispatch(event.clone().into_payload(&self.system_id), &authorization);
        Some(event)
    }
}

impl LifecycleHooks for ChangeCapture {
    fn before_insert(&self, entity: &EntitySnapshot, rows: &dyn RowLookup) {
        self.capture(entity, classify(entity, rows));
    }

    fn before_update(&self, entity: &EntitySnapshot, rows: &dyn RowLookup) {
        self.capture(entity, classify(entity, rows));
    }

    fn before_delete(&self, entity: &EntitySnapshot, _rows: &dyn RowLookup) {
        self.capture(entity, Operation::Delete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestScope;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(AuditPayload, String)>>,
    }

    impl AuditSink for Recording {
        fn dispatch(&self, payload: AuditPayload, authorization: &str) {
            self.sent.lock().unwrap().push((payload, authorization.to_string()));
        }
    }

    struct Rows(Vec<i64>);

    impl RowLookup for Rows {
        fn exists(&self, _entity_type: &str, id: i64) -> bool {
            self.0.contains(&id)
        }
    }

    fn columns(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn snapshot(id: Option<i64>, committed: &[(&str, &str)], current: &[(&str, &str)]) -> EntitySnapshot {
        EntitySnapshot {
            entity_type: "Passenger".to_string(),
            id,
            committed: columns(committed),
            current: columns(current),
            attached: true,
        }
    }

    #[test]
    fn test_classify() {
        let rows = Rows(vec![42]);
        assert_eq!(classify(&snapshot(None, &[], &[]), &rows), Operation::Insert);
        assert_eq!(classify(&snapshot(Some(7), &[], &[]), &rows), Operation::Insert);
        assert_eq!(classify(&snapshot(Some(42), &[], &[]), &rows), Operation::Update);
    }

    #[test]
    fn test_update_diff_has_identical_keys() {
        let entity = snapshot(
            Some(42),
            &[("weight", "70.0")],
            &[("id", "42"), ("name", "Ada"), ("weight", "72.5")],
        );
        let event = context::sync_scope(RequestScope::with_trace_id("trace-1"), || {
            build_event(&entity, Operation::Update)
        })
        .unwrap();

        assert_eq!(event.before["weight"], "70.0");
        assert_eq!(event.after["weight"], "72.5");
        assert_eq!(event.before["name"], "Ada");
        assert!(event.before.keys().eq(event.after.keys()));
        assert_eq!(event.correlation_id, "trace-1");
    }

    #[test]
    fn test_insert_and_delete_sides() {
        let entity = snapshot(None, &[], &[("id", "None"), ("name", "Ada")]);
        let (insert, delete) = context::sync_scope(RequestScope::new(), || {
            (
                build_event(&entity, Operation::Insert).unwrap(),
                build_event(&entity, Operation::Delete).unwrap(),
            )
        });

        assert!(insert.before.is_empty());
        assert_eq!(insert.after, entity.current);
        assert_eq!(delete.before, entity.current);
        assert!(delete.after.is_empty());
    }

    #[test]
    fn test_no_scope_or_detached_is_noop() {
        let sink = Arc::new(Recording::default());
        let capture = ChangeCapture::new(sink.clone(), "sys");
        let rows = Rows(Vec::new());

        capture.before_insert(&snapshot(None, &[], &[("name", "Ada")]), &rows);

        let mut detached = snapshot(None, &[], &[("name", "Ada")]);
        detached.attached = false;
        assert_eq!(
            context::sync_scope(RequestScope::new(), || build_event(&detached, Operation::Insert)),
            Err(CaptureError::Detached("Passenger".to_string()))
        );

        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_capture_dispatches_with_authorization() {
        let sink = Arc::new(Recording::default());
        let capture = ChangeCapture::new(sink.clone(), "sys-9");

        context::sync_scope(RequestScope::new(), || {
            context::set_authorization("Bearer tok");
            context::set_actor_id("user-1");
            capture.before_delete(&snapshot(Some(3), &[], &[("id", "3")]), &Rows(vec![3]));
        });

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (payload, authorization) = &sent[0];
        assert_eq!(authorization, "Bearer tok");
        assert_eq!(payload.operation, "DELETE");
        assert_eq!(payload.system_id, "sys-9");
        assert_eq!(payload.actor_id.as_deref(), Some("user-1"));
    }
}
