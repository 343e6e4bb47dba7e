//! Audit events. The vault emits them; storing and querying them is the
//! sink's business.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub actor_id: String,
    /// e.g. `cr.merge`, `file.stage_edit`
    pub action: String,
    /// `change_set`, `file` or `folder`
    pub resource_type: String,
    pub resource_id: String,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        actor_id: &str,
        action: impl Into<String>,
        resource_type: &str,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            action: action.into(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.into(),
            details: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits each event as a structured log line under the `audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = Value::Object(event.details);
        tracing::info!(
            target: "audit",
            actor_id = %event.actor_id,
            action = %event.action,
            resource_type = %event.resource_type,
            resource_id = %event.resource_id,
            details = %details,
            timestamp = %event.timestamp.to_rfc3339(),
            "audit"
        );
    }
}

/// Keeps events in memory. Used by tests to assert on emitted events.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.action).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
