//! Audit trail for security-relevant events.
//!
//! Events are write-only. The logger never fails the request path: a sink
//! error is reported with `warn!` and dropped. Detail values under names that
//! usually carry secrets are replaced before the event reaches any sink.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use ulid::Ulid;

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_DETAILS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "raw_key",
    "authorization",
    "csrf_token",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Authentication,
    Authorization,
    ApiKey,
    Session,
    User,
    Admission,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::ApiKey => "api_key",
            Self::Session => "session",
            Self::User => "user",
            Self::Admission => "admission",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failure => "failure",
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub id: String,
    pub event_type: AuditEventType,
    pub action: String,
    pub outcome: AuditOutcome,
    pub resource: Option<String>,
    pub user_id: Option<String>,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub details: BTreeMap<String, String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(event_type: AuditEventType, action: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            id: Ulid::new().to_string(),
            event_type,
            action: action.into(),
            outcome,
            resource: None,
            user_id: None,
            origin: None,
            user_agent: None,
            timestamp: Utc::now(),
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn origin(mut self, origin: Option<&str>) -> Self {
        self.origin = origin.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = user_agent.map(ToString::to_string);
        self
    }

    #[must_use]
    pub fn detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    fn redact(&mut self) {
        for (key, value) in &mut self.details {
            let key = key.to_ascii_lowercase();
            if SENSITIVE_DETAILS.iter().any(|s| key == *s) {
                *value = REDACTED.to_string();
            }
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    /// Persist or forward one event.
    fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Emits each event as a structured `tracing` event on target `audit`.
#[derive(Clone, Debug)]
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        let details = serde_json::to_string(&event.details)?;
        info!(
            target: "audit",
            id = %event.id,
            event_type = %event.event_type,
            action = %event.action,
            outcome = %event.outcome,
            resource = event.resource.as_deref().unwrap_or("-"),
            user_id = event.user_id.as_deref().unwrap_or("-"),
            origin = event.origin.as_deref().unwrap_or("-"),
            user_agent = event.user_agent.as_deref().unwrap_or("-"),
            timestamp = %event.timestamp.to_rfc3339(),
            details = %details,
            "audit"
        );
        Ok(())
    }
}

/// Keeps events in memory; used by tests and embedders that ship events elsewhere.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("audit buffer lock poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

/// Cheap to clone handle shared by every component that audits.
#[derive(Clone)]
pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
}

impl fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLogger").finish_non_exhaustive()
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(Arc::new(LogAuditSink))
    }
}

impl AuditLogger {
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Record an event. Sink failures are logged and swallowed.
    pub fn log(&self, mut event: AuditEvent) {
        event.redact();
        if let Err(err) = self.sink.record(&event) {
            warn!(
                event_id = %event.id,
                action = %event.action,
                "failed to record audit event: {err:#}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&self, _event: &AuditEvent) -> Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    #[test]
    fn builder_sets_fields() {
        let event = AuditEvent::new(AuditEventType::ApiKey, "issue", AuditOutcome::Success)
            .resource("api_key")
            .user("u1")
            .origin(Some("10.0.0.1"))
            .user_agent(None)
            .detail("key_id", "k1");
        assert_eq!(event.action, "issue");
        assert_eq!(event.resource.as_deref(), Some("api_key"));
        assert_eq!(event.user_id.as_deref(), Some("u1"));
        assert_eq!(event.origin.as_deref(), Some("10.0.0.1"));
        assert!(event.user_agent.is_none());
        assert_eq!(event.details.get("key_id").map(String::as_str), Some("k1"));
    }

    #[test]
    fn memory_sink_collects_and_redacts() {
        let sink = Arc::new(MemoryAuditSink::new());
        let logger = AuditLogger::new(sink.clone());
        logger.log(
            AuditEvent::new(
                AuditEventType::Authentication,
                "login",
                AuditOutcome::Failure,
            )
            .detail("password", "hunter2")
            .detail("reason", "bad password"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.details.get("password").map(String::as_str), Some(REDACTED));
        assert_eq!(
            event.details.get("reason").map(String::as_str),
            Some("bad password")
        );
    }

    #[test]
    fn sink_failure_is_swallowed() {
        let logger = AuditLogger::new(Arc::new(FailingSink));
        logger.log(AuditEvent::new(
            AuditEventType::Admission,
            "rate_limit",
            AuditOutcome::Failure,
        ));
    }

    #[test]
    fn log_sink_accepts_events() {
        assert!(LogAuditSink
            .record(&AuditEvent::new(
                AuditEventType::User,
                "create",
                AuditOutcome::Success
            ))
            .is_ok());
    }
}
