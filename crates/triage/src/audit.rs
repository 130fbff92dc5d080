use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub subject: String,
    pub outcome: String,
    pub webhook_event: Option<String>,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: &str, subject: &str, outcome: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            subject: subject.to_string(),
            outcome: outcome.to_string(),
            webhook_event: None,
            error: None,
        }
    }

    pub fn with_webhook_event(mut self, event: &str) -> Self {
        self.webhook_event = Some(event.to_string());
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Append-only JSON-lines trail of triage actions.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn write(&self, event: &AuditEvent) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;
        tracing::debug!(event_type=%event.event_type, subject=%event.subject, "Audit event written");
        Ok(())
    }

    /// Best effort: a failed audit write never fails the action being audited.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.write(&event) {
            tracing::warn!(path = %self.path.display(), error = %e, "audit write failed");
        }
    }
}
