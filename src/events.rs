//! Audit event emission for session lifecycle milestones.
//!
//! Events fan out to configured sinks (structured log, optional webhook).
//! Delivery is fire-and-forget: a failing sink is logged and never blocks
//! or fails the execution path that produced the event.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::AuditConfig;
use crate::security::RiskAssessment;
use crate::session::{SessionId, SessionState};

/// Kind of audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A session was created and admitted past the security gate.
    SessionCreated,
    /// A session's tool process was launched.
    ExecutionStart,
    /// A session reached a terminal state.
    ExecutionEnd,
    /// A submission was rejected for exceeding the block threshold.
    BlockedHighRisk,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuditKind::SessionCreated => "session_created",
            AuditKind::ExecutionStart => "execution_start",
            AuditKind::ExecutionEnd => "execution_end",
            AuditKind::BlockedHighRisk => "blocked_high_risk",
        };
        write!(f, "{name}")
    }
}

/// A single audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// What happened.
    pub kind: AuditKind,
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// When the event was recorded (RFC 3339).
    pub timestamp: String,
    /// Event-specific detail.
    pub payload: serde_json::Value,
}

impl AuditEvent {
    fn new(kind: AuditKind, session_id: SessionId, payload: serde_json::Value) -> Self {
        Self {
            kind,
            session_id,
            timestamp: Utc::now().to_rfc3339(),
            payload,
        }
    }

    /// Event for a session admitted past the security gate.
    pub fn session_created(
        session_id: SessionId,
        engine: &str,
        risk: &RiskAssessment,
        flagged: bool,
        file_count: usize,
    ) -> Self {
        Self::new(
            AuditKind::SessionCreated,
            session_id,
            json!({
                "engine": engine,
                "risk_score": risk.score,
                "flagged": flagged,
                "files": file_count,
            }),
        )
    }

    /// Event for a launched tool process.
    pub fn execution_start(
        session_id: SessionId,
        engine: &str,
        entrypoint: Option<&str>,
        port: Option<u16>,
    ) -> Self {
        Self::new(
            AuditKind::ExecutionStart,
            session_id,
            json!({
                "engine": engine,
                "entrypoint": entrypoint,
                "port": port,
            }),
        )
    }

    /// Event for a session reaching a terminal state.
    pub fn execution_end(
        session_id: SessionId,
        state: SessionState,
        exit_code: Option<i32>,
    ) -> Self {
        Self::new(
            AuditKind::ExecutionEnd,
            session_id,
            json!({
                "state": state.to_string(),
                "exit_code": exit_code,
            }),
        )
    }

    /// Event for a submission blocked by the security gate.
    pub fn blocked_high_risk(session_id: SessionId, risk: &RiskAssessment, threshold: u8) -> Self {
        let rules: Vec<&str> = risk.findings.iter().map(|f| f.pattern.as_str()).collect();
        Self::new(
            AuditKind::BlockedHighRisk,
            session_id,
            json!({
                "risk_score": risk.score,
                "threshold": threshold,
                "rules": rules,
            }),
        )
    }
}

/// Destination for audit events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Implementations log their own failures.
    async fn deliver(&self, event: &AuditEvent);
}

/// Fans events out to every configured sink.
#[derive(Clone)]
pub struct Auditor {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl Auditor {
    /// Build an auditor from an explicit sink list.
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    /// Build the default sink set for a configuration: always the log sink,
    /// plus a webhook sink when a URL is configured.
    pub fn from_config(config: &AuditConfig) -> Self {
        let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(LogSink)];
        if let Some(ref url) = config.webhook_url {
            if url.starts_with("http://") || url.starts_with("https://") {
                sinks.push(Arc::new(WebhookSink::new(url.clone())));
            } else {
                warn!("Ignoring audit webhook URL without http(s) scheme: {}", url);
            }
        }
        Self { sinks }
    }

    /// Emit one event to all sinks.
    pub async fn emit(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.deliver(&event).await;
        }
    }
}

/// Sink that writes events to the structured log.
pub struct LogSink;

#[async_trait]
impl EventSink for LogSink {
    async fn deliver(&self, event: &AuditEvent) {
        info!(
            "audit {} session={} payload={}",
            event.kind, event.session_id, event.payload
        );
    }
}

/// Sink that POSTs events to an external collector.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    /// Create a sink for the given endpoint URL.
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

/// Send one payload with exponential backoff retry.
///
/// Retries up to 3 times with delays of 2s, 4s on transient failures
/// (network errors, 5xx responses, 429 rate limits).
async fn post_with_retry(
    client: reqwest::Client,
    url: String,
    payload: serde_json::Value,
) -> Result<(), String> {
    let max_attempts = 3;
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay_secs = 1u64 << attempt;
            debug!(
                "Audit webhook retry attempt {} after {}s delay",
                attempt + 1,
                delay_secs
            );
            tokio::time::sleep(std::time::Duration::from_secs(delay_secs)).await;
        }

        match client.post(&url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    debug!("Audit webhook delivered");
                    return Ok(());
                }

                let status = response.status();
                let body = response.text().await.unwrap_or_default();

                // Retry on 5xx server errors and 429 rate limit
                if status.is_server_error() || status.as_u16() == 429 {
                    last_error = Some(format!("webhook returned {status}: {body}"));
                    continue;
                }

                // Don't retry client errors (4xx except 429)
                return Err(format!("webhook returned error status {status}: {body}"));
            }
            Err(e) => {
                // Retry on network errors
                last_error = Some(e.to_string());
            }
        }
    }

    Err(format!(
        "webhook failed after {max_attempts} attempts: {}",
        last_error.unwrap_or_else(|| "unknown error".to_string())
    ))
}

#[async_trait]
impl EventSink for WebhookSink {
    /// Spawns the HTTP delivery so retries never stall the caller.
    async fn deliver(&self, event: &AuditEvent) {
        let payload = json!({
            "event": event.kind,
            "session_id": event.session_id,
            "timestamp": event.timestamp,
            "payload": event.payload,
        });
        debug!("Sending audit webhook to {}: {:?}", self.url, payload);

        let kind = event.kind;
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            if let Err(e) = post_with_retry(client, url, payload).await {
                warn!("Failed to deliver {kind} audit event: {e}");
            }
        });
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::RecordingSink;
    use super::*;
    use crate::security::{Finding, Severity};

    fn sample_risk() -> RiskAssessment {
        RiskAssessment {
            score: 80,
            findings: vec![
                Finding {
                    file: "tool.py".to_string(),
                    pattern: "shell-exec".to_string(),
                    severity: Severity::Critical,
                },
                Finding {
                    file: "tool.py".to_string(),
                    pattern: "fs-destroy".to_string(),
                    severity: Severity::Critical,
                },
            ],
            recommendations: vec![],
        }
    }

    #[test]
    fn test_kind_display_uses_snake_case() {
        assert_eq!(AuditKind::SessionCreated.to_string(), "session_created");
        assert_eq!(AuditKind::ExecutionStart.to_string(), "execution_start");
        assert_eq!(AuditKind::ExecutionEnd.to_string(), "execution_end");
        assert_eq!(AuditKind::BlockedHighRisk.to_string(), "blocked_high_risk");
    }

    #[test]
    fn test_session_created_carries_risk_and_engine() {
        let id = SessionId::new();
        let event = AuditEvent::session_created(id, "python", &sample_risk(), true, 2);
        assert_eq!(event.kind, AuditKind::SessionCreated);
        assert_eq!(event.session_id, id);
        assert_eq!(event.payload["engine"], "python");
        assert_eq!(event.payload["risk_score"], 80);
        assert_eq!(event.payload["flagged"], true);
        assert_eq!(event.payload["files"], 2);
    }

    #[test]
    fn test_execution_end_records_state_and_exit_code() {
        let event = AuditEvent::execution_end(SessionId::new(), SessionState::Failed, Some(3));
        assert_eq!(event.payload["state"], "failed");
        assert_eq!(event.payload["exit_code"], 3);
    }

    #[test]
    fn test_execution_end_tolerates_missing_exit_code() {
        let event = AuditEvent::execution_end(SessionId::new(), SessionState::Stopped, None);
        assert_eq!(event.payload["state"], "stopped");
        assert!(event.payload["exit_code"].is_null());
    }

    #[test]
    fn test_blocked_event_lists_triggered_rules() {
        let event = AuditEvent::blocked_high_risk(SessionId::new(), &sample_risk(), 70);
        assert_eq!(event.kind, AuditKind::BlockedHighRisk);
        assert_eq!(event.payload["threshold"], 70);
        assert_eq!(event.payload["rules"][0], "shell-exec");
        assert_eq!(event.payload["rules"][1], "fs-destroy");
    }

    #[test]
    fn test_events_have_rfc3339_timestamps() {
        let event = AuditEvent::execution_start(SessionId::new(), "node", Some("index.js"), None);
        assert!(chrono::DateTime::parse_from_rfc3339(&event.timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_auditor_fans_out_to_all_sinks() {
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        let auditor = Auditor::new(vec![first.clone(), second.clone()]);

        let id = SessionId::new();
        auditor
            .emit(AuditEvent::execution_start(id, "go", None, Some(8080)))
            .await;
        auditor
            .emit(AuditEvent::execution_end(id, SessionState::Completed, Some(0)))
            .await;

        assert_eq!(
            first.kinds(),
            vec![AuditKind::ExecutionStart, AuditKind::ExecutionEnd]
        );
        assert_eq!(first.kinds(), second.kinds());
        assert_eq!(first.events()[0].payload["port"], 8080);
    }

    #[tokio::test]
    async fn test_from_config_ignores_schemeless_webhook() {
        let config = AuditConfig {
            webhook_url: Some("not-a-url".to_string()),
        };
        let auditor = Auditor::from_config(&config);
        // Only the log sink remains; delivery must not panic.
        auditor
            .emit(AuditEvent::execution_end(
                SessionId::new(),
                SessionState::Completed,
                Some(0),
            ))
            .await;
        assert_eq!(auditor.sinks.len(), 1);
    }

    #[tokio::test]
    async fn test_log_sink_delivery_is_infallible() {
        let auditor = Auditor::from_config(&AuditConfig::default());
        auditor
            .emit(AuditEvent::session_created(
                SessionId::new(),
                "static",
                &sample_risk(),
                false,
                1,
            ))
            .await;
    }
}
