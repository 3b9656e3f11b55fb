use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use clientmon_common::types::{Client, EventSeverity, EventType, HealthStatus};
use clientmon_storage::{EventLogger, HealthUpdate, MonitorStore};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    /// Health checking is off for the client or it has no URL; nothing was written.
    Disabled,
    Healthy,
    Unhealthy,
    Error,
}

impl ProbeStatus {
    fn health_status(self) -> Option<HealthStatus> {
        match self {
            Self::Disabled => None,
            Self::Healthy => Some(HealthStatus::Healthy),
            Self::Unhealthy => Some(HealthStatus::Unhealthy),
            Self::Error => Some(HealthStatus::Error),
        }
    }
}

/// Result of one probe. Transport faults are reported here, never as an `Err`.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub status: ProbeStatus,
    pub message: String,
    pub response_time_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub url: Option<String>,
    /// Consecutive failures after this probe was recorded.
    pub consecutive_failures: i64,
}

impl ProbeOutcome {
    fn disabled(client: &Client) -> Self {
        Self {
            status: ProbeStatus::Disabled,
            message: "health check disabled".to_string(),
            response_time_ms: None,
            status_code: None,
            url: None,
            consecutive_failures: client.health_check_failures,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, ProbeStatus::Unhealthy | ProbeStatus::Error)
    }
}

/// Probes client health endpoints over HTTP and records the outcome.
pub struct HealthChecker {
    http: reqwest::Client,
    store: Arc<MonitorStore>,
    events: EventLogger,
}

impl HealthChecker {
    pub fn new(
        store: Arc<MonitorStore>,
        connect_timeout: Duration,
        timeout: Duration,
        use_system_proxy: bool,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .user_agent(concat!("clientmon-health-checker/", env!("CARGO_PKG_VERSION")));
        if !use_system_proxy {
            builder = builder.no_proxy();
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            events: EventLogger::new(store.clone()),
            store,
        })
    }

    /// Probes `client` and writes the result to its health fields and the
    /// event log. Clients without a probe target are left untouched.
    pub async fn probe(&self, client: &Client) -> ProbeOutcome {
        let Some(url) = client.probe_target() else {
            return ProbeOutcome::disabled(client);
        };
        let mut outcome = self.request(url).await;
        let checked_at = Utc::now();
        outcome.consecutive_failures = match outcome.status {
            ProbeStatus::Healthy => 0,
            _ => client.health_check_failures + 1,
        };
        self.record(client, &mut outcome, checked_at);
        outcome
    }

    async fn request(&self, url: &str) -> ProbeOutcome {
        let started = Instant::now();
        let result = self.http.get(url).send().await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (status, message, response_time_ms, status_code) = match result {
            Ok(response) => {
                let code = response.status();
                let status = if code.is_success() {
                    ProbeStatus::Healthy
                } else {
                    ProbeStatus::Unhealthy
                };
                (status, format!("HTTP {code}"), Some(elapsed_ms), Some(code.as_u16()))
            }
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("request timed out: {e}")
                } else if e.is_connect() {
                    format!("connection failed: {e}")
                } else {
                    format!("request failed: {e}")
                };
                (ProbeStatus::Error, message, None, None)
            }
        };

        ProbeOutcome {
            status,
            message,
            response_time_ms,
            status_code,
            url: Some(url.to_string()),
            consecutive_failures: 0,
        }
    }

    fn record(&self, client: &Client, outcome: &mut ProbeOutcome, checked_at: DateTime<Utc>) {
        let Some(health_status) = outcome.status.health_status() else {
            return;
        };
        let update = HealthUpdate {
            status: health_status,
            error_message: Some(outcome.message.clone()),
            checked_at,
        };
        match self.store.record_health_result(&client.id, &update) {
            Ok(Some(updated)) => outcome.consecutive_failures = updated.health_check_failures,
            Ok(None) => {
                tracing::warn!(client_id = %client.id, "Client vanished before health result was stored");
            }
            Err(e) => {
                tracing::error!(client_id = %client.id, error = %e, "Failed to store health result");
            }
        }

        let mut metadata = json!({
            "url": outcome.url,
            "status_code": outcome.status_code,
            "response_time_ms": outcome.response_time_ms,
            "consecutive_failures": outcome.consecutive_failures,
        });
        let recovered = outcome.status == ProbeStatus::Healthy && client.health_check_failures > 0;
        if recovered {
            metadata["recovered_after_failures"] = Value::from(client.health_check_failures);
            metadata["previous_status"] = Value::from(client.health_status.as_str());
        }

        let (event_type, event_name, severity, description) = match outcome.status {
            ProbeStatus::Healthy if recovered => (
                EventType::HealthUp,
                "health_check_recovered",
                EventSeverity::Medium,
                format!(
                    "{} recovered after {} failed check(s)",
                    client.name, client.health_check_failures
                ),
            ),
            ProbeStatus::Healthy => (
                EventType::HealthUp,
                "health_check_passed",
                EventSeverity::Low,
                format!("{} is healthy ({})", client.name, outcome.message),
            ),
            ProbeStatus::Unhealthy => (
                EventType::HealthDown,
                "health_check_failed",
                EventSeverity::High,
                format!("{} is unhealthy ({})", client.name, outcome.message),
            ),
            _ => (
                EventType::ErrorOccurred,
                "health_check_error",
                EventSeverity::High,
                format!("{} could not be probed: {}", client.name, outcome.message),
            ),
        };
        self.events
            .record(&client.id, event_type, event_name, severity, description, metadata);

        match outcome.status {
            ProbeStatus::Healthy => tracing::info!(
                client_id = %client.id,
                response_time_ms = ?outcome.response_time_ms,
                recovered,
                "Health check passed"
            ),
            _ => tracing::warn!(
                client_id = %client.id,
                status = ?outcome.status,
                status_code = ?outcome.status_code,
                failures = outcome.consecutive_failures,
                message = %outcome.message,
                "Health check failed"
            ),
        }
    }
}
