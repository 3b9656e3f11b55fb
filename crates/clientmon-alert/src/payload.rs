use clientmon_common::types::{NotificationType, TriggerType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Notification content derived from a trigger and its event data.
///
/// Each trigger type has a typed variant; event data that does not fit the
/// typed shape falls back to [`AlertPayload::Generic`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertPayload {
    HealthCheckFailure {
        consecutive_failures: i64,
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    HighErrorRate {
        error_rate: f64,
        #[serde(default)]
        total_requests: Option<i64>,
        #[serde(default)]
        date: Option<String>,
    },
    ResponseTimeThreshold {
        response_time_ms: f64,
        #[serde(default)]
        url: Option<String>,
    },
    TokenUsageSpike {
        token_requests: i64,
        #[serde(default)]
        baseline: Option<f64>,
        #[serde(default)]
        date: Option<String>,
    },
    MaintenanceMode {
        entering: bool,
        #[serde(default)]
        reason: Option<String>,
    },
    SecurityEvent {
        event: String,
        #[serde(default)]
        description: Option<String>,
    },
    ClientInactive {
        days_inactive: i64,
    },
    Generic {
        trigger_type: TriggerType,
        data: Value,
    },
}

impl AlertPayload {
    /// Builds the typed payload for `trigger`, or a generic one when `data`
    /// lacks the fields the typed payload needs.
    pub fn from_event(trigger: TriggerType, data: &Value) -> Self {
        let kind = trigger.as_str();
        let mut tagged = match data {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        tagged.insert("kind".to_string(), Value::String(kind.to_string()));
        match serde_json::from_value::<AlertPayload>(Value::Object(tagged)) {
            Ok(payload) if payload.trigger_type() == trigger => payload,
            _ => AlertPayload::Generic {
                trigger_type: trigger,
                data: data.clone(),
            },
        }
    }

    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::HealthCheckFailure { .. } => TriggerType::HealthCheckFailure,
            Self::HighErrorRate { .. } => TriggerType::HighErrorRate,
            Self::ResponseTimeThreshold { .. } => TriggerType::ResponseTimeThreshold,
            Self::TokenUsageSpike { .. } => TriggerType::TokenUsageSpike,
            Self::MaintenanceMode { .. } => TriggerType::MaintenanceMode,
            Self::SecurityEvent { .. } => TriggerType::SecurityEvent,
            Self::ClientInactive { .. } => TriggerType::ClientInactive,
            Self::Generic { trigger_type, .. } => *trigger_type,
        }
    }

    pub fn notification_type(&self) -> NotificationType {
        match self {
            Self::HealthCheckFailure { .. } | Self::SecurityEvent { .. } => {
                NotificationType::Critical
            }
            Self::HighErrorRate { .. } => NotificationType::Alert,
            Self::ResponseTimeThreshold { .. } | Self::TokenUsageSpike { .. } => {
                NotificationType::Warning
            }
            Self::MaintenanceMode { .. } | Self::ClientInactive { .. } => NotificationType::Info,
            Self::Generic { trigger_type, .. } => match trigger_type {
                TriggerType::HealthCheckFailure | TriggerType::SecurityEvent => {
                    NotificationType::Critical
                }
                TriggerType::HighErrorRate => NotificationType::Alert,
                TriggerType::ResponseTimeThreshold | TriggerType::TokenUsageSpike => {
                    NotificationType::Warning
                }
                TriggerType::MaintenanceMode | TriggerType::ClientInactive => {
                    NotificationType::Info
                }
            },
        }
    }

    pub fn title(&self, client_name: &str) -> String {
        match self {
            Self::HealthCheckFailure { .. } => format!("Health check failing for {client_name}"),
            Self::HighErrorRate { .. } => format!("High error rate for {client_name}"),
            Self::ResponseTimeThreshold { .. } => format!("Slow responses from {client_name}"),
            Self::TokenUsageSpike { .. } => format!("Token usage spike for {client_name}"),
            Self::MaintenanceMode { entering: true, .. } => {
                format!("{client_name} entered maintenance mode")
            }
            Self::MaintenanceMode { entering: false, .. } => {
                format!("{client_name} left maintenance mode")
            }
            Self::SecurityEvent { event, .. } => format!("Security event for {client_name}: {event}"),
            Self::ClientInactive { .. } => format!("{client_name} is inactive"),
            Self::Generic { trigger_type, .. } => {
                format!("Alert for {client_name}: {trigger_type}")
            }
        }
    }

    pub fn message(&self, client_name: &str) -> String {
        match self {
            Self::HealthCheckFailure {
                consecutive_failures,
                status_code,
                error,
                ..
            } => {
                let cause = match (status_code, error) {
                    (Some(code), _) => format!(" (last status HTTP {code})"),
                    (None, Some(err)) => format!(" (last error: {err})"),
                    (None, None) => String::new(),
                };
                format!(
                    "{client_name} has failed {consecutive_failures} consecutive health check(s){cause}."
                )
            }
            Self::HighErrorRate {
                error_rate,
                total_requests,
                ..
            } => match total_requests {
                Some(total) => format!(
                    "{client_name} error rate is {error_rate:.1}% over {total} request(s)."
                ),
                None => format!("{client_name} error rate is {error_rate:.1}%."),
            },
            Self::ResponseTimeThreshold {
                response_time_ms, ..
            } => format!("{client_name} responded in {response_time_ms:.0} ms."),
            Self::TokenUsageSpike {
                token_requests,
                baseline,
                ..
            } => match baseline {
                Some(base) => format!(
                    "{client_name} made {token_requests} token request(s) against a baseline of {base:.1}."
                ),
                None => format!("{client_name} made {token_requests} token request(s)."),
            },
            Self::MaintenanceMode { entering, reason } => {
                let action = if *entering { "entered" } else { "left" };
                match reason {
                    Some(reason) => format!("{client_name} {action} maintenance mode: {reason}"),
                    None => format!("{client_name} {action} maintenance mode."),
                }
            }
            Self::SecurityEvent { event, description } => match description {
                Some(description) => format!("{event}: {description}"),
                None => format!("Security event '{event}' recorded for {client_name}."),
            },
            Self::ClientInactive { days_inactive } => {
                format!("{client_name} has had no activity for {days_inactive} day(s).")
            }
            Self::Generic { trigger_type, .. } => {
                format!("Alert rule for '{trigger_type}' matched on {client_name}.")
            }
        }
    }
}
