use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clientmon_alert::AlertRuleEngine;
use clientmon_common::types::{TriggerType, UsageRecord};
use clientmon_storage::MonitorStore;
use serde::Serialize;
use serde_json::json;

/// Usage summed over a date range for one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientUsageTotals {
    pub client_id: String,
    pub days: usize,
    pub authorization_requests: i64,
    pub successful_authorizations: i64,
    pub failed_authorizations: i64,
    pub token_requests: i64,
    pub successful_tokens: i64,
    pub failed_tokens: i64,
    pub api_calls: i64,
    pub bytes_transferred: i64,
    /// Sum of daily distinct users, so a user active on two days counts twice.
    pub unique_user_days: i64,
    pub peak_concurrent_users: i64,
    pub error_count: i64,
}

impl ClientUsageTotals {
    fn add(&mut self, record: &UsageRecord) {
        self.days += 1;
        self.authorization_requests += record.authorization_requests;
        self.successful_authorizations += record.successful_authorizations;
        self.failed_authorizations += record.failed_authorizations;
        self.token_requests += record.token_requests;
        self.successful_tokens += record.successful_tokens;
        self.failed_tokens += record.failed_tokens;
        self.api_calls += record.api_calls;
        self.bytes_transferred += record.bytes_transferred;
        self.unique_user_days += record.unique_users;
        self.peak_concurrent_users = self.peak_concurrent_users.max(record.peak_concurrent_users);
        self.error_count += record.error_count;
    }

    pub fn error_rate_percent(&self) -> Option<f64> {
        let total = self.authorization_requests + self.token_requests;
        if total == 0 {
            return None;
        }
        Some((self.failed_authorizations + self.failed_tokens) as f64 * 100.0 / total as f64)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregationReport {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub clients: Vec<ClientUsageTotals>,
    pub inactive_clients: usize,
    pub notifications: usize,
}

/// Rolls daily usage up over a date range and raises the usage-based triggers.
pub struct UsageAggregator {
    store: Arc<MonitorStore>,
    engine: Arc<AlertRuleEngine>,
    error_rate_min_requests: i64,
    inactive_after_days: i64,
}

impl UsageAggregator {
    pub fn new(
        store: Arc<MonitorStore>,
        engine: Arc<AlertRuleEngine>,
        error_rate_min_requests: i64,
        inactive_after_days: i64,
    ) -> Self {
        Self {
            store,
            engine,
            error_rate_min_requests,
            inactive_after_days,
        }
    }

    pub async fn aggregate(&self, from: NaiveDate, to: NaiveDate) -> Result<AggregationReport> {
        self.aggregate_at(from, to, Utc::now()).await
    }

    /// Totals every client's usage for `from..=to`.
    ///
    /// For each client and day this evaluates `high_error_rate` once the day
    /// has at least `error_rate_min_requests` requests, and `token_usage_spike`
    /// against the mean of the earlier days in the range. Active clients idle
    /// for `inactive_after_days` raise `client_inactive`.
    pub async fn aggregate_at(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<AggregationReport> {
        if from > to {
            bail!("invalid date range: {from} is after {to}");
        }

        let mut by_client: BTreeMap<String, Vec<UsageRecord>> = BTreeMap::new();
        for record in self.store.list_usage_records(None, from, to)? {
            by_client
                .entry(record.client_id.clone())
                .or_default()
                .push(record);
        }

        let mut report = AggregationReport {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        };
        for (client_id, records) in by_client {
            let mut totals = ClientUsageTotals {
                client_id: client_id.clone(),
                ..Default::default()
            };
            for record in &records {
                totals.add(record);
            }
            report.notifications += self.evaluate_days(&client_id, &records).await?;
            report.clients.push(totals);
        }

        let (inactive, fired) = self.evaluate_inactive(now).await?;
        report.inactive_clients = inactive;
        report.notifications += fired;

        tracing::info!(
            from = %from,
            to = %to,
            clients = report.clients.len(),
            inactive = report.inactive_clients,
            notifications = report.notifications,
            "Usage aggregation finished"
        );
        Ok(report)
    }

    /// `records` is one client's rows in ascending date order.
    async fn evaluate_days(&self, client_id: &str, records: &[UsageRecord]) -> Result<usize> {
        let Some(client) = self.store.get_client(client_id)? else {
            tracing::warn!(client_id, "Usage rows reference an unknown client, skipping alerts");
            return Ok(0);
        };

        let mut fired = 0;
        for (i, record) in records.iter().enumerate() {
            let total_requests = record.authorization_requests + record.token_requests;
            if total_requests >= self.error_rate_min_requests {
                if let Some(error_rate) = record.error_rate_percent() {
                    let data = json!({
                        "error_rate": error_rate,
                        "total_requests": total_requests,
                        "date": record.date.to_string(),
                    });
                    fired += self
                        .engine
                        .evaluate_and_trigger(&client, TriggerType::HighErrorRate, &data)
                        .await
                        .len();
                }
            }

            let prior = &records[..i];
            if !prior.is_empty() {
                let baseline = prior.iter().map(|r| r.token_requests).sum::<i64>() as f64
                    / prior.len() as f64;
                let mut data = json!({
                    "token_requests": record.token_requests,
                    "baseline": baseline,
                    "date": record.date.to_string(),
                });
                if baseline > 0.0 {
                    data["spike_ratio"] = json!(record.token_requests as f64 / baseline);
                }
                fired += self
                    .engine
                    .evaluate_and_trigger(&client, TriggerType::TokenUsageSpike, &data)
                    .await
                    .len();
            }
        }
        Ok(fired)
    }

    async fn evaluate_inactive(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        let cutoff = now - Duration::days(self.inactive_after_days);
        let inactive = self.store.list_inactive_clients(cutoff)?;
        let mut fired = 0;
        for client in &inactive {
            let last_seen = client.last_activity_at.unwrap_or(client.created_at);
            let data = json!({
                "days_inactive": (now - last_seen).num_days(),
                "last_activity_at": client.last_activity_at,
            });
            fired += self
                .engine
                .evaluate_and_trigger(client, TriggerType::ClientInactive, &data)
                .await
                .len();
        }
        Ok((inactive.len(), fired))
    }
}
