use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clientmon_alert::AlertRuleEngine;
use clientmon_common::types::{Client, TriggerType};
use clientmon_storage::MonitorStore;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::time::{interval, Duration};

use super::checker::{HealthChecker, ProbeOutcome, ProbeStatus};

/// Which clients a sweep probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepMode {
    /// One client, by internal id or OAuth client id, due or not.
    Single(String),
    /// Every enabled client regardless of its interval.
    ForceAll,
    /// Only clients whose interval has elapsed.
    Due,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl SweepReport {
    fn add(&mut self, status: ProbeStatus) {
        match status {
            ProbeStatus::Disabled => {
                self.skipped += 1;
                return;
            }
            ProbeStatus::Healthy => self.healthy += 1,
            ProbeStatus::Unhealthy => self.unhealthy += 1,
            ProbeStatus::Error => self.errors += 1,
        }
        self.checked += 1;
    }
}

pub struct HealthCheckScheduler {
    store: Arc<MonitorStore>,
    checker: Arc<HealthChecker>,
    engine: Arc<AlertRuleEngine>,
    tick_secs: u64,
    inter_check_delay: Duration,
    max_concurrent: usize,
}

impl HealthCheckScheduler {
    pub fn new(
        store: Arc<MonitorStore>,
        checker: Arc<HealthChecker>,
        engine: Arc<AlertRuleEngine>,
        tick_secs: u64,
        inter_check_delay: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            checker,
            engine,
            tick_secs,
            inter_check_delay,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn run(&self) {
        tracing::info!(
            tick_secs = self.tick_secs,
            max_concurrent = self.max_concurrent,
            "Health check scheduler started"
        );

        let mut tick = interval(Duration::from_secs(self.tick_secs.max(1)));
        loop {
            tick.tick().await;
            if let Err(e) = self.sweep(SweepMode::Due).await {
                tracing::error!(error = %e, "Health check cycle failed");
            }
        }
    }

    /// Probes the clients selected by `mode` and raises alerts for the outcomes.
    pub async fn sweep(&self, mode: SweepMode) -> Result<SweepReport> {
        let clients = self.select(&mode)?;
        if clients.is_empty() {
            return Ok(SweepReport::default());
        }

        tracing::info!(count = clients.len(), mode = ?mode, "Checking client health");

        let report = if self.max_concurrent > 1 {
            self.sweep_pooled(clients).await?
        } else {
            self.sweep_sequential(clients).await
        };

        tracing::info!(
            checked = report.checked,
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            errors = report.errors,
            skipped = report.skipped,
            "Health check sweep finished"
        );
        Ok(report)
    }

    fn select(&self, mode: &SweepMode) -> Result<Vec<Client>> {
        let clients = match mode {
            SweepMode::Single(id) => {
                let client = match self.store.get_client(id)? {
                    Some(client) => Some(client),
                    None => self.store.get_client_by_client_id(id)?,
                };
                let client = client.ok_or_else(|| anyhow::anyhow!("client not found: {id}"))?;
                vec![client]
            }
            SweepMode::ForceAll => self.store.list_health_check_clients()?,
            SweepMode::Due => self.store.query_clients_due_for_check(Utc::now())?,
        };
        Ok(clients)
    }

    async fn sweep_sequential(&self, clients: Vec<Client>) -> SweepReport {
        let mut report = SweepReport::default();
        for (i, client) in clients.iter().enumerate() {
            if i > 0 && !self.inter_check_delay.is_zero() {
                tokio::time::sleep(self.inter_check_delay).await;
            }
            report.add(check_and_alert(&self.checker, &self.engine, client).await);
        }
        report
    }

    async fn sweep_pooled(&self, clients: Vec<Client>) -> Result<SweepReport> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::new();

        for client in clients {
            let permit = semaphore.clone().acquire_owned().await?;
            let checker = self.checker.clone();
            let engine = self.engine.clone();

            let handle = tokio::spawn(async move {
                let status = check_and_alert(&checker, &engine, &client).await;
                drop(permit);
                status
            });
            handles.push(handle);
        }

        let mut report = SweepReport::default();
        for handle in handles {
            match handle.await {
                Ok(status) => report.add(status),
                Err(e) => tracing::error!(error = %e, "Health check task panicked"),
            }
        }
        Ok(report)
    }
}

/// Probes one client, then feeds the outcome to the alert rules.
async fn check_and_alert(
    checker: &HealthChecker,
    engine: &AlertRuleEngine,
    client: &Client,
) -> ProbeStatus {
    let outcome = checker.probe(client).await;
    if outcome.status == ProbeStatus::Disabled {
        return outcome.status;
    }
    raise_alerts(engine, client, &outcome).await;
    outcome.status
}

async fn raise_alerts(engine: &AlertRuleEngine, client: &Client, outcome: &ProbeOutcome) {
    if outcome.is_failure() {
        let data = json!({
            "consecutive_failures": outcome.consecutive_failures,
            "status_code": outcome.status_code,
            "error": outcome.message,
            "url": outcome.url,
        });
        engine
            .evaluate_and_trigger(client, TriggerType::HealthCheckFailure, &data)
            .await;
    }
    if let Some(response_time_ms) = outcome.response_time_ms {
        let data = json!({
            "response_time_ms": response_time_ms,
            "url": outcome.url,
        });
        engine
            .evaluate_and_trigger(client, TriggerType::ResponseTimeThreshold, &data)
            .await;
    }
}
