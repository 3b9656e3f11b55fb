#![allow(dead_code)]

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use clientmon_common::types::{
    AlertRule, ChannelKind, Client, CompareOp, Condition, NewAlertRule, NewClient, Notification,
    TriggerType,
};
use clientmon_server::config::ServerConfig;
use clientmon_server::state::AppState;
use clientmon_storage::store::notification::NotificationQuery;
use clientmon_storage::MonitorStore;
use tempfile::TempDir;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    /// User id that receives the in-app notifications of test rules.
    pub oncall: String,
}

impl TestContext {
    pub fn store(&self) -> &Arc<MonitorStore> {
        &self.state.store
    }

    pub fn add_client(&self, client_id: &str, url: &str, interval_secs: i64) -> Client {
        self.store()
            .insert_client(&NewClient::new(client_id, client_id).with_health_check(url, interval_secs))
            .unwrap()
    }

    pub fn reload(&self, client: &Client) -> Client {
        self.store().get_client(&client.id).unwrap().unwrap()
    }

    /// An in-app rule addressed to the on-call user.
    pub fn add_rule(
        &self,
        name: &str,
        trigger: TriggerType,
        conditions: Vec<Condition>,
        cooldown_minutes: i64,
    ) -> AlertRule {
        self.store()
            .insert_alert_rule(&NewAlertRule {
                name: name.to_string(),
                description: None,
                client_id: None,
                trigger_type: trigger,
                conditions,
                notification_channels: BTreeSet::from([ChannelKind::InApp]),
                recipients: vec![self.oncall.clone()],
                is_active: true,
                cooldown_minutes,
            })
            .unwrap()
    }

    pub fn notifications_for_rule(&self, rule: &AlertRule) -> Vec<Notification> {
        self.store()
            .list_notifications(&NotificationQuery {
                alert_rule_id: Some(rule.id.as_str()),
                ..Default::default()
            })
            .unwrap()
    }
}

pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with(|_| {})
}

pub fn build_test_context_with(tweak: impl FnOnce(&mut ServerConfig)) -> Result<TestContext> {
    clientmon_common::id::init(1, 1);

    let temp_dir = tempfile::tempdir()?;
    let mut config = ServerConfig {
        data_dir: temp_dir.path().to_string_lossy().to_string(),
        ..Default::default()
    };
    config.health_check.inter_check_delay_ms = 0;
    config.health_check.connect_timeout_secs = 2;
    config.health_check.timeout_secs = 5;
    config.health_check.use_system_proxy = false;
    config.notify.channel_timeout_secs = 5;
    tweak(&mut config);

    let state = AppState::open(config)?;
    let oncall = state.store.insert_user("oncall", None)?.id;
    Ok(TestContext {
        temp_dir,
        state,
        oncall,
    })
}

pub fn at_least(metric: &str, threshold: f64) -> Condition {
    Condition::new(metric, CompareOp::GreaterEqual, threshold)
}

/// A local health endpoint whose response status can be switched mid-test.
pub struct HealthTarget {
    pub addr: SocketAddr,
    status: Arc<AtomicU16>,
}

impl HealthTarget {
    pub async fn start(initial: u16) -> Result<Self> {
        let status = Arc::new(AtomicU16::new(initial));
        let app = Router::new()
            .route("/health", get(health))
            .with_state(status.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { addr, status })
    }

    pub fn url(&self) -> String {
        format!("http://{}/health", self.addr)
    }

    pub fn respond_with(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }
}

async fn health(State(status): State<Arc<AtomicU16>>) -> StatusCode {
    StatusCode::from_u16(status.load(Ordering::SeqCst)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// A URL nothing listens on.
pub async fn closed_port_url() -> Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(format!("http://{addr}/health"))
}
