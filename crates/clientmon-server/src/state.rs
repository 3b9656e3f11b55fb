use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clientmon_alert::AlertRuleEngine;
use clientmon_notify::{ChannelRegistry, NotificationDispatcher};
use clientmon_storage::MonitorStore;

use crate::aggregation::UsageAggregator;
use crate::config::ServerConfig;
use crate::health::{HealthCheckScheduler, HealthChecker};
use crate::maintenance::MaintenanceToggle;
use crate::usage::UsageRecorder;

/// The wired-up monitoring components sharing one store.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<MonitorStore>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub engine: Arc<AlertRuleEngine>,
    pub checker: Arc<HealthChecker>,
}

impl AppState {
    /// Opens the configured database and builds every component on top of it.
    pub fn open(config: ServerConfig) -> Result<Self> {
        let store = MonitorStore::open(config.data_path(), &config.database_file)
            .with_context(|| format!("Failed to open database in '{}'", config.data_dir))?;
        Self::with_store(config, Arc::new(store), None)
    }

    /// Builds the components around an existing store. `registry` replaces
    /// the channels built from `[notify]`.
    pub fn with_store(
        config: ServerConfig,
        store: Arc<MonitorStore>,
        registry: Option<ChannelRegistry>,
    ) -> Result<Self> {
        let registry = match registry {
            Some(registry) => registry,
            None => ChannelRegistry::from_config(&config.notify.channels, store.clone())
                .context("Failed to configure notification channels")?,
        };
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            registry,
            Duration::from_secs(config.notify.channel_timeout_secs),
        ));
        let engine = Arc::new(AlertRuleEngine::new(store.clone(), dispatcher.clone()));
        let checker = Arc::new(
            HealthChecker::new(
                store.clone(),
                Duration::from_secs(config.health_check.connect_timeout_secs),
                Duration::from_secs(config.health_check.timeout_secs),
                config.health_check.use_system_proxy,
            )
            .context("Failed to build health check HTTP client")?,
        );
        Ok(Self {
            config: Arc::new(config),
            store,
            dispatcher,
            engine,
            checker,
        })
    }

    pub fn scheduler(&self) -> HealthCheckScheduler {
        let hc = &self.config.health_check;
        HealthCheckScheduler::new(
            self.store.clone(),
            self.checker.clone(),
            self.engine.clone(),
            hc.tick_secs,
            Duration::from_millis(hc.inter_check_delay_ms),
            hc.max_concurrent,
        )
    }

    pub fn usage_recorder(&self) -> UsageRecorder {
        UsageRecorder::new(self.store.clone())
    }

    pub fn aggregator(&self) -> UsageAggregator {
        UsageAggregator::new(
            self.store.clone(),
            self.engine.clone(),
            self.config.usage.error_rate_min_requests,
            self.config.usage.inactive_after_days,
        )
    }

    pub fn maintenance(&self) -> MaintenanceToggle {
        MaintenanceToggle::new(self.store.clone(), self.engine.clone())
    }
}
