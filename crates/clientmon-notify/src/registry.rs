use std::collections::BTreeMap;
use std::sync::Arc;

use clientmon_common::types::ChannelKind;
use clientmon_storage::MonitorStore;
use serde::{Deserialize, Serialize};

use crate::channels::email::{EmailChannel, EmailConfig};
use crate::channels::in_app::InAppChannel;
use crate::channels::slack::{SlackChannel, SlackConfig};
use crate::channels::webhook::{WebhookChannel, WebhookConfig};
use crate::error::Result;
use crate::NotificationChannel;

/// Optional per-channel settings; a channel without settings is not registered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub email: Option<EmailConfig>,
    #[serde(default)]
    pub slack: Option<SlackConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

/// The set of configured delivery channels, at most one per [`ChannelKind`].
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    channels: BTreeMap<ChannelKind, Arc<dyn NotificationChannel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the registry from configuration. The in-app channel is always
    /// present since it only needs the store.
    pub fn from_config(config: &ChannelsConfig, store: Arc<MonitorStore>) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(InAppChannel::new(store)));
        if let Some(email) = &config.email {
            registry.register(Arc::new(EmailChannel::new(email)?));
        }
        if let Some(slack) = &config.slack {
            registry.register(Arc::new(SlackChannel::new(slack)));
        }
        if let Some(webhook) = &config.webhook {
            registry.register(Arc::new(WebhookChannel::new(webhook)));
        }
        tracing::info!(
            channels = ?registry.kinds(),
            "Notification channels registered"
        );
        Ok(registry)
    }

    /// Adds a channel, replacing any previous channel of the same kind.
    pub fn register(&mut self, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(channel.kind(), channel);
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn NotificationChannel>> {
        self.channels.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<ChannelKind> {
        self.channels.keys().copied().collect()
    }
}
