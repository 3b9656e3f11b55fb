use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use clientmon_common::types::{ChannelKind, InAppMessage};
use clientmon_storage::MonitorStore;

use super::any_succeeded;
use crate::error::{NotifyError, Result};
use crate::{NotificationChannel, OutgoingMessage};

/// Writes one unread inbox entry per recipient user.
pub struct InAppChannel {
    store: Arc<MonitorStore>,
}

impl InAppChannel {
    pub fn new(store: Arc<MonitorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotificationChannel for InAppChannel {
    async fn send(&self, message: &OutgoingMessage<'_>) -> Result<()> {
        if message.recipients.is_empty() {
            return Err(NotifyError::NoRecipients(ChannelKind::InApp));
        }
        let n = message.notification;
        let now = Utc::now();
        let outcomes = message
            .recipients
            .iter()
            .map(|user_id| {
                let entry = InAppMessage {
                    id: clientmon_common::id::next_id(),
                    notification_id: n.id.clone(),
                    user_id: user_id.clone(),
                    title: n.title.clone(),
                    message: n.message.clone(),
                    read_at: None,
                    created_at: now,
                };
                let outcome = self.store.insert_in_app_message(&entry).map_err(NotifyError::from);
                (user_id.clone(), outcome)
            })
            .collect();
        any_succeeded(ChannelKind::InApp, outcomes)
    }

    fn kind(&self) -> ChannelKind {
        ChannelKind::InApp
    }
}
