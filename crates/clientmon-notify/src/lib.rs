//! Multi-channel notification delivery.
//!
//! A [`NotificationDispatcher`] persists each notification, resolves the
//! rule's recipients for every requested channel and delivers through the
//! [`NotificationChannel`] implementations held in a [`ChannelRegistry`].
//! Built-in channels are email (SMTP), Slack incoming webhooks, generic
//! JSON webhooks and the store-backed in-app inbox.

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod utils;


use async_trait::async_trait;
use clientmon_common::types::{ChannelKind, Notification};

pub use dispatcher::NotificationDispatcher;
pub use error::{NotifyError, Result};
pub use registry::{ChannelRegistry, ChannelsConfig};

/// One delivery request handed to a channel.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingMessage<'a> {
    pub notification: &'a Notification,
    /// Display name of the client the notification is about, if any.
    pub client_name: Option<&'a str>,
    /// Recipients already resolved for this channel (addresses, user ids,
    /// Slack channels or webhook URLs).
    pub recipients: &'a [String],
}

/// A delivery medium for notifications.
///
/// Implementations perform their own retries; an `Err` means the channel
/// failed for this notification.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers the message through this channel.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails after retries (if applicable).
    async fn send(&self, message: &OutgoingMessage<'_>) -> Result<()>;

    /// Which [`ChannelKind`] this channel serves.
    fn kind(&self) -> ChannelKind;
}
