use clientmon_common::types::ChannelKind;

/// Errors that can occur within the notification subsystem.
///
/// Channel errors are isolated by the dispatcher: they mark the channel as
/// failed for one dispatch and are logged, never propagated further.
///
/// # Examples
///
/// ```rust
/// use clientmon_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing smtp_host".to_string());
/// assert!(err.to_string().contains("smtp_host"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The channel is not present in the registry.
    #[error("Notify: channel '{0}' is not configured")]
    ChannelNotConfigured(ChannelKind),

    /// No recipient could be resolved for the channel.
    #[error("Notify: no deliverable recipients for channel '{0}'")]
    NoRecipients(ChannelKind),

    /// Delivery did not complete within the per-channel timeout.
    #[error("Notify: channel '{channel}' timed out after {secs}s")]
    Timeout { channel: ChannelKind, secs: u64 },

    /// An HTTP request to an external notification endpoint failed.
    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// SMTP transport or message building error when sending email.
    #[error("Notify: SMTP error: {0}")]
    SmtpError(String),

    /// JSON serialization failed.
    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The external API returned a non-success response.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    ApiError {
        service: String,
        status: u16,
        body: String,
    },

    /// Every recipient of a channel failed.
    #[error("Notify: all {attempted} recipient(s) failed on '{channel}': {last_error}")]
    AllRecipientsFailed {
        channel: ChannelKind,
        attempted: usize,
        last_error: String,
    },

    /// Reading or writing notification records failed.
    #[error("Notify: storage error: {0}")]
    Storage(#[from] clientmon_storage::StorageError),
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
