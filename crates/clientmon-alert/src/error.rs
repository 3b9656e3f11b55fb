/// Errors raised while evaluating or firing alert rules.
///
/// Evaluation errors skip the offending rule only; the engine logs them and
/// moves on to the next rule.
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// A condition names a metric that is absent from the event data.
    #[error("Alert: metric '{metric}' missing from event data")]
    MissingMetric { metric: String },

    /// A condition's metric is present but not a number.
    #[error("Alert: metric '{metric}' is not numeric (got {value})")]
    NonNumericMetric { metric: String, value: String },

    #[error("Alert: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Alert: storage error: {0}")]
    Storage(#[from] clientmon_storage::StorageError),

    #[error("Alert: notification error: {0}")]
    Notify(#[from] clientmon_notify::NotifyError),
}

pub type Result<T> = std::result::Result<T, AlertError>;
