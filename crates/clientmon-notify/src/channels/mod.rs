pub mod email;
pub mod in_app;
pub mod slack;
pub mod webhook;

#[cfg(test)]
pub(crate) mod test_support;

use std::time::Duration;

use serde_json::Value;

use crate::error::{NotifyError, Result};
use crate::utils::{truncate_string, MAX_BODY_LENGTH};

const MAX_ATTEMPTS: u32 = 3;

/// POSTs a JSON body, retrying up to three times with exponential backoff
/// (100ms, 200ms) on transport errors and non-2xx responses.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    body: &Value,
) -> Result<()> {
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match client.post(url).json(body).send().await {
            Ok(resp) if resp.status().is_success() => return Ok(()),
            Ok(resp) => {
                let status = resp.status();
                let resp_body = match resp.text().await {
                    Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
                    Err(e) => format!("[Failed to read response body: {e}]"),
                };
                tracing::warn!(
                    service,
                    attempt = attempt + 1,
                    status = %status,
                    "Notification endpoint returned non-success status, retrying"
                );
                last_err = Some(NotifyError::ApiError {
                    service: service.to_string(),
                    status: status.as_u16(),
                    body: resp_body,
                });
            }
            Err(e) => {
                tracing::warn!(
                    service,
                    attempt = attempt + 1,
                    error = %e,
                    "Notification request failed, retrying"
                );
                last_err = Some(e.into());
            }
        }
        if attempt + 1 < MAX_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
        }
    }
    Err(last_err.unwrap_or_else(|| NotifyError::ApiError {
        service: service.to_string(),
        status: 0,
        body: String::new(),
    }))
}

/// Folds per-recipient outcomes into a channel outcome: the channel succeeds
/// if at least one recipient was reached.
pub(crate) fn any_succeeded(
    channel: clientmon_common::types::ChannelKind,
    outcomes: Vec<(String, Result<()>)>,
) -> Result<()> {
    let attempted = outcomes.len();
    let mut delivered = 0usize;
    let mut last_error = None;
    for (recipient, outcome) in outcomes {
        match outcome {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::error!(%channel, recipient = %recipient, error = %e, "Delivery to recipient failed");
                last_error = Some(e.to_string());
            }
        }
    }
    if delivered > 0 {
        return Ok(());
    }
    Err(NotifyError::AllRecipientsFailed {
        channel,
        attempted,
        last_error: last_error.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::test_support::{client, dead_url, Endpoint};
    use super::*;
    use clientmon_common::types::ChannelKind;
    use serde_json::json;

    #[tokio::test]
    async fn non_success_is_retried_three_times() {
        let endpoint = Endpoint::start(vec![500]).await.unwrap();
        let err = post_json_with_retry(&client(), "webhook", &endpoint.url(), &json!({"a": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::ApiError { status: 500, .. }));
        assert_eq!(endpoint.hits(), 3);
    }

    #[tokio::test]
    async fn later_success_stops_retrying() {
        let endpoint = Endpoint::start(vec![502, 204]).await.unwrap();
        post_json_with_retry(&client(), "webhook", &endpoint.url(), &json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(endpoint.hits(), 2);
        assert_eq!(endpoint.bodies()[1]["a"], 1);
    }

    #[tokio::test]
    async fn transport_errors_exhaust_attempts() {
        let url = dead_url().await.unwrap();
        let err = post_json_with_retry(&client(), "slack", &url, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::HttpError(_)));
    }

    #[test]
    fn one_reached_recipient_is_enough() {
        let failed = || {
            Err(NotifyError::ApiError {
                service: "webhook".to_string(),
                status: 500,
                body: String::new(),
            })
        };
        assert!(any_succeeded(
            ChannelKind::Webhook,
            vec![("a".to_string(), failed()), ("b".to_string(), Ok(()))]
        )
        .is_ok());

        let err = any_succeeded(
            ChannelKind::Webhook,
            vec![("a".to_string(), failed()), ("b".to_string(), failed())],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            NotifyError::AllRecipientsFailed { attempted: 2, .. }
        ));
    }
}
