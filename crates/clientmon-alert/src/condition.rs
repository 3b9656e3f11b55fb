use clientmon_common::types::Condition;
use serde_json::Value;

use crate::error::{AlertError, Result};

/// Looks up `metric` in the event data. Dotted names walk nested objects,
/// so `"response.time_ms"` reads `data["response"]["time_ms"]`.
pub fn metric_value(data: &Value, metric: &str) -> Result<f64> {
    let found = metric
        .split('.')
        .try_fold(data, |node, key| node.get(key))
        .filter(|v| !v.is_null())
        .ok_or_else(|| AlertError::MissingMetric {
            metric: metric.to_string(),
        })?;

    let numeric = match found {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    numeric
        .filter(|v| v.is_finite())
        .ok_or_else(|| AlertError::NonNumericMetric {
            metric: metric.to_string(),
            value: found.to_string(),
        })
}

/// Whether every condition holds for `data`. A rule without conditions
/// matches any event of its trigger type.
pub fn evaluate(conditions: &[Condition], data: &Value) -> Result<bool> {
    for condition in conditions {
        let value = metric_value(data, &condition.metric)?;
        if !condition.operator.check(value, condition.threshold) {
            return Ok(false);
        }
    }
    Ok(true)
}
