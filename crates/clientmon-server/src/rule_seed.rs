use anyhow::{Context, Result};
use clientmon_storage::MonitorStore;

use crate::config::RulesSeedFile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn load_seed_file(path: &str) -> Result<RulesSeedFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file '{path}'"))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse seed file '{path}'"))
}

/// Creates the seed's alert rules. Rules whose name already exists are
/// left as they are.
pub fn init_rules_from_seed(store: &MonitorStore, seed: &RulesSeedFile) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for rule in &seed.rules {
        if store.get_alert_rule_by_name(&rule.name)?.is_some() {
            tracing::warn!(name = %rule.name, "Alert rule already exists, skipping");
            summary.skipped += 1;
            continue;
        }
        match store.insert_alert_rule(rule) {
            Ok(inserted) => {
                tracing::info!(
                    name = %rule.name,
                    id = %inserted.id,
                    trigger = %rule.trigger_type,
                    "Alert rule created"
                );
                summary.created += 1;
            }
            Err(e) => {
                tracing::error!(name = %rule.name, error = %e, "Failed to create alert rule");
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        created = summary.created,
        skipped = summary.skipped,
        failed = summary.failed,
        "init-rules completed"
    );
    Ok(summary)
}
