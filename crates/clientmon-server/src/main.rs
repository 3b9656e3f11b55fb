//! clientmon: health checks, alert rules and usage roll-ups for OAuth clients.
//!
//! Usage:
//!   clientmon serve                                   # Run the health check scheduler
//!   clientmon sweep [--client ID | --force]           # One health check sweep
//!   clientmon aggregate-usage --from DATE --to DATE   # Usage totals and usage alerts
//!   clientmon cleanup [--days N] [--dry-run]          # Retention cleanup
//!   clientmon ack-notification ID --by USER           # Acknowledge a notification
//!   clientmon init-rules seed.json                    # Create alert rules from a seed file

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use clientmon_common::types::Client;
use clientmon_storage::{Acknowledgement, MonitorStore};
use serde::Serialize;
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;

use clientmon_server::config::ServerConfig;
use clientmon_server::health::SweepMode;
use clientmon_server::retention;
use clientmon_server::rule_seed;
use clientmon_server::state::AppState;

#[derive(Parser)]
#[command(name = "clientmon", version, about = "OAuth client health monitoring and alerting")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the health check scheduler until Ctrl-C
    Serve,

    /// Run one health check sweep
    Sweep {
        /// Check only this client (internal id or OAuth client id)
        #[arg(long, conflicts_with = "force")]
        client: Option<String>,

        /// Check every enabled client, due or not
        #[arg(long)]
        force: bool,
    },

    /// Total usage over a date range and evaluate usage alerts
    AggregateUsage {
        /// First day, inclusive (default: 7 days ago)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day, inclusive (default: today)
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Delete old events, usage rows and acknowledged notifications
    Cleanup {
        /// Retention in days (default: `[retention] days`)
        #[arg(long)]
        days: Option<u32>,

        /// Only report what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Acknowledge a notification
    AckNotification {
        id: String,

        /// Who is acknowledging
        #[arg(long)]
        by: String,

        #[arg(long)]
        note: Option<String>,
    },

    /// Create alert rules from a JSON seed file, skipping existing names
    InitRules { seed: String },

    /// Switch a client's maintenance mode
    Maintenance {
        client: String,

        #[arg(value_enum)]
        state: Toggle,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Record one usage event for a client
    RecordUsage {
        client: String,

        /// e.g. token_request, authorization_failure, bytes_transferred
        event_type: String,

        /// JSON payload, e.g. '{"bytes": 1024}'
        #[arg(long, default_value = "{}")]
        payload: String,
    },

    /// In-app notification inbox
    Inbox {
        #[command(subcommand)]
        action: InboxAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Subcommand)]
enum InboxAction {
    /// List a user's inbox
    List {
        user_id: String,

        /// Include messages already read
        #[arg(long)]
        all: bool,
    },
    /// Mark one message read
    Read { user_id: String, message_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("clientmon=info".parse()?))
        .init();

    clientmon_common::id::init(1, 1);

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("Failed to load config '{path}'"))?,
        None => ServerConfig::default(),
    };
    let state = AppState::open(config)?;

    match cli.command {
        Commands::Serve => run_serve(state).await,
        Commands::Sweep { client, force } => {
            let mode = match (client, force) {
                (Some(id), _) => SweepMode::Single(id),
                (None, true) => SweepMode::ForceAll,
                (None, false) => SweepMode::Due,
            };
            let report = state.scheduler().sweep(mode).await?;
            tracing::info!(
                checked = report.checked,
                healthy = report.healthy,
                unhealthy = report.unhealthy,
                errors = report.errors,
                skipped = report.skipped,
                "sweep completed"
            );
            Ok(())
        }
        Commands::AggregateUsage { from, to } => {
            let to = to.unwrap_or_else(|| Utc::now().date_naive());
            let from = from.unwrap_or(to - ChronoDuration::days(7));
            let report = state.aggregator().aggregate(from, to).await?;
            print_json(&report)
        }
        Commands::Cleanup { days, dry_run } => {
            let days = days.unwrap_or(state.config.retention.days);
            let report = retention::cleanup(&state.store, days, dry_run)?;
            print_json(&report)
        }
        Commands::AckNotification { id, by, note } => {
            match state.dispatcher.acknowledge(&id, &by, note.as_deref())? {
                Acknowledgement::Acknowledged => tracing::info!(id = %id, by = %by, "Notification acknowledged"),
                Acknowledgement::AlreadyAcknowledged => {
                    tracing::warn!(id = %id, "Notification was already acknowledged, keeping the first acknowledgment")
                }
            }
            Ok(())
        }
        Commands::InitRules { seed } => {
            let seed = rule_seed::load_seed_file(&seed)?;
            rule_seed::init_rules_from_seed(&state.store, &seed)?;
            Ok(())
        }
        Commands::Maintenance {
            client,
            state: toggle,
            reason,
        } => {
            let client = resolve_client(&state.store, &client)?;
            let enabled = matches!(toggle, Toggle::On);
            let (client, fired) = state
                .maintenance()
                .set(&client.id, enabled, reason.as_deref())
                .await?;
            tracing::info!(
                client_id = %client.id,
                maintenance_mode = client.maintenance_mode,
                notifications = fired.len(),
                "maintenance completed"
            );
            Ok(())
        }
        Commands::RecordUsage {
            client,
            event_type,
            payload,
        } => {
            let client = resolve_client(&state.store, &client)?;
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            let applied = state
                .usage_recorder()
                .record_usage(&client.id, &event_type, &payload)?;
            tracing::info!(client_id = %client.id, event_type = %event_type, applied, "record-usage completed");
            Ok(())
        }
        Commands::Inbox { action } => match action {
            InboxAction::List { user_id, all } => {
                let messages = state.store.list_in_app_messages(&user_id, !all)?;
                print_json(&messages)
            }
            InboxAction::Read {
                user_id,
                message_id,
            } => {
                if !state.store.mark_in_app_read(&message_id, &user_id, Utc::now())? {
                    anyhow::bail!("no unread message {message_id} for user {user_id}");
                }
                Ok(())
            }
        },
    }
}

async fn run_serve(state: AppState) -> Result<()> {
    let mut scheduler_handle = if state.config.health_check.enabled {
        let scheduler = state.scheduler();
        Some(tokio::spawn(async move {
            scheduler.run().await;
        }))
    } else {
        tracing::info!("Health check scheduler disabled");
        None
    };

    // Periodic retention cleanup
    let cleanup_store = state.store.clone();
    let retention_days = state.config.retention.days;
    let cleanup_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            match retention::cleanup(&cleanup_store, retention_days, false) {
                Ok(report) if report.total() > 0 => {
                    tracing::info!(removed = report.total(), "Cleaned up expired records")
                }
                Err(e) => tracing::error!(error = %e, "Cleanup failed"),
                _ => {}
            }
        }
    });

    tracing::info!(db = %state.store.db_path().display(), "clientmon started");
    match scheduler_handle.as_mut() {
        Some(handle) => tokio::select! {
            res = signal::ctrl_c() => {
                res.context("Failed to listen for Ctrl-C")?;
            }
            res = handle => {
                match res {
                    Err(e) if e.is_panic() => {
                        tracing::error!(error = %e, "Health check scheduler panicked")
                    }
                    _ => tracing::error!("Health check scheduler stopped unexpectedly"),
                }
            }
        },
        None => {
            signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
        }
    }
    tracing::info!("Shutting down gracefully");

    cleanup_handle.abort();
    if let Some(h) = scheduler_handle {
        h.abort();
    }
    tracing::info!("clientmon stopped");
    Ok(())
}

fn resolve_client(store: &Arc<MonitorStore>, key: &str) -> Result<Client> {
    if let Some(client) = store.get_client(key)? {
        return Ok(client);
    }
    store
        .get_client_by_client_id(key)?
        .with_context(|| format!("client not found: {key}"))
}

#[allow(clippy::print_stdout)]
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
