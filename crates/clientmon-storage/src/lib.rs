//! SQLite persistence for the monitoring engine.
//!
//! [`MonitorStore`] owns a single WAL-mode database holding the client
//! registry, daily usage counters, alert rules, notifications (with their
//! in-app inbox entries) and the append-only client event log.
//! [`EventLogger`] wraps the store for fire-and-forget event recording.

pub mod error;
pub mod event_log;
pub mod store;


pub use error::{Result, StorageError};
pub use event_log::EventLogger;
pub use store::notification::Acknowledgement;
pub use store::{HealthUpdate, MonitorStore, UsageDelta};
