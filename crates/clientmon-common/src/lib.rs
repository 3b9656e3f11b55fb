//! Domain types shared by every clientmon crate: client records, daily usage
//! counters, alert rules, notifications and the append-only client event log.

pub mod id;
pub mod types;
