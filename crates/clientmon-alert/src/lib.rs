//! Configurable alert rules for client monitoring.
//!
//! Rules are stored records (see [`clientmon_common::types::AlertRule`]):
//! a trigger type, a list of `metric <op> threshold` conditions joined by
//! AND, delivery channels and a cooldown. [`AlertRuleEngine`] loads the
//! active rules for an observation, evaluates them against the event data,
//! atomically claims the cooldown slot and hands a typed
//! [`payload::AlertPayload`] notification to the dispatcher.

pub mod condition;
pub mod engine;
pub mod error;
pub mod payload;

#[cfg(test)]
mod tests;

pub use engine::AlertRuleEngine;
pub use error::{AlertError, Result};
pub use payload::AlertPayload;
