pub mod aggregation;
pub mod config;
pub mod health;
pub mod maintenance;
pub mod retention;
pub mod rule_seed;
pub mod state;
pub mod usage;
