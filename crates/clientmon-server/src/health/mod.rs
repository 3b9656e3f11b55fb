pub mod checker;
pub mod scheduler;

pub use checker::{HealthChecker, ProbeOutcome, ProbeStatus};
pub use scheduler::{HealthCheckScheduler, SweepMode, SweepReport};
