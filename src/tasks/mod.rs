//! Background sweeps over the connection registry.

mod health_check;
mod reaper;

pub use health_check::{HealthCheckReport, HealthCheckTask};
pub use reaper::ReaperTask;
