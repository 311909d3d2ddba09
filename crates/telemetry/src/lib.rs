//! Cost tracking and budget enforcement for Conductor.
//!
//! Prices token usage per model, accumulates it per run (with a per-model
//! breakdown for runs that delegate to subagents on other models), and
//! reports when a run's budget ceiling has been reached.

pub mod engine;
pub mod model;
pub mod pricing;

pub use engine::UsageTracker;
pub use model::{ModelUsage, UsageSummary};
pub use pricing::{ModelPricing, PricingTable};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("budget exceeded: spent ${spent_usd:.4} of ${limit_usd:.4}")]
    BudgetExceeded { spent_usd: f64, limit_usd: f64 },
}
