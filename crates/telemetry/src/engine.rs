//! Per-run usage tracking and budget checks.

use conductor_core::TokenUsage;
use std::sync::Arc;
use tracing::debug;

use crate::TelemetryError;
use crate::model::{ModelUsage, UsageSummary};
use crate::pricing::PricingTable;

/// Accumulates token usage and cost for one run.
///
/// Owned by a single loop and only touched between suspension points, so it
/// needs no locking. The pricing table is shared.
#[derive(Debug, Clone)]
pub struct UsageTracker {
    pricing: Arc<PricingTable>,
    summary: UsageSummary,
}

impl UsageTracker {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self {
            pricing,
            summary: UsageSummary::default(),
        }
    }

    pub fn pricing(&self) -> &Arc<PricingTable> {
        &self.pricing
    }

    /// Record one provider response and return its cost.
    pub fn record(&mut self, model: &str, usage: TokenUsage) -> f64 {
        let cost = self.pricing.compute_cost(model, &usage);
        self.summary.total += usage;
        self.summary.cost_usd += cost;

        let entry = self.summary.by_model.entry(model.to_string()).or_insert_with(ModelUsage::default);
        entry.usage += usage;
        entry.cost_usd += cost;
        entry.calls += 1;

        debug!(
            model = %model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            cost_usd = cost,
            total_cost_usd = self.summary.cost_usd,
            "Recorded usage"
        );
        cost
    }

    /// Fold in usage from a nested run (e.g. a synchronous subagent).
    pub fn merge(&mut self, other: &UsageSummary) {
        self.summary.merge(other);
    }

    pub fn cost_usd(&self) -> f64 {
        self.summary.cost_usd
    }

    pub fn total(&self) -> TokenUsage {
        self.summary.total
    }

    /// `Err` once accumulated cost has reached `limit`.
    pub fn check_budget(&self, limit: f64) -> Result<(), TelemetryError> {
        if limit > 0.0 && self.summary.cost_usd >= limit {
            return Err(TelemetryError::BudgetExceeded {
                spent_usd: self.summary.cost_usd,
                limit_usd: limit,
            });
        }
        Ok(())
    }

    pub fn summary(&self) -> &UsageSummary {
        &self.summary
    }

    pub fn into_summary(self) -> UsageSummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::ModelPricing;

    fn tracker() -> UsageTracker {
        let pricing = PricingTable::empty();
        pricing.set("test/model", ModelPricing::new(1.0, 2.0));
        UsageTracker::new(Arc::new(pricing))
    }

    #[test]
    fn record_accumulates_cost() {
        let mut tracker = tracker();
        let cost = tracker.record("test/model", TokenUsage::new(1_000_000, 0));
        assert!((cost - 1.0).abs() < 1e-10);
        tracker.record("test/model", TokenUsage::new(0, 500_000));
        assert!((tracker.cost_usd() - 2.0).abs() < 1e-10);
        assert_eq!(tracker.summary().by_model["test/model"].calls, 2);
    }

    #[test]
    fn unknown_model_tracks_tokens_at_zero_cost() {
        let mut tracker = tracker();
        assert_eq!(tracker.record("other/model", TokenUsage::new(10, 10)), 0.0);
        assert_eq!(tracker.total().total(), 20);
        assert_eq!(tracker.cost_usd(), 0.0);
    }

    #[test]
    fn budget_trips_at_limit() {
        let mut tracker = tracker();
        tracker.check_budget(1.0).unwrap();
        tracker.record("test/model", TokenUsage::new(1_000_000, 0));
        let err = tracker.check_budget(1.0).unwrap_err();
        assert!(err.to_string().contains("1.0000"));
        // non-positive limits never trip
        tracker.check_budget(0.0).unwrap();
    }

    #[test]
    fn merge_nested_run() {
        let mut parent = tracker();
        let mut child = tracker();
        parent.record("test/model", TokenUsage::new(1_000_000, 0));
        child.record("test/model", TokenUsage::new(0, 1_000_000));
        parent.merge(child.summary());
        assert!((parent.cost_usd() - 3.0).abs() < 1e-10);
        assert_eq!(parent.summary().calls(), 2);
    }
}
