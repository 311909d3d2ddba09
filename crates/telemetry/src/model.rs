//! Usage summaries reported at the end of a run.

use conductor_core::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Usage and cost attributed to one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub usage: TokenUsage,
    pub cost_usd: f64,
    /// Number of provider responses recorded for this model
    pub calls: u64,
}

/// Accumulated usage for a run, including any synchronous subagents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total: TokenUsage,
    pub cost_usd: f64,
    pub by_model: BTreeMap<String, ModelUsage>,
}

impl UsageSummary {
    /// Fold another summary into this one, model by model.
    pub fn merge(&mut self, other: &UsageSummary) {
        self.total += other.total;
        self.cost_usd += other.cost_usd;
        for (model, usage) in &other.by_model {
            let entry = self.by_model.entry(model.clone()).or_default();
            entry.usage += usage.usage;
            entry.cost_usd += usage.cost_usd;
            entry.calls += usage.calls;
        }
    }

    pub fn calls(&self) -> u64 {
        self.by_model.values().map(|m| m.calls).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(model: &str, usage: TokenUsage, cost: f64) -> UsageSummary {
        let mut by_model = BTreeMap::new();
        by_model.insert(
            model.to_string(),
            ModelUsage {
                usage,
                cost_usd: cost,
                calls: 1,
            },
        );
        UsageSummary {
            total: usage,
            cost_usd: cost,
            by_model,
        }
    }

    #[test]
    fn merge_keeps_models_apart() {
        let mut parent = single("sonnet", TokenUsage::new(100, 10), 0.5);
        parent.merge(&single("haiku", TokenUsage::new(50, 5), 0.1));
        parent.merge(&single("sonnet", TokenUsage::new(1, 1), 0.25));

        assert_eq!(parent.total, TokenUsage::new(151, 16));
        assert!((parent.cost_usd - 0.85).abs() < 1e-10);
        assert_eq!(parent.by_model.len(), 2);
        assert_eq!(parent.by_model["sonnet"].calls, 2);
        assert_eq!(parent.calls(), 3);
    }
}
