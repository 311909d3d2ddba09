//! Pricing table for LLM models.
//!
//! Prices are in USD per 1 million tokens. Cache writes and reads have their
//! own rates; when a model has none configured they are derived from the
//! input price. Models missing from the table cost nothing.

use conductor_config::PricingConfig;
use conductor_core::TokenUsage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Multiplier applied to the input price for cache writes without an explicit rate.
const CACHE_WRITE_FACTOR: f64 = 1.25;
/// Multiplier applied to the input price for cache reads without an explicit rate.
const CACHE_READ_FACTOR: f64 = 0.1;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
    pub cache_write_per_m: f64,
    pub cache_read_per_m: f64,
}

impl ModelPricing {
    /// Pricing with cache rates derived from the input price.
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cache_write_per_m: input_per_m * CACHE_WRITE_FACTOR,
            cache_read_per_m: input_per_m * CACHE_READ_FACTOR,
        }
    }

    /// Compute cost for one usage report.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 * self.input_per_m
            + usage.output_tokens as f64 * self.output_per_m
            + usage.cache_creation_input_tokens as f64 * self.cache_write_per_m
            + usage.cache_read_input_tokens as f64 * self.cache_read_per_m)
            / 1_000_000.0
    }
}

impl From<&PricingConfig> for ModelPricing {
    fn from(config: &PricingConfig) -> Self {
        let base = Self::new(config.input_per_m, config.output_per_m);
        Self {
            cache_write_per_m: config.cache_write_per_m.unwrap_or(base.cache_write_per_m),
            cache_read_per_m: config.cache_read_per_m.unwrap_or(base.cache_read_per_m),
            ..base
        }
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let defaults = [
            ("anthropic/claude-opus-4", ModelPricing::new(15.0, 75.0)),
            ("anthropic/claude-sonnet-4", ModelPricing::new(3.0, 15.0)),
            ("anthropic/claude-3.7-sonnet", ModelPricing::new(3.0, 15.0)),
            ("anthropic/claude-3.5-haiku", ModelPricing::new(0.8, 4.0)),
            ("openai/gpt-4o", ModelPricing::new(2.5, 10.0)),
            ("openai/gpt-4o-mini", ModelPricing::new(0.15, 0.6)),
            ("openai/o3-mini", ModelPricing::new(1.1, 4.4)),
            ("google/gemini-2.0-flash", ModelPricing::new(0.1, 0.4)),
            ("google/gemini-2.5-pro", ModelPricing::new(1.25, 10.0)),
            ("deepseek/deepseek-v3", ModelPricing::new(0.27, 1.1)),
        ];
        let prices = defaults
            .into_iter()
            .map(|(model, pricing)| (model.to_string(), pricing))
            .collect();
        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Built-in prices overlaid with `[pricing.<model>]` entries.
    pub fn from_config(overrides: &BTreeMap<String, PricingConfig>) -> Self {
        let table = Self::with_defaults();
        for (model, config) in overrides {
            table.set(model.clone(), ModelPricing::from(config));
        }
        table
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model)
            .cloned()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        self.prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(model.into(), pricing);
    }

    /// Resolve pricing for a model id as reported by a provider.
    ///
    /// Tries an exact match, then the bare name against each key's bare name
    /// (`claude-sonnet-4` matches `anthropic/claude-sonnet-4`), then the
    /// longest key whose bare name prefixes the model
    /// (`claude-sonnet-4-20250514` matches `claude-sonnet-4`).
    pub fn resolve(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);

        if let Some(p) = prices.get(model) {
            return Some(p.clone());
        }

        let lower = model.to_lowercase();
        let bare_model = lower.rsplit('/').next().unwrap_or(&lower);

        let mut best: Option<(usize, &ModelPricing)> = None;
        for (key, pricing) in prices.iter() {
            let bare_key = key.rsplit('/').next().unwrap_or(key).to_lowercase();
            if bare_model == bare_key {
                return Some(pricing.clone());
            }
            if bare_model.starts_with(&bare_key) && best.is_none_or(|(len, _)| bare_key.len() > len) {
                best = Some((bare_key.len(), pricing));
            }
        }
        best.map(|(_, p)| p.clone())
    }

    /// Cost of one usage report, 0.0 for unknown models.
    pub fn compute_cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        self.resolve(model).map_or(0.0, |p| p.cost(usage))
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for PricingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingTable").field("models", &self.len()).finish()
    }
}
