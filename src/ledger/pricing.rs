use std::collections::BTreeMap;

use agentflow_common::TokenUsage;
use serde::{Deserialize, Serialize};

/// USD per million tokens for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input: f64,
    pub output: f64,
    #[serde(default)]
    pub cache_read: f64,
    #[serde(default)]
    pub cache_write: f64,
}

impl ModelPricing {
    pub const fn new(input: f64, output: f64, cache_read: f64, cache_write: f64) -> Self {
        Self {
            input,
            output,
            cache_read,
            cache_write,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        const PER: f64 = 1_000_000.0;
        (usage.input as f64 * self.input
            + usage.output as f64 * self.output
            + usage.cache_read as f64 * self.cache_read
            + usage.cache_creation as f64 * self.cache_write)
            / PER
    }
}

const SONNET: ModelPricing = ModelPricing::new(3.0, 15.0, 0.30, 3.75);
const OPUS: ModelPricing = ModelPricing::new(15.0, 75.0, 1.50, 18.75);
const HAIKU: ModelPricing = ModelPricing::new(0.80, 4.0, 0.08, 1.00);

/// Prices keyed by model identifier or identifier prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    entries: BTreeMap<String, ModelPricing>,
}

impl Default for PricingTable {
    fn default() -> Self {
        let entries = [
            ("claude-sonnet", SONNET),
            ("sonnet", SONNET),
            ("claude-opus", OPUS),
            ("opus", OPUS),
            ("claude-haiku", HAIKU),
            ("haiku", HAIKU),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self { entries }
    }
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.entries.insert(model.into(), pricing);
    }

    /// Exact identifier first, then the longest configured prefix.
    pub fn lookup(&self, model: &str) -> Option<&ModelPricing> {
        if let Some(pricing) = self.entries.get(model) {
            return Some(pricing);
        }
        self.entries
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, pricing)| pricing)
    }

    pub fn models(&self) -> impl Iterator<Item = (&str, &ModelPricing)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
