//! Model pricing and cost estimation.
//!
//! Cost is computed from per-million-token rates, keyed by a longest-prefix
//! match on the model name so versioned model identifiers resolve to their
//! family rates. Cached input tokens are billed at a tenth of the input rate.

use trainloop_types::cache::TokenUsage;
use trainloop_types::config::ModelPricing;

/// Discount multiplier applied to cached input tokens.
const CACHED_TOKEN_RATE: f64 = 0.1;

/// Built-in fallback rates (per million tokens) used when no configured
/// entry matches a model.
const DEFAULT_RATES: &[(&str, f64, f64)] = &[
    ("claude-sonnet-4", 3.00, 15.00),
    ("claude-opus-4", 15.00, 75.00),
    ("claude-haiku-3", 0.25, 1.25),
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gemini-2", 1.25, 5.00),
    ("mistral-large", 2.00, 6.00),
];

/// Conservative rate used when a model matches nothing at all, so unknown
/// models still produce a non-zero estimate.
const FALLBACK_RATES: (f64, f64) = (5.00, 15.00);

/// Resolves model names to per-token rates and estimates request cost.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    overrides: Vec<ModelPricing>,
}

impl PriceTable {
    /// Build a price table with configured overrides taking precedence over
    /// the built-in defaults.
    pub fn new(overrides: Vec<ModelPricing>) -> Self {
        Self { overrides }
    }

    /// Per-million-token (input, output) rates for a model.
    ///
    /// Configured overrides are checked first, then built-in defaults, both
    /// by longest prefix match. Unknown models fall back to a conservative
    /// default rate.
    pub fn rates_for(&self, model: &str) -> (f64, f64) {
        let mut best: Option<(usize, f64, f64)> = None;
        for entry in &self.overrides {
            if model.starts_with(&entry.model_pattern) {
                let len = entry.model_pattern.len();
                if best.is_none_or(|(l, _, _)| len > l) {
                    best = Some((
                        len,
                        entry.input_cost_per_million,
                        entry.output_cost_per_million,
                    ));
                }
            }
        }
        if let Some((_, input, output)) = best {
            return (input, output);
        }

        let mut best: Option<(usize, f64, f64)> = None;
        for (pattern, input, output) in DEFAULT_RATES {
            if model.starts_with(pattern) {
                let len = pattern.len();
                if best.is_none_or(|(l, _, _)| len > l) {
                    best = Some((len, *input, *output));
                }
            }
        }
        best.map(|(_, i, o)| (i, o)).unwrap_or(FALLBACK_RATES)
    }

    /// Estimated dollar cost for a request's token usage.
    ///
    /// Cached tokens are a subset of input tokens already counted in
    /// `input_tokens`; they are rebated down to the cached rate.
    pub fn estimate_cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        let (input_rate, output_rate) = self.rates_for(model);
        let per_token_input = input_rate / 1_000_000.0;
        let per_token_output = output_rate / 1_000_000.0;

        let cached = usage.cached_tokens.min(usage.input_tokens);
        let full_price_input = usage.input_tokens - cached;

        full_price_input as f64 * per_token_input
            + cached as f64 * per_token_input * CACHED_TOKEN_RATE
            + usage.output_tokens as f64 * per_token_output
    }
}

/// Format a cost estimate as a human-readable string.
///
/// Always prefixed with `~` to indicate the value is an estimate.
pub fn format_cost(cost: f64) -> String {
    if cost < 0.01 {
        format!("~${cost:.3}")
    } else {
        format!("~${cost:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_match_resolves_versioned_model() {
        let table = PriceTable::default();
        let (input, output) = table.rates_for("gpt-4o-2024-08-06");
        assert_eq!(input, 2.50);
        assert_eq!(output, 10.00);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = PriceTable::default();
        // "gpt-4o-mini-..." must match the mini rates, not the gpt-4o rates.
        let (input, _) = table.rates_for("gpt-4o-mini-2024-07-18");
        assert_eq!(input, 0.15);
    }

    #[test]
    fn test_override_beats_default() {
        let table = PriceTable::new(vec![ModelPricing {
            model_pattern: "gpt-4o".to_string(),
            input_cost_per_million: 1.00,
            output_cost_per_million: 4.00,
        }]);
        assert_eq!(table.rates_for("gpt-4o-2024-08-06"), (1.00, 4.00));
    }

    #[test]
    fn test_unknown_model_uses_fallback() {
        let table = PriceTable::default();
        assert_eq!(table.rates_for("some-local-model"), FALLBACK_RATES);
    }

    #[test]
    fn test_estimate_cost_basic() {
        let table = PriceTable::default();
        let usage = TokenUsage::new(1_000_000, 1_000_000);
        let cost = table.estimate_cost("gpt-4o-mini", &usage);
        assert!((cost - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_cached_tokens_discounted() {
        let table = PriceTable::default();
        let mut usage = TokenUsage::new(1_000_000, 0);
        usage.cached_tokens = 1_000_000;
        let cost = table.estimate_cost("gpt-4o-mini", &usage);
        // All input cached: a tenth of the full input price.
        assert!((cost - 0.015).abs() < 1e-9);
    }

    #[test]
    fn test_cached_tokens_clamped_to_input() {
        let table = PriceTable::default();
        let mut usage = TokenUsage::new(100, 0);
        usage.cached_tokens = 10_000;
        let cost = table.estimate_cost("gpt-4o-mini", &usage);
        assert!(cost > 0.0);
        assert!(cost < table.estimate_cost("gpt-4o-mini", &TokenUsage::new(100, 0)));
    }

    #[test]
    fn test_format_cost() {
        assert_eq!(format_cost(1.5), "~$1.50");
        assert_eq!(format_cost(0.0054), "~$0.005");
        assert_eq!(format_cost(0.0), "~$0.000");
    }
}
