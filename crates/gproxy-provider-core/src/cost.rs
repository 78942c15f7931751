//! Strict-mode per-token cost calculation (spec.md §4.11). Pure functions
//! over `TokenCounts` and a per-model price table; the price table itself
//! comes from the out-of-scope pricing-catalog editor (spec.md §1), so this
//! module only consumes it.
//!
//! Grounded on `CostCalculator`/`ModelCostConfig` in
//! `examples/smoelius-litellm-rs/src/utils/business/cost.rs` (per-token vs
//! per-request billing, a default-config fallback) — the teacher has no
//! cost module of its own, so this one is built in the style of the other
//! Rust proxy in the pack that has the closest analogous concern.

use serde::{Deserialize, Serialize};

use crate::model::TokenCounts;

/// Per-1M-token prices for one `GlobalModel`, plus an optional flat
/// per-request surcharge (spec.md §4.11: "price_per_request (nullable)").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_creation_5m_per_million: f64,
    pub cache_creation_1h_per_million: f64,
    pub price_per_request: Option<f64>,
}

impl ModelPricing {
    pub const fn free() -> Self {
        Self {
            input_per_million: 0.0,
            output_per_million: 0.0,
            cache_read_per_million: 0.0,
            cache_creation_5m_per_million: 0.0,
            cache_creation_1h_per_million: 0.0,
            price_per_request: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostBreakdown {
    /// Surface price at the caller's rate (spec.md §3's `total_cost_usd`).
    pub total_cost_usd: f64,
    /// `total_cost_usd * key.rate_multiplier`, forced to 0 for `free_tier`
    /// providers (spec.md §3's `actual_total_cost_usd`).
    pub actual_total_cost_usd: f64,
}

/// spec.md §4.11's strict-mode formula: `Σ component token-costs +
/// request_cost (if any)`, then `actual = surface * rate_multiplier` (0 if
/// `is_free_tier`). Only called on the success path — spec.md §8's
/// invariant that a failed request's `request_cost_usd == 0` is the
/// caller's responsibility (it simply never calls this for a failed
/// terminal transition).
pub fn compute_cost(tokens: &TokenCounts, pricing: &ModelPricing, rate_multiplier: f64, is_free_tier: bool) -> CostBreakdown {
    let per_token = |count: u64, per_million: f64| (count as f64) * per_million / 1_000_000.0;

    let mut total = per_token(tokens.input_tokens, pricing.input_per_million)
        + per_token(tokens.output_tokens, pricing.output_per_million)
        + per_token(tokens.cache_read_tokens, pricing.cache_read_per_million)
        + per_token(tokens.cache_creation_5m, pricing.cache_creation_5m_per_million)
        + per_token(tokens.cache_creation_1h, pricing.cache_creation_1h_per_million);

    if let Some(flat) = pricing.price_per_request {
        total += flat;
    }

    let actual = if is_free_tier { 0.0 } else { total * rate_multiplier };

    CostBreakdown {
        total_cost_usd: total,
        actual_total_cost_usd: actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pricing() -> ModelPricing {
        ModelPricing {
            input_per_million: 3.0,
            output_per_million: 15.0,
            cache_read_per_million: 0.3,
            cache_creation_5m_per_million: 3.75,
            cache_creation_1h_per_million: 6.0,
            price_per_request: None,
        }
    }

    #[test]
    fn surface_cost_sums_every_token_component() {
        let tokens = TokenCounts {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            cache_read_tokens: 1_000_000,
            cache_creation_5m: 1_000_000,
            cache_creation_1h: 1_000_000,
        };
        let got = compute_cost(&tokens, &pricing(), 1.0, false);
        assert!((got.total_cost_usd - (3.0 + 15.0 + 0.3 + 3.75 + 6.0)).abs() < 1e-9);
    }

    #[test]
    fn actual_cost_applies_rate_multiplier() {
        let tokens = TokenCounts { input_tokens: 1_000_000, ..Default::default() };
        let got = compute_cost(&tokens, &pricing(), 0.5, false);
        assert!((got.actual_total_cost_usd - 1.5).abs() < 1e-9);
    }

    #[test]
    fn free_tier_providers_never_bill_actual_cost() {
        let tokens = TokenCounts { input_tokens: 1_000_000, output_tokens: 1_000_000, ..Default::default() };
        let got = compute_cost(&tokens, &pricing(), 1.0, true);
        assert!(got.total_cost_usd > 0.0);
        assert_eq!(got.actual_total_cost_usd, 0.0);
    }

    #[test]
    fn flat_request_price_is_added_once() {
        let mut p = pricing();
        p.price_per_request = Some(0.01);
        let got = compute_cost(&TokenCounts::default(), &p, 1.0, false);
        assert_eq!(got.total_cost_usd, 0.01);
    }
}
