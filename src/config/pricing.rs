//! Token pricing for realtime models.
//!
//! Single source of truth for the per-category token prices used by the
//! usage ledger. Prices are USD per 1 million tokens.
//!
//! # Usage
//!
//! ```rust,ignore
//! use realtime_gateway::config::pricing::{get_token_price, estimate_token_cost};
//!
//! let price = get_token_price("realtime_mini_output_text");
//! let cost = estimate_token_cost("realtime_output_audio", 1_000);
//! ```

use std::collections::HashMap;
use std::sync::LazyLock;

// =============================================================================
// Pricing Types
// =============================================================================

/// Pricing information for one token category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPricing {
    /// Price in USD per 1 million tokens
    pub per_million: f64,
}

impl TokenPricing {
    /// Create new pricing entry.
    pub const fn new(per_million: f64) -> Self {
        Self { per_million }
    }

    /// Cost of `tokens` tokens at this price.
    #[inline]
    pub fn cost(&self, tokens: u64) -> f64 {
        tokens as f64 * self.per_million / 1_000_000.0
    }
}

// =============================================================================
// Realtime Pricing
// =============================================================================

/// Prices keyed by `{model_prefix}_{category}`.
static REALTIME_PRICING: LazyLock<HashMap<&'static str, TokenPricing>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    // gpt-4o-mini-realtime
    m.insert("realtime_mini_input_text", TokenPricing::new(0.6));
    m.insert("realtime_mini_input_text_cached", TokenPricing::new(0.3));
    m.insert("realtime_mini_output_text", TokenPricing::new(2.4));
    m.insert("realtime_mini_input_audio", TokenPricing::new(10.0));
    m.insert("realtime_mini_input_audio_cached", TokenPricing::new(0.3));
    m.insert("realtime_mini_output_audio", TokenPricing::new(20.0));

    // gpt-4o-realtime
    m.insert("realtime_input_text", TokenPricing::new(5.0));
    m.insert("realtime_input_text_cached", TokenPricing::new(2.5));
    m.insert("realtime_output_text", TokenPricing::new(20.0));
    m.insert("realtime_input_audio", TokenPricing::new(40.0));
    m.insert("realtime_input_audio_cached", TokenPricing::new(2.5));
    m.insert("realtime_output_audio", TokenPricing::new(80.0));

    m
});

/// Get pricing for a price key such as `realtime_output_text`.
pub fn get_token_pricing(key: &str) -> Option<&'static TokenPricing> {
    REALTIME_PRICING.get(key.to_lowercase().as_str())
}

/// Get the price per million tokens for a price key.
pub fn get_token_price(key: &str) -> Option<f64> {
    get_token_pricing(key).map(|p| p.per_million)
}

/// Estimate the cost of `tokens` tokens for a price key.
pub fn estimate_token_cost(key: &str, tokens: u64) -> Option<f64> {
    get_token_pricing(key).map(|p| p.cost(tokens))
}

/// List the price keys known for a model prefix (`realtime` or `realtime_mini`).
pub fn list_price_keys(prefix: &str) -> Vec<&'static str> {
    let other_prefix = format!("{prefix}_mini_");
    let prefix = format!("{prefix}_");
    let mut keys: Vec<_> = REALTIME_PRICING
        .keys()
        .filter(|k| k.starts_with(&prefix) && !k.starts_with(&other_prefix))
        .copied()
        .collect();
    keys.sort_unstable();
    keys
}
