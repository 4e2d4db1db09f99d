//! Token usage ledger.
//!
//! Each completed response contributes a ledger fragment computed from the
//! token counts on its `response.done`. Fragments merge additively, so the
//! order in which responses complete does not change the totals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::config::ModelVariant;
use super::messages::ResponseUsage;
use crate::config::pricing::get_token_pricing;

/// Tokens and cost accumulated for one category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    /// Token count
    pub tokens: u64,
    /// USD per 1M tokens, if the category is priced
    pub cost_per_million: Option<f64>,
    /// Accumulated cost in USD
    pub usage_cost: f64,
}

impl UsageEntry {
    fn priced(tokens: u64, price_key: &str) -> Self {
        match get_token_pricing(price_key) {
            Some(pricing) => Self {
                tokens,
                cost_per_million: Some(pricing.per_million),
                usage_cost: pricing.cost(tokens),
            },
            None => Self {
                tokens,
                cost_per_million: None,
                usage_cost: 0.0,
            },
        }
    }

    fn merge(&mut self, other: &UsageEntry) {
        self.tokens += other.tokens;
        self.usage_cost += other.usage_cost;
        if self.cost_per_million.is_none() {
            self.cost_per_million = other.cost_per_million;
        }
    }
}

/// Response timing statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeTimeStats {
    /// Responses recorded
    pub total_responses: u64,
    /// Sum of response times in milliseconds
    pub total_response_time: u64,
    /// Mean response time in milliseconds
    pub average_response_time: f64,
}

impl ComputeTimeStats {
    fn record(&mut self, elapsed: Duration) {
        self.total_responses += 1;
        self.total_response_time += elapsed.as_millis() as u64;
        self.recompute();
    }

    fn merge(&mut self, other: &ComputeTimeStats) {
        self.total_responses += other.total_responses;
        self.total_response_time += other.total_response_time;
        self.recompute();
    }

    fn recompute(&mut self) {
        self.average_response_time = if self.total_responses == 0 {
            0.0
        } else {
            self.total_response_time as f64 / self.total_responses as f64
        };
    }
}

/// Per-category usage with a running total cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageLedger {
    /// Entries keyed by category, e.g. `realtime_output_text_tokens`
    pub categories: BTreeMap<String, UsageEntry>,
    /// Sum of every category's cost
    pub total_cost: f64,
    /// Response timing
    pub compute: ComputeTimeStats,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add another ledger into this one.
    pub fn merge(&mut self, other: &UsageLedger) {
        for (category, entry) in &other.categories {
            self.categories
                .entry(category.clone())
                .or_default()
                .merge(entry);
        }
        self.total_cost += other.total_cost;
        self.compute.merge(&other.compute);
    }

    /// Record one response's compute time.
    pub fn record_compute_time(&mut self, elapsed: Duration) {
        self.compute.record(elapsed);
    }

    pub fn get(&self, category: &str) -> Option<&UsageEntry> {
        self.categories.get(category)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Sum of tokens over every priced category.
    pub fn total_tokens(&self) -> u64 {
        self.categories
            .values()
            .filter(|e| e.cost_per_million.is_some())
            .map(|e| e.tokens)
            .sum()
    }

    fn add(&mut self, category: String, entry: UsageEntry) {
        if entry.tokens == 0 {
            return;
        }
        self.total_cost += entry.usage_cost;
        self.categories.entry(category).or_default().merge(&entry);
    }
}

/// Compute the ledger fragment for one response's reported usage.
pub fn compute_usage(usage: &ResponseUsage, variant: ModelVariant) -> UsageLedger {
    let prefix = variant.price_prefix();
    let input = &usage.input_token_details;
    let cached = &input.cached_tokens_details;
    let output = &usage.output_token_details;

    let categories = [
        (
            "input_text",
            "input_text_tokens",
            input.text_tokens.saturating_sub(cached.text_tokens),
        ),
        (
            "input_text_cached",
            "input_text_tokens_cached",
            cached.text_tokens,
        ),
        (
            "input_audio",
            "input_audio_tokens",
            input.audio_tokens.saturating_sub(cached.audio_tokens),
        ),
        (
            "input_audio_cached",
            "input_audio_tokens_cached",
            cached.audio_tokens,
        ),
        ("output_text", "output_text_tokens", output.text_tokens),
        ("output_audio", "output_audio_tokens", output.audio_tokens),
    ];

    let mut ledger = UsageLedger::new();
    for (price, category, tokens) in categories {
        ledger.add(
            format!("{prefix}_{category}"),
            UsageEntry::priced(tokens, &format!("{prefix}_{price}")),
        );
    }
    ledger.add(
        format!("{prefix}_input_text_tokens_gross"),
        UsageEntry::priced(input.text_tokens, ""),
    );
    ledger
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::messages::{InputTokenDetails, TokenDetails};

    fn usage(text_in: u64, cached_text: u64, audio_in: u64, text_out: u64, audio_out: u64) -> ResponseUsage {
        ResponseUsage {
            total_tokens: text_in + audio_in + text_out + audio_out,
            input_tokens: text_in + audio_in,
            output_tokens: text_out + audio_out,
            input_token_details: InputTokenDetails {
                cached_tokens: cached_text,
                text_tokens: text_in,
                audio_tokens: audio_in,
                cached_tokens_details: TokenDetails {
                    text_tokens: cached_text,
                    audio_tokens: 0,
                },
            },
            output_token_details: TokenDetails {
                text_tokens: text_out,
                audio_tokens: audio_out,
            },
        }
    }

    #[test]
    fn test_text_only_response() {
        let ledger = compute_usage(&usage(100, 20, 0, 10, 0), ModelVariant::Gpt4o);

        let input = ledger.get("realtime_input_text_tokens").unwrap();
        assert_eq!(input.tokens, 80);
        assert_eq!(input.cost_per_million, Some(5.0));

        let cached = ledger.get("realtime_input_text_tokens_cached").unwrap();
        assert_eq!(cached.tokens, 20);

        let output = ledger.get("realtime_output_text_tokens").unwrap();
        assert_eq!(output.tokens, 10);
        assert!((output.usage_cost - 10.0 * 20.0 / 1e6).abs() < 1e-12);

        assert!(ledger.get("realtime_output_audio_tokens").is_none());
        assert!(ledger.get("realtime_input_audio_tokens").is_none());

        let gross = ledger.get("realtime_input_text_tokens_gross").unwrap();
        assert_eq!(gross.tokens, 100);
        assert_eq!(gross.cost_per_million, None);

        let expected = (80.0 * 5.0 + 20.0 * 2.5 + 10.0 * 20.0) / 1e6;
        assert!((ledger.total_cost - expected).abs() < 1e-12);
        assert_eq!(ledger.total_tokens(), 110);
    }

    #[test]
    fn test_mini_prefix() {
        let ledger = compute_usage(&usage(10, 0, 50, 0, 200), ModelVariant::Gpt4oMini);
        assert_eq!(ledger.get("realtime_mini_input_audio_tokens").unwrap().tokens, 50);
        let out = ledger.get("realtime_mini_output_audio_tokens").unwrap();
        assert_eq!(out.cost_per_million, Some(20.0));
        assert!(ledger.categories.keys().all(|k| k.starts_with("realtime_mini_")));
    }

    #[test]
    fn test_merge_is_commutative() {
        let r1 = compute_usage(&usage(100, 20, 0, 10, 0), ModelVariant::Gpt4o);
        let r2 = compute_usage(&usage(30, 0, 400, 5, 900), ModelVariant::Gpt4o);

        let mut a = UsageLedger::new();
        a.merge(&r1);
        a.merge(&r2);

        let mut b = UsageLedger::new();
        b.merge(&r2);
        b.merge(&r1);

        assert_eq!(a, b);
        assert_eq!(a.get("realtime_input_text_tokens").unwrap().tokens, 110);
        assert_eq!(a.get("realtime_output_audio_tokens").unwrap().tokens, 900);
    }

    #[test]
    fn test_merge_is_associative_in_tokens() {
        let r1 = compute_usage(&usage(1, 0, 2, 3, 4), ModelVariant::Gpt4o);
        let r2 = compute_usage(&usage(5, 1, 6, 7, 8), ModelVariant::Gpt4o);
        let r3 = compute_usage(&usage(9, 2, 10, 11, 12), ModelVariant::Gpt4o);

        let mut left = r1.clone();
        left.merge(&r2);
        left.merge(&r3);

        let mut inner = r2.clone();
        inner.merge(&r3);
        let mut right = r1.clone();
        right.merge(&inner);

        for (category, entry) in &left.categories {
            assert_eq!(entry.tokens, right.get(category).unwrap().tokens);
        }
        assert!((left.total_cost - right.total_cost).abs() < 1e-12);
    }

    #[test]
    fn test_compute_time_stats() {
        let mut ledger = UsageLedger::new();
        ledger.record_compute_time(Duration::from_millis(100));
        ledger.record_compute_time(Duration::from_millis(300));
        assert_eq!(ledger.compute.total_responses, 2);
        assert_eq!(ledger.compute.total_response_time, 400);
        assert!((ledger.compute.average_response_time - 200.0).abs() < f64::EPSILON);

        let mut other = UsageLedger::new();
        other.record_compute_time(Duration::from_millis(500));
        ledger.merge(&other);
        assert_eq!(ledger.compute.total_responses, 3);
        assert!((ledger.compute.average_response_time - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_usage_is_empty() {
        let ledger = compute_usage(&ResponseUsage::default(), ModelVariant::Gpt4o);
        assert!(ledger.is_empty());
        assert_eq!(ledger.total_cost, 0.0);
    }
}
