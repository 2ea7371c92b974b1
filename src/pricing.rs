//! Per-model token prices and usage cost.

use crate::backend::TokenUsage;

/// Price per 1,000 tokens, in dollars.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub prompt: f64,
    pub completion: f64,
}

/// Price used for models missing from [`PRICES`] (the `gpt-3.5-turbo` rate).
pub const DEFAULT_PRICE: ModelPrice = ModelPrice {
    prompt: 0.0015,
    completion: 0.002,
};

/// Process-wide price table.
pub static PRICES: &[(&str, ModelPrice)] = &[
    ("gpt-3.5-turbo", DEFAULT_PRICE),
    ("gpt-3.5-turbo-16k", ModelPrice { prompt: 0.003, completion: 0.004 }),
    ("gpt-4", ModelPrice { prompt: 0.03, completion: 0.06 }),
    ("gpt-4-32k", ModelPrice { prompt: 0.06, completion: 0.12 }),
    ("gpt-4.1", ModelPrice { prompt: 0.002, completion: 0.008 }),
    ("gpt-4.1-mini", ModelPrice { prompt: 0.0004, completion: 0.0016 }),
    ("gpt-4.1-nano", ModelPrice { prompt: 0.0001, completion: 0.0004 }),
];

/// Price of `model`, falling back to [`DEFAULT_PRICE`].
pub fn price_for(model: &str) -> ModelPrice {
    PRICES
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, price)| *price)
        .unwrap_or(DEFAULT_PRICE)
}

/// Dollar cost of one call, rounded to four decimals.
pub fn usage_cost(model: &str, usage: &TokenUsage) -> f64 {
    let price = price_for(model);
    let raw = price.prompt * (usage.prompt_tokens as f64 / 1000.0)
        + price.completion * (usage.completion_tokens as f64 / 1000.0);
    (raw * 10_000.0).round() / 10_000.0
}
