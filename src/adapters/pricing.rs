//! Per-model price table.

/// Model used when a request does not name one
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// USD per 1K tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
}

const MODEL_COSTS: &[(&str, ModelCost)] = &[
    (
        "gemini-2.0-flash",
        ModelCost {
            input: 0.000075,
            output: 0.0003,
        },
    ),
    (
        "gemini-2.5-pro",
        ModelCost {
            input: 0.00125,
            output: 0.005,
        },
    ),
    (
        "claude-sonnet-4-20250514",
        ModelCost {
            input: 0.003,
            output: 0.015,
        },
    ),
    (
        "claude-haiku-4-5-20251001",
        ModelCost {
            input: 0.0008,
            output: 0.004,
        },
    ),
];

/// Price of `model`, falling back to the default model's price
pub fn model_cost(model: &str) -> ModelCost {
    MODEL_COSTS
        .iter()
        .find(|(name, _)| *name == model)
        .or_else(|| MODEL_COSTS.iter().find(|(name, _)| *name == DEFAULT_MODEL))
        .map(|(_, cost)| *cost)
        .unwrap_or(ModelCost {
            input: 0.0,
            output: 0.0,
        })
}

/// Estimated USD cost of a call
pub fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let cost = model_cost(model);
    (input_tokens as f64 * cost.input + output_tokens as f64 * cost.output) / 1000.0
}
