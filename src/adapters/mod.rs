//! Adapter interfaces for metered external work.
//!
//! A [`Provider`] performs one completion call. The core never talks to a
//! provider directly: every call goes through a [`MeteredClient`], which
//! checks and charges the run's budget.

pub mod metered;
pub mod pricing;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use metered::{Completion, MeteredClient};
pub use pricing::{estimate_cost, ModelCost, DEFAULT_MODEL};
pub use scripted::ScriptedProvider;

/// One completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,

    /// System prompt (may be empty)
    #[serde(default)]
    pub system: String,

    /// Model name; empty means the client's default model
    #[serde(default)]
    pub model: String,

    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// Request with default sampling settings
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: String::new(),
            model: String::new(),
            max_tokens: 2000,
            temperature: 0.2,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// What a provider returns on success
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,

    /// Provider-reported cost; estimated from the price table when absent
    pub cost_usd: Option<f64>,
}

impl ProviderResponse {
    pub fn new(text: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            text: text.into(),
            input_tokens,
            output_tokens,
            cost_usd: None,
        }
    }
}

/// A failed provider call
///
/// Token counts are non-zero when the provider consumed tokens before
/// failing; such calls are still charged.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFailure {
    pub message: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ProviderFailure {
    /// Failure that consumed nothing
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn with_tokens(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn consumed_tokens(&self) -> bool {
        self.input_tokens + self.output_tokens > 0
    }
}

/// Trait for metered-work providers
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Perform one completion; `request.model` is always non-empty here
    async fn complete(&self, request: &CompletionRequest)
        -> Result<ProviderResponse, ProviderFailure>;
}
