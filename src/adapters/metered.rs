//! Metered client: the only path from the core to a provider.
//!
//! Every call checks the budget first, runs under a timeout, and charges
//! tokens, cost, one tool call and latency to the budget. Failed calls are
//! charged too when they consumed tokens. Nothing is retried here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::pricing::{estimate_cost, DEFAULT_MODEL};
use super::{CompletionRequest, Provider, ProviderFailure};
use crate::domain::BudgetMeter;
use crate::error::{CoreError, CoreResult};

/// Result of one metered call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_token_count: u64,
    pub output_token_count: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Completion {
    fn failed(model: &str, error: &CoreError, latency_ms: u64) -> Self {
        Self {
            text: String::new(),
            model: model.to_string(),
            input_token_count: 0,
            output_token_count: 0,
            cost_usd: 0.0,
            latency_ms,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Provider wrapper that enforces the budget
#[derive(Clone)]
pub struct MeteredClient {
    provider: Arc<dyn Provider>,
    default_model: String,
    call_timeout: Duration,
}

impl std::fmt::Debug for MeteredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeteredClient")
            .field("provider", &self.provider.name())
            .field("default_model", &self.default_model)
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}

impl MeteredClient {
    /// Client with the default model and a 60s per-call timeout
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            default_model: DEFAULT_MODEL.to_string(),
            call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Perform one call, failing with `BudgetExhausted` or `Provider`
    pub async fn complete(
        &self,
        budget: &BudgetMeter,
        request: &CompletionRequest,
    ) -> CoreResult<Completion> {
        let (completion, error) = self.execute(budget, request).await;
        match error {
            Some(error) => Err(error),
            None => Ok(completion),
        }
    }

    /// Perform one call, reporting failure inside the completion instead
    ///
    /// A refused call carries the reserved `budget_exhausted` marker as its
    /// error.
    pub async fn call(&self, budget: &BudgetMeter, request: &CompletionRequest) -> Completion {
        self.execute(budget, request).await.0
    }

    async fn execute(
        &self,
        budget: &BudgetMeter,
        request: &CompletionRequest,
    ) -> (Completion, Option<CoreError>) {
        let model = if request.model.is_empty() {
            self.default_model.clone()
        } else {
            request.model.clone()
        };

        if budget.is_exhausted() {
            warn!(%model, provider = self.provider.name(), "Refusing metered call: budget exhausted");
            let error = CoreError::BudgetExhausted;
            return (Completion::failed(&model, &error, 0), Some(error));
        }

        let mut request = request.clone();
        request.model = model.clone();

        let started = Instant::now();
        let outcome = timeout(self.call_timeout, self.provider.complete(&request)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(ProviderFailure::new(format!(
                "call timed out after {:?}",
                self.call_timeout
            ))),
        };

        match result {
            Ok(response) => {
                let estimated = estimate_cost(&model, response.input_tokens, response.output_tokens);
                let cost_usd = match response.cost_usd {
                    Some(reported) if reported.is_finite() && reported >= 0.0 => reported,
                    Some(reported) => {
                        warn!(%model, reported, "Provider reported an unusable cost, using the price table");
                        estimated
                    }
                    None => estimated,
                };
                let tokens = response.input_tokens.saturating_add(response.output_tokens);

                if let Err(error) = budget.record_cost(tokens, cost_usd, 1, latency_ms) {
                    return (Completion::failed(&model, &error, latency_ms), Some(error));
                }

                debug!(%model, tokens, cost_usd, latency_ms, "Metered call completed");

                let completion = Completion {
                    text: response.text,
                    model,
                    input_token_count: response.input_tokens,
                    output_token_count: response.output_tokens,
                    cost_usd,
                    latency_ms,
                    success: true,
                    error: None,
                };
                (completion, None)
            }
            Err(failure) => {
                let mut cost_usd = 0.0;
                if failure.consumed_tokens() {
                    cost_usd = estimate_cost(&model, failure.input_tokens, failure.output_tokens);
                    let tokens = failure.input_tokens.saturating_add(failure.output_tokens);
                    if let Err(error) = budget.record_cost(tokens, cost_usd, 1, latency_ms) {
                        return (Completion::failed(&model, &error, latency_ms), Some(error));
                    }
                }

                warn!(%model, error = %failure.message, latency_ms, "Metered call failed");

                let error = CoreError::Provider {
                    model: model.clone(),
                    message: failure.message,
                };
                let completion = Completion {
                    input_token_count: failure.input_tokens,
                    output_token_count: failure.output_tokens,
                    cost_usd,
                    ..Completion::failed(&model, &error, latency_ms)
                };
                (completion, Some(error))
            }
        }
    }
}
