//! In-memory provider that replays a fixed script of outcomes.
//!
//! Used for tests and offline runs; satisfies the [`Provider`] contract
//! without any network access.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{CompletionRequest, Provider, ProviderFailure, ProviderResponse};

type Outcome = Result<ProviderResponse, ProviderFailure>;

/// Provider returning scripted outcomes in order
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Outcome>>,
    calls: Arc<Mutex<Vec<CompletionRequest>>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: ProviderResponse) -> Self {
        self.push(Ok(response))
    }

    pub fn with_failure(self, failure: ProviderFailure) -> Self {
        self.push(Err(failure))
    }

    /// Sleep this long before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, outcome: Outcome) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(outcome);
        self
    }

    /// Shared log of every request received, in order
    pub fn call_log(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ProviderResponse, ProviderFailure> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(ProviderFailure::new("script exhausted")))
    }
}
