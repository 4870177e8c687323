//! Budget envelope for metered work.
//!
//! Tracks running totals against four ceilings:
//! - Tokens
//! - Tool calls
//! - Wall time
//! - Cost in USD
//!
//! Totals only ever grow, and only through [`BudgetEnvelope::record_cost`].

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Budget ceilings for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCeilings {
    /// Maximum tokens, input plus output (default: 50_000)
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,

    /// Maximum metered calls (default: 50)
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u64,

    /// Maximum wall time spent in metered calls, in ms (default: 120_000)
    #[serde(default = "default_max_wall_ms")]
    pub max_wall_ms: u64,

    /// Maximum cost in USD (default: 1.0)
    #[serde(default = "default_max_usd")]
    pub max_usd: f64,
}

fn default_max_tokens() -> u64 {
    50_000
}
fn default_max_tool_calls() -> u64 {
    50
}
fn default_max_wall_ms() -> u64 {
    120_000
} // 2 min
fn default_max_usd() -> f64 {
    1.0
}

impl Default for BudgetCeilings {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            max_tool_calls: default_max_tool_calls(),
            max_wall_ms: default_max_wall_ms(),
            max_usd: default_max_usd(),
        }
    }
}

/// Ceilings plus running totals
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BudgetEnvelope {
    #[serde(flatten)]
    ceilings: BudgetCeilings,

    #[serde(default)]
    used_tokens: u64,

    #[serde(default)]
    used_tool_calls: u64,

    #[serde(default)]
    used_wall_ms: u64,

    #[serde(default)]
    used_usd: f64,
}

impl BudgetEnvelope {
    /// Fresh envelope with nothing used
    pub fn new(ceilings: BudgetCeilings) -> Self {
        Self {
            ceilings,
            used_tokens: 0,
            used_tool_calls: 0,
            used_wall_ms: 0,
            used_usd: 0.0,
        }
    }

    pub fn ceilings(&self) -> &BudgetCeilings {
        &self.ceilings
    }

    pub fn used_tokens(&self) -> u64 {
        self.used_tokens
    }

    pub fn used_tool_calls(&self) -> u64 {
        self.used_tool_calls
    }

    pub fn used_wall_ms(&self) -> u64 {
        self.used_wall_ms
    }

    pub fn used_usd(&self) -> f64 {
        self.used_usd
    }

    /// Remaining USD, never negative
    pub fn usd_remaining(&self) -> f64 {
        (self.ceilings.max_usd - self.used_usd).max(0.0)
    }

    /// True once any running total has reached its ceiling
    pub fn is_exhausted(&self) -> bool {
        self.used_tokens >= self.ceilings.max_tokens
            || self.used_tool_calls >= self.ceilings.max_tool_calls
            || self.used_wall_ms >= self.ceilings.max_wall_ms
            || self.used_usd >= self.ceilings.max_usd
    }

    /// Fail with [`CoreError::BudgetExhausted`] if no further work is allowed
    pub fn check(&self) -> CoreResult<()> {
        if self.is_exhausted() {
            return Err(CoreError::BudgetExhausted);
        }
        Ok(())
    }

    /// Add usage to every running total
    ///
    /// Increments are unsigned except for cost; a negative or non-finite
    /// cost is rejected and nothing is recorded.
    pub fn record_cost(
        &mut self,
        tokens: u64,
        usd: f64,
        tool_calls: u64,
        wall_ms: u64,
    ) -> CoreResult<()> {
        if !usd.is_finite() || usd < 0.0 {
            return Err(CoreError::InvalidUsage(format!(
                "usd increment must be finite and non-negative, got {}",
                usd
            )));
        }

        let was_exhausted = self.is_exhausted();

        self.used_tokens = self.used_tokens.saturating_add(tokens);
        self.used_usd += usd;
        self.used_tool_calls = self.used_tool_calls.saturating_add(tool_calls);
        self.used_wall_ms = self.used_wall_ms.saturating_add(wall_ms);

        if !was_exhausted && self.is_exhausted() {
            warn!(
                used_tokens = self.used_tokens,
                used_usd = self.used_usd,
                used_tool_calls = self.used_tool_calls,
                used_wall_ms = self.used_wall_ms,
                "Budget exhausted"
            );
        }

        Ok(())
    }
}

/// Shared handle to a budget envelope
///
/// Clones point at the same envelope, so one meter can be shared by several
/// runs in a process. `record_cost` holds the lock for the whole update.
#[derive(Debug, Clone, Default)]
pub struct BudgetMeter {
    inner: Arc<Mutex<BudgetEnvelope>>,
}

impl BudgetMeter {
    pub fn new(envelope: BudgetEnvelope) -> Self {
        Self {
            inner: Arc::new(Mutex::new(envelope)),
        }
    }

    /// Meter over a fresh envelope with the given ceilings
    pub fn with_ceilings(ceilings: BudgetCeilings) -> Self {
        Self::new(BudgetEnvelope::new(ceilings))
    }

    fn lock(&self) -> MutexGuard<'_, BudgetEnvelope> {
        // totals stay consistent even if a holder panicked mid-read
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_cost(
        &self,
        tokens: u64,
        usd: f64,
        tool_calls: u64,
        wall_ms: u64,
    ) -> CoreResult<()> {
        self.lock().record_cost(tokens, usd, tool_calls, wall_ms)
    }

    pub fn is_exhausted(&self) -> bool {
        self.lock().is_exhausted()
    }

    pub fn check(&self) -> CoreResult<()> {
        self.lock().check()
    }

    /// Copy of the current envelope
    pub fn snapshot(&self) -> BudgetEnvelope {
        self.lock().clone()
    }

    /// Whether two meters share the same envelope
    pub fn shares_with(&self, other: &BudgetMeter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Serialize for BudgetMeter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BudgetMeter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BudgetEnvelope::deserialize(deserializer).map(BudgetMeter::new)
    }
}
