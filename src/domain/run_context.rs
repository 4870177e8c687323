//! Per-run state threaded through every stage.
//!
//! A `RunContext` is created at pipeline start and borrowed mutably by one
//! stage at a time. Stages append to its logs; nothing is ever removed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};
use uuid::Uuid;

use super::budget::{BudgetEnvelope, BudgetMeter};
use super::events::{AuditEvent, AuditKind, GateDecision};
use crate::canonical::POLICY_VERSION;
use crate::config::EngineConfig;

fn short_hex(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

/// Fresh run id, `run_` + 12 hex chars
pub fn new_run_id() -> String {
    format!("run_{}", short_hex(12))
}

/// Identity of the agent driving the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub agent_id: String,
    pub role: String,
}

impl Default for Actor {
    fn default() -> Self {
        Self {
            agent_id: "unknown-agent".to_string(),
            role: "unknown-role".to_string(),
        }
    }
}

/// Cooperative stop flag, shareable across tasks
///
/// Setting the flag never interrupts work; stages poll it between sub-steps.
/// The first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    reason: Arc<Mutex<Option<String>>>,
}

impl StopHandle {
    pub fn request_stop(&self, reason: impl Into<String>) {
        let mut slot = self.reason.lock().unwrap_or_else(|p| p.into_inner());
        if slot.is_none() {
            *slot = Some(reason.into());
        }
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[derive(Serialize, Deserialize)]
struct StopState {
    stop_now: bool,
    #[serde(default)]
    stop_reason: Option<String>,
}

impl Serialize for StopHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StopState {
            stop_now: self.is_stopped(),
            stop_reason: self.reason(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StopHandle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = StopState::deserialize(deserializer)?;
        let handle = StopHandle::default();
        if state.stop_now {
            handle.request_stop(state.stop_reason.unwrap_or_default());
        }
        Ok(handle)
    }
}

/// State of one pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub project_id: String,
    pub user_id: String,
    pub session_id: String,
    pub task_id: String,
    #[serde(default)]
    pub recipe_id: Option<String>,
    pub actor: Actor,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub mode: String,
    pub started_at: DateTime<Utc>,

    /// Canonicalizer version in effect for this run
    canonical_policy_version: String,

    budget: BudgetMeter,

    /// source id → canonical text hash (last write wins)
    #[serde(default)]
    source_hashes: BTreeMap<String, String>,

    #[serde(default)]
    audit_events: Vec<AuditEvent>,

    #[serde(default)]
    gate_decisions: Vec<GateDecision>,

    stop: StopHandle,

    #[serde(default)]
    next_seq: u64,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new("default")
    }
}

impl RunContext {
    /// New context with default identity and budget
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            run_id: new_run_id(),
            project_id: project_id.into(),
            user_id: "researcher".to_string(),
            session_id: short_hex(16),
            task_id: short_hex(12),
            recipe_id: None,
            actor: Actor::default(),
            permissions: Vec::new(),
            mode: "standard".to_string(),
            started_at: Utc::now(),
            canonical_policy_version: POLICY_VERSION.to_string(),
            budget: BudgetMeter::default(),
            source_hashes: BTreeMap::new(),
            audit_events: Vec::new(),
            gate_decisions: Vec::new(),
            stop: StopHandle::default(),
            next_seq: 0,
        }
    }

    /// New context using the identity, budget and policy version of `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        let run = &config.run;
        let mut ctx = Self::new(run.project_id.clone())
            .with_actor(run.agent_id.clone(), run.role.clone())
            .with_budget(BudgetMeter::with_ceilings(config.budget.clone()))
            .with_permissions(run.permissions.clone());
        ctx.user_id = run.user_id.clone();
        ctx.mode = run.mode.clone();
        ctx.canonical_policy_version = config.policy.version().to_string();
        ctx
    }

    pub fn with_actor(mut self, agent_id: impl Into<String>, role: impl Into<String>) -> Self {
        self.actor = Actor {
            agent_id: agent_id.into(),
            role: role.into(),
        };
        self
    }

    /// Use `budget` instead of a private meter (e.g. one shared process-wide)
    pub fn with_budget(mut self, budget: BudgetMeter) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_permissions(mut self, permissions: Vec<String>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_recipe(mut self, recipe_id: impl Into<String>) -> Self {
        self.recipe_id = Some(recipe_id.into());
        self
    }

    pub fn canonical_policy_version(&self) -> &str {
        &self.canonical_policy_version
    }

    /// Set the canonicalizer version in effect, returning the previous one
    pub fn adopt_policy_version(&mut self, version: impl Into<String>) -> String {
        std::mem::replace(&mut self.canonical_policy_version, version.into())
    }

    pub fn budget(&self) -> &BudgetMeter {
        &self.budget
    }

    /// Copy of the budget envelope as it is now
    pub fn budget_snapshot(&self) -> BudgetEnvelope {
        self.budget.snapshot()
    }

    pub fn source_hashes(&self) -> &BTreeMap<String, String> {
        &self.source_hashes
    }

    pub fn audit_events(&self) -> &[AuditEvent] {
        &self.audit_events
    }

    pub fn gate_decisions(&self) -> &[GateDecision] {
        &self.gate_decisions
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Append an audit event, returning its sequence number
    pub fn record_audit(
        &mut self,
        event: AuditKind,
        agent: impl Into<String>,
        summary: serde_json::Value,
    ) -> u64 {
        self.push_audit(|seq| AuditEvent::new(seq, event, agent, summary))
    }

    /// Append an audit event built by `build` from its sequence number
    pub fn push_audit(&mut self, build: impl FnOnce(u64) -> AuditEvent) -> u64 {
        let seq = self.take_seq();
        let event = build(seq);
        debug!(seq, event = ?event.event, stage = ?event.stage, "audit");
        self.audit_events.push(event);
        seq
    }

    /// Append a gate decision, returning its sequence number
    pub fn record_gate(
        &mut self,
        gate_id: impl Into<String>,
        passed: bool,
        details: serde_json::Value,
    ) -> u64 {
        let seq = self.take_seq();
        self.gate_decisions.push(GateDecision {
            seq,
            gate_id: gate_id.into(),
            passed,
            timestamp: Utc::now(),
            details,
        });
        seq
    }

    /// Register a source's canonical hash (overwrites any previous hash)
    pub fn register_source(&mut self, source_id: impl Into<String>, hash: impl Into<String>) {
        let source_id = source_id.into();
        let hash = hash.into();
        if let Some(previous) = self.source_hashes.get(&source_id) {
            if *previous != hash {
                debug!(%source_id, "Source re-registered with new hash");
            }
        }
        self.source_hashes.insert(source_id, hash);
    }

    /// Request a cooperative stop
    pub(crate) fn request_stop(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(run_id = %self.run_id, %reason, "Stop requested");
        self.stop.request_stop(reason);
    }

    /// Handle for requesting a stop from outside the run
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn stop_reason(&self) -> Option<String> {
        self.stop.reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_defaults() {
        let ctx = RunContext::new("iqraa");
        assert!(ctx.run_id.starts_with("run_"));
        assert_eq!(ctx.run_id.len(), 16);
        assert_eq!(ctx.session_id.len(), 16);
        assert_eq!(ctx.user_id, "researcher");
        assert_eq!(ctx.mode, "standard");
        assert_eq!(ctx.canonical_policy_version(), POLICY_VERSION);
        assert!(!ctx.is_stopped());
    }

    #[test]
    fn test_logs_keep_invocation_order() {
        let mut ctx = RunContext::default();
        let a = ctx.record_audit(AuditKind::RunStarted, "test", json!({}));
        let g = ctx.record_gate("quality_gate", true, json!({"score": 1.0}));
        let b = ctx.record_audit(AuditKind::RunStarted, "test", json!({}));

        assert_eq!((a, g, b), (0, 1, 2));
        // identical events are not deduplicated
        assert_eq!(ctx.audit_events().len(), 2);
        assert_eq!(ctx.gate_decisions()[0].seq, 1);
    }

    #[test]
    fn test_register_source_last_write_wins() {
        let mut ctx = RunContext::default();
        ctx.register_source("s1", "sha256:aa");
        ctx.register_source("s1", "sha256:bb");
        assert_eq!(ctx.source_hashes().get("s1").map(String::as_str), Some("sha256:bb"));
        assert_eq!(ctx.source_hashes().len(), 1);
    }

    #[test]
    fn test_stop_handle_shared() {
        let mut ctx = RunContext::default();
        let handle = ctx.stop_handle();
        handle.request_stop("user cancelled");
        assert!(ctx.is_stopped());

        ctx.request_stop("second reason");
        assert_eq!(ctx.stop_reason().as_deref(), Some("user cancelled"));
    }

    #[test]
    fn test_from_config() {
        let mut config = EngineConfig::default();
        config.run.project_id = "ibn-khaldun".to_string();
        config.budget.max_usd = 0.1;

        let ctx = RunContext::from_config(&config);
        assert_eq!(ctx.project_id, "ibn-khaldun");
        assert_eq!(ctx.actor.agent_id, "claimgate");
        assert_eq!(ctx.budget_snapshot().ceilings().max_usd, 0.1);
    }

    #[test]
    fn test_context_serialization() {
        let mut ctx = RunContext::default();
        ctx.register_source("s1", "sha256:aa");
        ctx.budget().record_cost(10, 0.01, 1, 5).unwrap();
        ctx.request_stop("done");

        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["canonical_policy_version"], POLICY_VERSION);
        assert_eq!(json["budget"]["used_tokens"], 10);
        assert_eq!(json["stop"]["stop_now"], true);

        let parsed: RunContext = serde_json::from_value(json).unwrap();
        assert!(parsed.is_stopped());
        assert_eq!(parsed.budget_snapshot().used_tokens(), 10);
        assert_eq!(parsed.source_hashes().len(), 1);
    }
}
