use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::glossary::GlossaryItem;
use crate::interlocutor::{InterlocutorFieldDef, VariableEntry};
use crate::migration::ReconciliationResult;
use crate::scenario::ScenarioNavAction;
use crate::session::Session;

/// The caller-facing request to process one turn (§6
/// `ProcessTurn(tenant_id, agent_id, channel, channel_user_id, message,
/// optional session_id, optional metadata, optional idempotency_key)`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnInput {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub channel: String,
    pub channel_user_id: String,
    pub message: String,
    pub session_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: Option<String>,
}

/// Built by Phase 1 (§4.2): an immutable context handed to the rest of
/// the pipeline. The interlocutor loader filters fields not in schema
/// with a warning; it never raises (§4.2) — callers should expect
/// `interlocutor_snapshot` to be a strict subset of `field_schema`.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub turn_id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub channel: String,
    pub channel_user_id: String,
    pub session: Session,
    /// ACTIVE interlocutor fields only, per §4.2.
    pub interlocutor_snapshot: HashMap<String, VariableEntry>,
    pub pipeline_config: PipelineConfig,
    pub field_schema: Vec<InterlocutorFieldDef>,
    pub glossary: Vec<GlossaryItem>,
    pub reconciliation: ReconciliationResult,
    pub deadline: DateTime<Utc>,
}

/// Mutated by each of the twelve pipeline phases in turn (§4.1). Starts
/// as a wrapper around `TurnContext` and accumulates the candidate
/// response, matched rules, tool results, and timings as phases run.
#[derive(Debug, Clone)]
pub struct TurnWorkingSet {
    pub context: TurnContext,
    pub user_message: String,
    pub situational_snapshot: Option<SituationalSnapshot>,
    pub matched_rules: Vec<MatchedRule>,
    pub scenario_nav_action: ScenarioNavAction,
    pub missing_fields: Vec<String>,
    pub tools_called: Vec<String>,
    pub candidate_response: Option<String>,
    pub enforcement: Option<EnforcementOutcome>,
    pub timings: Vec<PhaseTiming>,
    pub tokens_used: Option<u32>,
}

impl TurnWorkingSet {
    pub fn new(context: TurnContext, user_message: String) -> Self {
        Self {
            context,
            user_message,
            situational_snapshot: None,
            matched_rules: Vec::new(),
            scenario_nav_action: ScenarioNavAction::None,
            missing_fields: Vec::new(),
            tools_called: Vec::new(),
            candidate_response: None,
            enforcement: None,
            timings: Vec::new(),
            tokens_used: None,
        }
    }

    pub fn record_timing(&mut self, timing: PhaseTiming) {
        self.timings.push(timing);
    }
}

/// A structured summary of the current turn used by downstream phases
/// (language, intent change, tone, frustration level, candidate
/// variables) — the "situational snapshot" from the Glossary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SituationalSnapshot {
    pub language: Option<String>,
    pub intent_changed: bool,
    pub tone: Option<String>,
    pub frustration_level: Option<f64>,
    pub candidate_variables: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub skipped: bool,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: Uuid,
    pub relevance_score: f64,
    pub rationale: String,
    pub final_score: f64,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioState {
    pub scenario_id: Option<Uuid>,
    pub step_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Hard,
    Soft,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintViolation {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub violation_type: String,
    pub details: String,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementOutcome {
    pub passed: bool,
    pub violations: Vec<ConstraintViolation>,
    pub regeneration_attempted: bool,
    pub regeneration_succeeded: bool,
    pub regeneration_attempts: u32,
    pub fallback_used: bool,
    pub fallback_template_id: Option<Uuid>,
    pub final_response: String,
    pub enforcement_time_ms: u64,
}

/// Normalized inbound message from a channel gateway, before it becomes
/// a `TurnInput` (§7). No channel adapter implements the conversion in
/// this crate — that stays out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub channel: String,
    pub channel_user_id: String,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
}

/// Symmetric outbound counterpart, handed back to a channel gateway
/// after a turn completes (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub channel: String,
    pub channel_user_id: String,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
}

/// `ProcessTurn`'s non-streaming return value (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub turn_id: Uuid,
    pub session_id: Uuid,
    pub response: String,
    pub matched_rules: Vec<MatchedRule>,
    pub scenario_state: ScenarioState,
    pub tools_called: Vec<String>,
    pub tokens_used: Option<u32>,
    pub latency_ms: u64,
    pub phase_timings: Vec<PhaseTiming>,
    pub enforcement_passed: bool,
}
