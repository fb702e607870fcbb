use serde::Serialize;

/// Structured trace events emitted across all loom crates. Each call
/// site constructs the variant for what it just did and calls `.emit()`;
/// `tracing` carries the JSON blob so a log pipeline can index on
/// `event` without every crate depending on a metrics backend.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    /// One of the twelve turn-pipeline phases started or finished.
    PhaseCompleted {
        turn_id: String,
        phase: String,
        duration_ms: u64,
        skipped: bool,
        skip_reason: Option<String>,
    },
    /// Rule filtering produced a matched-rule set.
    RulesFiltered {
        turn_id: String,
        candidate_count: usize,
        matched_count: usize,
    },
    /// The deterministic enforcement lane evaluated an expression.
    DeterministicEnforcementEvaluated {
        turn_id: String,
        rule_id: String,
        passed: bool,
    },
    /// The subjective enforcement lane got an unparseable judge answer
    /// and defaulted to PASS (fail-open, §4.4).
    SubjectiveJudgeFailOpen { turn_id: String, rule_id: String },
    /// Enforcement requested a regeneration after a violation.
    RegenerationAttempted {
        turn_id: String,
        attempt: u32,
        violation_count: usize,
    },
    /// A fallback template was used because regeneration was exhausted.
    FallbackTemplateUsed {
        turn_id: String,
        template_id: String,
    },
    /// The migration engine reconciled a session before the pipeline ran.
    MigrationReconciled {
        session_id: String,
        action: String,
        from_version: i64,
        to_version: i64,
    },
    /// Gap-fill auto-filled a field from the interlocutor profile without
    /// prompting the user.
    GapFillAutoFilled {
        session_id: String,
        field_name: String,
        confidence: f64,
    },
    /// Re-route was blocked because it would cross a passed checkpoint.
    CheckpointBlocked {
        session_id: String,
        target_step_id: String,
    },
    /// An extracted entity matched an existing one at a dedup stage.
    EntityDeduped {
        stage: String,
        entity_id: String,
        entity_name: String,
    },
    /// A relationship was bi-temporally superseded.
    RelationshipSuperseded {
        from_entity_id: String,
        relation_type: String,
    },
    /// A window or meta summary was generated.
    SummaryGenerated {
        session_id: String,
        kind: String,
        episode_count: usize,
    },
    /// Idempotency cache state transition.
    IdempotencyStateChanged {
        layer: String,
        key: String,
        from: String,
        to: String,
    },
    /// A provider call completed (success or error).
    ProviderCall {
        role: String,
        provider: String,
        duration_ms: u64,
        ok: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "loom_event");
    }
}
