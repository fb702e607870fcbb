use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level pipeline configuration (§6)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The core reads exactly this shape. Dynamic/freeform config dicts in
/// the source system map to this explicit, enumerated record — unknown
/// top-level keys are rejected rather than silently ignored (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub phases: PhaseFlags,
    pub retrieval: RetrievalConfig,
    pub enforcement: EnforcementConfig,
    pub entity_extraction: EntityExtractionConfig,
    pub dedup: DedupConfig,
    pub summarization: SummarizationConfig,
    pub channel_policies: std::collections::HashMap<String, ChannelPolicy>,
    pub concurrency: ConcurrencyConfig,
    pub idempotency: IdempotencyConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            phases: PhaseFlags::default(),
            retrieval: RetrievalConfig::default(),
            enforcement: EnforcementConfig::default(),
            entity_extraction: EntityExtractionConfig::default(),
            dedup: DedupConfig::default(),
            summarization: SummarizationConfig::default(),
            channel_policies: std::collections::HashMap::new(),
            concurrency: ConcurrencyConfig::default(),
            idempotency: IdempotencyConfig::default(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase enable flags
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-phase enable flags. Phases 1 (context load), 9 (enforcement) and
/// 11 (persistence) cannot be disabled — they carry fatal fail-modes and
/// disabling them would make the pipeline unable to produce a safe
/// result at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseFlags {
    pub situational_sensor: bool,
    pub interlocutor_update: bool,
    pub retrieval: bool,
    pub filtering: bool,
    pub gap_fill_planning: bool,
    pub tool_execution: bool,
    pub after_tool_bindings: bool,
    pub memory_ingestion: bool,
}

impl Default for PhaseFlags {
    fn default() -> Self {
        Self {
            situational_sensor: true,
            interlocutor_update: true,
            retrieval: true,
            filtering: true,
            gap_fill_planning: true,
            tool_execution: true,
            after_tool_bindings: true,
            memory_ingestion: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retrieval (filtering, §4.1 detail)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Weight for cosine similarity in `final_score`.
    pub w_vec: f64,
    /// Weight for BM25 in `final_score`.
    pub w_bm25: f64,
    /// Maximum candidate rules passed to the LLM relevance judge.
    pub max_candidates: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            w_vec: 0.6,
            w_bm25: 0.4,
            max_candidates: 20,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enforcement (§4.4)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    pub max_retries: u32,
    /// Ordered model ids tried for the subjective judge lane.
    pub llm_judge_models: Vec<String>,
    /// GLOBAL hard constraints bypass retrieval gating entirely — always
    /// fetched directly from the config repository (§4.4 critical invariant).
    pub always_enforce_global: bool,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            llm_judge_models: Vec::new(),
            always_enforce_global: true,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entity extraction & dedup (§4.6)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityExtractionConfig {
    pub min_confidence: f64,
}

impl Default for EntityExtractionConfig {
    fn default() -> Self {
        Self { min_confidence: 0.6 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub fuzzy_threshold: f64,
    pub embedding_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.90,
            embedding_threshold: 0.88,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarization (§4.6)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationConfig {
    pub turns_per_summary: u32,
    pub summaries_per_meta: u32,
    pub enabled_at_turn_count: u32,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            turns_per_summary: 10,
            summaries_per_meta: 5,
            enabled_at_turn_count: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel policy (named in §6, recovered from original_source — see
// SPEC_FULL.md §1)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelPolicy {
    pub aggregation_window_ms: u64,
    pub supersede_mode: SupersedeMode,
    pub max_message_len: usize,
    pub typing_supported: bool,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        Self {
            aggregation_window_ms: 0,
            supersede_mode: SupersedeMode::Append,
            max_message_len: 4096,
            typing_supported: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersedeMode {
    /// Inbound messages within the aggregation window are appended.
    Append,
    /// A newer message within the window replaces the pending one.
    Replace,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Concurrency & idempotency (§5, §4.7)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub turn_deadline_ms: u64,
    pub embedding_soft_budget_ms: u64,
    pub llm_judge_soft_budget_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            turn_deadline_ms: 20_000,
            embedding_soft_budget_ms: 500,
            llm_judge_soft_budget_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencyConfig {
    pub api_layer_ttl_secs: u64,
    pub turn_layer_ttl_secs: u64,
    pub tool_layer_ttl_secs: u64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            api_layer_ttl_secs: 300,
            turn_layer_ttl_secs: 60,
            tool_layer_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.dedup.fuzzy_threshold, 0.90);
        assert_eq!(cfg.summarization.turns_per_summary, 10);
        assert!(cfg.enforcement.always_enforce_global);
        assert_eq!(cfg.idempotency.api_layer_ttl_secs, 300);
        assert_eq!(cfg.idempotency.turn_layer_ttl_secs, 60);
        assert_eq!(cfg.idempotency.tool_layer_ttl_secs, 86_400);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let toml_src = r#"
            not_a_real_section = true
        "#;
        let parsed: Result<PipelineConfig, _> = toml::from_str(toml_src);
        assert!(parsed.is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_src = r#"
            [enforcement]
            max_retries = 5
        "#;
        let cfg: PipelineConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.enforcement.max_retries, 5);
        assert_eq!(cfg.dedup.fuzzy_threshold, 0.90);
    }
}
