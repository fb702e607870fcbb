use serde::{Deserialize, Serialize};

/// Capabilities an LLM provider advertises for a given model. The
/// enforcement subjective lane and the generation phase use these to
/// decide whether a provider can be used for judge calls (json mode) or
/// streaming final responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCapabilities {
    pub supports_tools: ToolSupport,
    pub supports_streaming: bool,
    pub supports_json_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl Default for LlmCapabilities {
    fn default() -> Self {
        Self {
            supports_tools: ToolSupport::None,
            supports_streaming: false,
            supports_json_mode: false,
            context_window_tokens: None,
            max_output_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSupport {
    None,
    Basic,
    StrictJson,
}

/// Roles the pipeline requests a provider for — mirrors
/// `PipelineConfig.llm_judge_models` and the generation/extraction/
/// embedding call sites, so `resolve_provider`-style fallback logic can
/// pick a model by role rather than by provider name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Generation phase (§4.1 "Generation").
    Generator,
    /// Enforcement subjective lane judge (§4.4).
    Judge,
    /// Filtering's "does this rule apply" pass and entity extraction (§4.6).
    Extractor,
    /// Hierarchical summarization (§4.6).
    Summarizer,
    /// Episode/rule embeddings (§4.6, §4.1 retrieval).
    Embedder,
}
