use serde::{Deserialize, Serialize};

/// A glossary term surfaced in the generation-phase system prompt (§4.1,
/// §4.2). Recovered from `original_source/ruche/domain/glossary.py`
/// (SPEC_FULL.md §1) — named by `TurnContext`'s `GlossaryItem set` but
/// left structurally undefined in the distillation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryItem {
    pub term: String,
    pub definition: String,
    pub aliases: Vec<String>,
}
