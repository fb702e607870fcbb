//! Phase 8 — response generation (§4.1 detail): template precedence
//! `EXCLUSIVE → SUGGEST → FALLBACK`. EXCLUSIVE bypasses the LLM and
//! interpolates variables directly (unresolved placeholders are left
//! literal, so enforcement can still flag them); otherwise a prompt is
//! assembled from system instructions, glossary, an interlocutor schema
//! mask (names and types only, never values), the scenario/step summary,
//! matched-rule action texts, and any SUGGEST templates as inspiration.

use std::collections::HashMap;

use loom_domain::glossary::GlossaryItem;
use loom_domain::interlocutor::InterlocutorFieldDef;
use loom_domain::message::Message;
use loom_domain::scenario::ScenarioStep;
use loom_domain::template::{select_template, Template, TemplateMode};
use loom_domain::turn::MatchedRule;
use loom_domain::Result;
use loom_providers::traits::{ChatRequest, LlmProvider};

use crate::variables::substitute;

pub struct GenerationInput<'a> {
    pub system_instructions: &'a str,
    pub glossary: &'a [GlossaryItem],
    pub field_schema: &'a [InterlocutorFieldDef],
    pub active_step: Option<&'a ScenarioStep>,
    pub matched_rules: &'a [MatchedRule],
    pub rule_action_texts: &'a HashMap<uuid::Uuid, String>,
    pub user_message: &'a str,
    pub known_vars: &'a HashMap<String, serde_json::Value>,
}

pub enum GenerationOutcome {
    /// Produced directly from an EXCLUSIVE template — no LLM call made.
    Direct(String),
    /// Produced by the LLM, optionally informed by SUGGEST templates.
    Generated(String),
}

impl GenerationOutcome {
    pub fn into_text(self) -> String {
        match self {
            GenerationOutcome::Direct(t) | GenerationOutcome::Generated(t) => t,
        }
    }
}

/// Runs Phase 8 against `candidates` (templates scoped to the active
/// scenario/step, already fetched by the caller via `ConfigRepository`).
pub async fn generate(generator: &dyn LlmProvider, candidates: &[Template], input: &GenerationInput<'_>) -> Result<GenerationOutcome> {
    if let Some(winner) = select_template(candidates) {
        if winner.mode == TemplateMode::Exclusive {
            return Ok(GenerationOutcome::Direct(substitute(&winner.text, input.known_vars)));
        }
    }

    let suggest_texts: Vec<&str> = candidates.iter().filter(|t| t.mode == TemplateMode::Suggest).map(|t| t.text.as_str()).collect();
    let prompt = build_prompt(input, &suggest_texts);

    let response = generator
        .chat(ChatRequest {
            messages: vec![Message::system(input.system_instructions), Message::user(&prompt)],
            tools: vec![],
            temperature: Some(0.3),
            max_tokens: None,
            json_mode: false,
            model: None,
        })
        .await?;

    Ok(GenerationOutcome::Generated(response.content))
}

/// Applies a FALLBACK template directly, bypassing generation entirely —
/// used when enforcement exhausts its regeneration budget (§4.4).
pub fn fallback_text(fallback: &Template, known_vars: &HashMap<String, serde_json::Value>) -> String {
    substitute(&fallback.text, known_vars)
}

fn build_prompt(input: &GenerationInput<'_>, suggest_texts: &[&str]) -> String {
    let mut sections = Vec::new();

    if !input.glossary.is_empty() {
        let terms: Vec<String> = input.glossary.iter().map(|g| format!("- {}: {}", g.term, g.definition)).collect();
        sections.push(format!("Glossary:\n{}", terms.join("\n")));
    }

    if !input.field_schema.is_empty() {
        let fields: Vec<String> = input.field_schema.iter().map(|f| format!("- {} ({})", f.name, f.value_type)).collect();
        sections.push(format!("Known interlocutor fields (names and types only):\n{}", fields.join("\n")));
    }

    if let Some(step) = input.active_step {
        sections.push(format!("Current scenario step: {}", step.prompt_text));
    }

    if !input.matched_rules.is_empty() {
        let actions: Vec<String> = input
            .matched_rules
            .iter()
            .filter_map(|r| input.rule_action_texts.get(&r.rule_id))
            .map(|a| format!("- {a}"))
            .collect();
        if !actions.is_empty() {
            sections.push(format!("Rules in effect for this turn:\n{}", actions.join("\n")));
        }
    }

    if !suggest_texts.is_empty() {
        sections.push(format!("Suggested response templates (adapt, don't copy verbatim):\n{}", suggest_texts.join("\n---\n")));
    }

    sections.push(format!("User message: {}", input.user_message));
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loom_providers::mock::MockProvider;
    use uuid::Uuid;

    fn template(mode: TemplateMode, text: &str) -> Template {
        Template { id: Uuid::new_v4(), tenant_id: Uuid::nil(), agent_id: Uuid::nil(), mode, text: text.into(), scenario_id: None, step_id: None, created_at: Utc::now(), updated_at: Utc::now(), deleted_at: None }
    }

    fn base_input<'a>(user_message: &'a str, known_vars: &'a HashMap<String, serde_json::Value>) -> GenerationInput<'a> {
        GenerationInput {
            system_instructions: "Be concise.",
            glossary: &[],
            field_schema: &[],
            active_step: None,
            matched_rules: &[],
            rule_action_texts: &HashMap::new(),
            user_message,
            known_vars,
        }
    }

    #[tokio::test]
    async fn exclusive_template_bypasses_llm() {
        let mut known = HashMap::new();
        known.insert("name".to_string(), serde_json::json!("Ada"));
        let candidates = vec![template(TemplateMode::Exclusive, "Hello {name}!")];
        let provider = MockProvider::new("gen");
        let input = base_input("hi", &known);
        let outcome = generate(&provider, &candidates, &input).await.unwrap();
        match outcome {
            GenerationOutcome::Direct(text) => assert_eq!(text, "Hello Ada!"),
            GenerationOutcome::Generated(_) => panic!("expected direct interpolation"),
        }
    }

    #[tokio::test]
    async fn no_exclusive_template_falls_through_to_llm() {
        let known = HashMap::new();
        let candidates = vec![template(TemplateMode::Suggest, "We appreciate your patience.")];
        let provider = MockProvider::new("gen");
        provider.set_default_response("Thanks for waiting!");
        let input = base_input("where's my order", &known);
        let outcome = generate(&provider, &candidates, &input).await.unwrap();
        match outcome {
            GenerationOutcome::Generated(text) => assert_eq!(text, "Thanks for waiting!"),
            GenerationOutcome::Direct(_) => panic!("expected an LLM-generated response"),
        }
    }

    #[test]
    fn fallback_text_interpolates_known_vars() {
        let mut known = HashMap::new();
        known.insert("order_id".to_string(), serde_json::json!("A1"));
        let fallback = template(TemplateMode::Fallback, "Sorry, we can't help with order {order_id} right now.");
        let out = fallback_text(&fallback, &known);
        assert_eq!(out, "Sorry, we can't help with order A1 right now.");
    }
}
