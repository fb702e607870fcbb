//! Phase 5 — filtering (§4.1 detail): a second-pass LLM judge turns
//! retrieval candidates into `MatchedRule`s, plus scenario-navigation
//! action selection (including RELOCALIZE when the session's
//! `active_step_id` is invalid in the scenario's current version).

use std::sync::Arc;

use loom_domain::rule::Rule;
use loom_domain::scenario::{Scenario, ScenarioNavAction};
use loom_domain::turn::MatchedRule;
use loom_domain::{trace::TraceEvent, Error, Result};
use loom_providers::traits::{ChatRequest, LlmProvider};
use serde::Deserialize;
use uuid::Uuid;

use crate::retrieval::ScoredRule;

#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    rule_id: Uuid,
    relevant: bool,
    relevance_score: f64,
    rationale: String,
}

/// Runs the LLM judge over `scored` candidates and returns `MatchedRule`s
/// for those it marks relevant, tie-broken deterministically by (higher
/// priority → higher final_score → lower rule id).
pub async fn judge_candidates(judge: &Arc<dyn LlmProvider>, turn_id: Uuid, user_message: &str, scored: &[ScoredRule]) -> Result<Vec<MatchedRule>> {
    if scored.is_empty() {
        return Ok(vec![]);
    }

    let catalog: Vec<serde_json::Value> = scored
        .iter()
        .map(|s| {
            serde_json::json!({
                "rule_id": s.rule.id,
                "condition": s.rule.condition_text,
                "action": s.rule.action_text,
            })
        })
        .collect();

    let prompt = format!(
        "Given the user message and a list of candidate rules, decide which rules are \
         relevant to this turn. Respond with a JSON array of objects \
         {{rule_id, relevant, relevance_score (0.0-1.0), rationale}}, one per candidate.\n\n\
         User message: {user_message}\n\nCandidates: {}",
        serde_json::to_string(&catalog).unwrap_or_default()
    );

    let response = judge
        .chat(ChatRequest {
            messages: vec![loom_domain::message::Message::user(&prompt)],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: None,
            json_mode: true,
            model: None,
        })
        .await?;

    let verdicts: Vec<JudgeVerdict> = serde_json::from_str(&response.content).unwrap_or_default();
    let by_id: std::collections::HashMap<Uuid, &ScoredRule> = scored.iter().map(|s| (s.rule.id, s)).collect();

    let mut matched: Vec<MatchedRule> = verdicts
        .into_iter()
        .filter(|v| v.relevant)
        .filter_map(|v| {
            by_id.get(&v.rule_id).map(|s| MatchedRule {
                rule_id: v.rule_id,
                relevance_score: v.relevance_score,
                rationale: v.rationale,
                final_score: s.final_score,
                priority: s.rule.priority,
            })
        })
        .collect();

    matched.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.rule_id.cmp(&b.rule_id))
    });

    TraceEvent::RulesFiltered { turn_id: turn_id.to_string(), candidate_count: scored.len(), matched_count: matched.len() }.emit();

    Ok(matched)
}

/// Global hard constraints are not subject to the relevance judge — they
/// apply to every turn regardless of retrieval (§4.4).
pub fn always_include_global(global_rules: &[Rule], turn_id: Uuid) -> Vec<MatchedRule> {
    let matched: Vec<MatchedRule> = global_rules
        .iter()
        .map(|r| MatchedRule { rule_id: r.id, relevance_score: 1.0, rationale: "global hard constraint".into(), final_score: f64::MAX, priority: r.priority })
        .collect();
    if !matched.is_empty() {
        TraceEvent::RulesFiltered { turn_id: turn_id.to_string(), candidate_count: matched.len(), matched_count: matched.len() }.emit();
    }
    matched
}

/// Determines the scenario navigation action for this turn.
///
/// - No active scenario and no triggering rule → `None`.
/// - No active scenario, a rule starts one → `Start`.
/// - Active scenario, `active_step_id` absent from the *current* scenario
///   version → `Relocalize` to `entry_step_id` (the scenario was edited
///   out from under a mid-flight session).
/// - Active scenario, step present, a transition's `condition_fields` are
///   all satisfied → `Transition`.
/// - Active scenario, nothing changed → `Continue`.
/// - A rule explicitly exits the scenario → `Exit`.
pub fn navigate(scenario: Option<&Scenario>, active_step_id: Option<Uuid>, satisfied_fields: &std::collections::HashSet<String>, exit_requested: bool) -> (ScenarioNavAction, Option<Uuid>) {
    let Some(scenario) = scenario else {
        return (ScenarioNavAction::None, None);
    };

    if exit_requested {
        return (ScenarioNavAction::Exit, None);
    }

    let Some(step_id) = active_step_id else {
        return (ScenarioNavAction::Start, Some(scenario.entry_step_id));
    };

    if scenario.step(step_id).is_none() {
        return (ScenarioNavAction::Relocalize, Some(scenario.entry_step_id));
    }

    let step = scenario.step(step_id).expect("checked above");
    for transition in &step.transitions {
        if transition.condition_fields.iter().all(|f| satisfied_fields.contains(f)) {
            return (ScenarioNavAction::Transition, Some(transition.to_step_id));
        }
    }

    (ScenarioNavAction::Continue, Some(step_id))
}

pub fn require_scenario_or_err(scenario: Option<&Scenario>) -> Result<&Scenario> {
    scenario.ok_or_else(|| Error::NotFound("scenario not found for navigation".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loom_domain::scenario::{ScenarioStep, Transition};

    fn step(id: Uuid, transitions: Vec<Transition>) -> ScenarioStep {
        ScenarioStep { id, prompt_text: "hi".into(), is_checkpoint: false, tool_bindings: vec![], transitions, collects_fields: vec![] }
    }

    fn scenario(entry: Uuid, steps: Vec<ScenarioStep>) -> Scenario {
        Scenario { id: Uuid::new_v4(), tenant_id: Uuid::new_v4(), agent_id: Uuid::new_v4(), version: 1, entry_step_id: entry, steps, created_at: Utc::now(), updated_at: Utc::now(), deleted_at: None }
    }

    #[test]
    fn no_scenario_yields_none_action() {
        let (action, target) = navigate(None, None, &Default::default(), false);
        assert_eq!(action, ScenarioNavAction::None);
        assert_eq!(target, None);
    }

    #[test]
    fn no_active_step_starts_at_entry() {
        let entry = Uuid::new_v4();
        let scen = scenario(entry, vec![step(entry, vec![])]);
        let (action, target) = navigate(Some(&scen), None, &Default::default(), false);
        assert_eq!(action, ScenarioNavAction::Start);
        assert_eq!(target, Some(entry));
    }

    #[test]
    fn invalid_active_step_relocalizes_to_entry() {
        let entry = Uuid::new_v4();
        let scen = scenario(entry, vec![step(entry, vec![])]);
        let stale_step = Uuid::new_v4();
        let (action, target) = navigate(Some(&scen), Some(stale_step), &Default::default(), false);
        assert_eq!(action, ScenarioNavAction::Relocalize);
        assert_eq!(target, Some(entry));
    }

    #[test]
    fn satisfied_transition_moves_to_next_step() {
        let entry = Uuid::new_v4();
        let next = Uuid::new_v4();
        let scen = scenario(entry, vec![step(entry, vec![Transition { to_step_id: next, condition_fields: vec!["email".into()] }]), step(next, vec![])]);
        let satisfied: std::collections::HashSet<String> = ["email".to_string()].into_iter().collect();
        let (action, target) = navigate(Some(&scen), Some(entry), &satisfied, false);
        assert_eq!(action, ScenarioNavAction::Transition);
        assert_eq!(target, Some(next));
    }

    #[test]
    fn unsatisfied_transition_continues_at_same_step() {
        let entry = Uuid::new_v4();
        let next = Uuid::new_v4();
        let scen = scenario(entry, vec![step(entry, vec![Transition { to_step_id: next, condition_fields: vec!["email".into()] }])]);
        let (action, target) = navigate(Some(&scen), Some(entry), &Default::default(), false);
        assert_eq!(action, ScenarioNavAction::Continue);
        assert_eq!(target, Some(entry));
    }

    #[test]
    fn exit_requested_overrides_everything() {
        let entry = Uuid::new_v4();
        let scen = scenario(entry, vec![step(entry, vec![])]);
        let (action, target) = navigate(Some(&scen), Some(entry), &Default::default(), true);
        assert_eq!(action, ScenarioNavAction::Exit);
        assert_eq!(target, None);
    }
}
