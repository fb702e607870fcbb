use std::collections::HashMap;
use std::sync::Arc;

use loom_domain::config::EnforcementConfig;
use loom_domain::message::Message;
use loom_domain::rule::Rule;
use loom_domain::template::{select_template, Template, TemplateMode};
use loom_domain::trace::TraceEvent;
use loom_domain::turn::{ConstraintViolation, EnforcementOutcome, ViolationSeverity};
use loom_domain::Result;
use loom_providers::{ChatRequest, LlmProvider};
use loom_repositories::ConfigRepository;
use uuid::Uuid;

use crate::expr::{self, Value};
use crate::extraction;

/// Separates `hard_rules` into the deterministic lane (has an
/// `enforcement_expression`) and the subjective lane (doesn't), per
/// §4.4.
fn partition_lanes(hard_rules: &[Rule]) -> (Vec<&Rule>, Vec<&Rule>) {
    hard_rules.iter().partition(|r| r.enforcement_expression.is_some())
}

/// Converts a loosely-typed variable value (as stored on `VariableEntry`
/// or `Session::variables`) into the evaluator's `Value`, for callers
/// assembling `session_vars`/`profile_vars` ahead of `enforce_turn`.
pub fn to_expr_value(v: &serde_json::Value) -> Option<Value> {
    match v {
        serde_json::Value::Number(n) => n.as_f64().map(Value::Number),
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        _ => None,
    }
}

fn evaluate_deterministic_lane(turn_id: Uuid, rules: &[&Rule], variables: &HashMap<String, Value>) -> Vec<ConstraintViolation> {
    let mut violations = Vec::new();
    for rule in rules {
        let expression = rule.enforcement_expression.as_deref().unwrap_or_default();
        let passed = match expr::evaluate(expression, variables) {
            Ok(true) => true,
            Ok(false) => {
                violations.push(ConstraintViolation {
                    rule_id: rule.id,
                    rule_name: rule.condition_text.clone(),
                    violation_type: "deterministic".to_string(),
                    details: format!("expression `{expression}` evaluated false"),
                    severity: ViolationSeverity::Hard,
                });
                false
            }
            Err(e) => {
                tracing::warn!(rule_id = %rule.id, error = %e, "enforcement_expression failed to evaluate");
                violations.push(ConstraintViolation {
                    rule_id: rule.id,
                    rule_name: rule.condition_text.clone(),
                    violation_type: "deterministic_error".to_string(),
                    details: e.to_string(),
                    severity: ViolationSeverity::Hard,
                });
                false
            }
        };
        TraceEvent::DeterministicEnforcementEvaluated {
            turn_id: turn_id.to_string(),
            rule_id: rule.id.to_string(),
            passed,
        }
        .emit();
    }
    violations
}

enum JudgeVerdict {
    Pass,
    Fail(String),
    /// Neither `PASS` nor `FAIL: <reason>` — defaults to pass (fail-open
    /// for availability, §4.4), but distinct from a legitimate pass so
    /// callers can trace it.
    Unparseable,
}

/// Parses a judge reply of the form `PASS` or `FAIL: <reason>`.
fn parse_judge_reply(reply: &str) -> JudgeVerdict {
    let trimmed = reply.trim();
    if trimmed.eq_ignore_ascii_case("pass") {
        return JudgeVerdict::Pass;
    }
    match trimmed.strip_prefix("FAIL:").or_else(|| trimmed.strip_prefix("fail:")) {
        Some(reason) => JudgeVerdict::Fail(reason.trim().to_string()),
        None => JudgeVerdict::Unparseable,
    }
}

pub struct Enforcer {
    config_repo: Arc<dyn ConfigRepository>,
    judge: Arc<dyn LlmProvider>,
}

impl Enforcer {
    pub fn new(config_repo: Arc<dyn ConfigRepository>, judge: Arc<dyn LlmProvider>) -> Self {
        Self { config_repo, judge }
    }

    /// Fetches GLOBAL hard constraints directly, regardless of what
    /// retrieval surfaced, and merges them with `candidate_hard_rules`
    /// (deduped by id) — the critical invariant of §4.4.
    pub async fn collect_hard_rules(&self, tenant_id: Uuid, agent_id: Uuid, candidate_hard_rules: Vec<Rule>) -> Result<Vec<Rule>> {
        let mut by_id: HashMap<Uuid, Rule> = candidate_hard_rules.into_iter().map(|r| (r.id, r)).collect();
        for rule in self.config_repo.list_global_hard_constraints(tenant_id, agent_id).await? {
            by_id.entry(rule.id).or_insert(rule);
        }
        Ok(by_id.into_values().collect())
    }

    async fn judge_subjective_lane(&self, turn_id: Uuid, rules: &[&Rule], response: &str) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();
        for rule in rules {
            let prompt = format!(
                "Constraint: {}\nResponse to evaluate:\n{}\n\nAnswer with exactly `PASS` or `FAIL: <reason>`.",
                rule.action_text, response
            );
            let request = ChatRequest {
                messages: vec![Message::user(prompt)],
                temperature: Some(0.0),
                ..Default::default()
            };
            let verdict = match self.judge.chat(request).await {
                Ok(resp) => parse_judge_reply(&resp.content),
                Err(e) => {
                    tracing::warn!(rule_id = %rule.id, error = %e, "subjective judge call failed, failing open");
                    JudgeVerdict::Unparseable
                }
            };
            match verdict {
                JudgeVerdict::Pass => {}
                JudgeVerdict::Unparseable => {
                    TraceEvent::SubjectiveJudgeFailOpen { turn_id: turn_id.to_string(), rule_id: rule.id.to_string() }.emit();
                }
                JudgeVerdict::Fail(reason) => violations.push(ConstraintViolation {
                    rule_id: rule.id,
                    rule_name: rule.condition_text.clone(),
                    violation_type: "subjective".to_string(),
                    details: reason,
                    severity: ViolationSeverity::Hard,
                }),
            }
        }
        violations
    }

    fn find_fallback_template(templates: &[Template]) -> Option<&Template> {
        let fallback_only: Vec<Template> = templates.iter().filter(|t| t.mode == TemplateMode::Fallback).cloned().collect();
        let winner_id = select_template(&fallback_only)?.id;
        templates.iter().find(|t| t.id == winner_id)
    }

    /// Runs the full two-lane evaluation plus remediation loop (§4.4):
    /// evaluate, and while violations persist, regenerate via
    /// `regenerate` up to `config.max_retries` times; if violations
    /// still persist, fall back to a `FALLBACK`-mode template, or return
    /// the last candidate with `passed = false`.
    #[allow(clippy::too_many_arguments)]
    pub async fn enforce_turn<F, Fut>(
        &self,
        turn_id: Uuid,
        tenant_id: Uuid,
        agent_id: Uuid,
        config: &EnforcementConfig,
        candidate_hard_rules: Vec<Rule>,
        session_vars: &HashMap<String, Value>,
        profile_vars: &HashMap<String, Value>,
        scenario_id: Option<Uuid>,
        step_id: Option<Uuid>,
        initial_response: String,
        mut regenerate: F,
    ) -> Result<EnforcementOutcome>
    where
        F: FnMut(String) -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        let started = std::time::Instant::now();
        let hard_rules = self.collect_hard_rules(tenant_id, agent_id, candidate_hard_rules).await?;
        let (deterministic, subjective) = partition_lanes(&hard_rules);

        let mut response = initial_response;
        let mut attempts = 0u32;
        let mut violations = Vec::new();
        let mut regeneration_attempted = false;

        loop {
            let response_vars = extraction::extract_variables(&response);
            let merged = extraction::merge_variables(response_vars, session_vars, profile_vars);

            violations = evaluate_deterministic_lane(turn_id, &deterministic, &merged);
            violations.extend(self.judge_subjective_lane(turn_id, &subjective, &response).await);

            if violations.is_empty() || attempts >= config.max_retries {
                break;
            }

            regeneration_attempted = true;
            attempts += 1;
            let summary = violations
                .iter()
                .map(|v| format!("- {}: {}", v.violation_type, v.details))
                .collect::<Vec<_>>()
                .join("\n");
            TraceEvent::RegenerationAttempted { turn_id: turn_id.to_string(), attempt: attempts, violation_count: violations.len() }.emit();
            response = regenerate(summary).await?;
        }

        if !violations.is_empty() {
            let templates = self
                .config_repo
                .list_templates(tenant_id, agent_id, scenario_id, step_id)
                .await?;
            if let Some(template) = Self::find_fallback_template(&templates) {
                TraceEvent::FallbackTemplateUsed { turn_id: turn_id.to_string(), template_id: template.id.to_string() }.emit();
                return Ok(EnforcementOutcome {
                    passed: false,
                    violations,
                    regeneration_attempted,
                    regeneration_succeeded: false,
                    regeneration_attempts: attempts,
                    fallback_used: true,
                    fallback_template_id: Some(template.id),
                    final_response: template.text.clone(),
                    enforcement_time_ms: started.elapsed().as_millis() as u64,
                });
            }
            return Ok(EnforcementOutcome {
                passed: false,
                violations,
                regeneration_attempted,
                regeneration_succeeded: false,
                regeneration_attempts: attempts,
                fallback_used: false,
                fallback_template_id: None,
                final_response: response,
                enforcement_time_ms: started.elapsed().as_millis() as u64,
            });
        }

        Ok(EnforcementOutcome {
            passed: true,
            violations,
            regeneration_attempted,
            regeneration_succeeded: regeneration_attempted,
            regeneration_attempts: attempts,
            fallback_used: false,
            fallback_template_id: None,
            final_response: response,
            enforcement_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}
