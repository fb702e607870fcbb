//! The twelve-phase turn pipeline (§4.1): ties together every phase
//! module in this crate plus `loom-repositories`, `loom-providers`,
//! `loom-enforcement`, `loom-migration`, `loom-memory`, and
//! `loom-concurrency` into the `ProcessTurn` operation named in §6.
//! There is no single orchestrator file in the original system to port
//! — this sequencing follows §4.1's phase table directly, one method
//! per phase, each wrapped the way the teacher wraps gateway turn steps
//! with timing and trace emission.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use loom_domain::config::PipelineConfig;
use loom_domain::interlocutor::{VariableSource, VariableStatus};
use loom_domain::rule::BindingTiming;
use loom_domain::scenario::ScenarioNavAction;
use loom_domain::session::{MigrationState, Session};
use loom_domain::template::TemplateMode;
use loom_domain::trace::TraceEvent;
use loom_domain::turn::{AlignmentResult, PhaseTiming, ScenarioState, SituationalSnapshot, TurnContext, TurnInput, TurnWorkingSet};
use loom_domain::Result;
use loom_domain::scenario::ScenarioStep;
use loom_enforcement::Enforcer;
use loom_memory::MemoryIngestor;
use loom_migration::field_resolver::MissingFieldResolver;
use loom_migration::MigrationExecutor;
use loom_providers::traits::{ChatRequest, EmbeddingsRequest, LlmProvider};
use loom_repositories::{AuditRepository, ConfigRepository, IdempotencyCache, IdempotencyLayer, InterlocutorRepository, SessionRepository, VectorRepository};
use uuid::Uuid;

use crate::filtering;
use crate::generation::{self, GenerationInput};
use crate::retrieval;
use crate::tool::{ToolExecutor, ToolOutcome};
use crate::variables;
use loom_concurrency::{run_idempotent, run_with_soft_budget, BackoffPolicy, SessionLockManager, TurnDeadline};

pub struct Pipeline {
    pub session_repo: Arc<dyn SessionRepository>,
    pub interlocutor_repo: Arc<dyn InterlocutorRepository>,
    pub config_repo: Arc<dyn ConfigRepository>,
    pub vector_repo: Arc<dyn VectorRepository>,
    pub audit_repo: Arc<dyn AuditRepository>,
    pub idempotency_cache: Arc<dyn IdempotencyCache>,
    pub generator: Arc<dyn LlmProvider>,
    pub judge: Arc<dyn LlmProvider>,
    pub embedder: Arc<dyn LlmProvider>,
    pub enforcer: Arc<Enforcer>,
    pub migration_executor: Arc<MigrationExecutor>,
    pub field_resolver: Arc<MissingFieldResolver>,
    pub memory_ingestor: Option<Arc<MemoryIngestor>>,
    pub tool_executor: Option<Arc<ToolExecutor>>,
    pub session_locks: Arc<SessionLockManager>,
    pub config: PipelineConfig,
}

struct PhaseClock {
    turn_id: Uuid,
    start: chrono::DateTime<Utc>,
}

impl PhaseClock {
    fn start(turn_id: Uuid) -> Self {
        Self { turn_id, start: Utc::now() }
    }

    fn finish(self, phase: &str, skipped: bool, skip_reason: Option<String>) -> PhaseTiming {
        let ended_at = Utc::now();
        let duration_ms = (ended_at - self.start).num_milliseconds().max(0) as u64;
        TraceEvent::PhaseCompleted { turn_id: self.turn_id.to_string(), phase: phase.to_string(), duration_ms, skipped, skip_reason: skip_reason.clone() }.emit();
        PhaseTiming { phase: phase.to_string(), started_at: self.start, ended_at, duration_ms, skipped, skip_reason }
    }
}

impl Pipeline {
    /// Runs one turn end to end, serialized per `session_id` and bounded
    /// by `config.concurrency.turn_deadline_ms`. If `input.idempotency_key`
    /// is set, wraps the whole turn in the API-layer idempotency cache.
    pub async fn process_turn(&self, input: TurnInput) -> Result<AlignmentResult> {
        if let Some(key) = input.idempotency_key.clone() {
            let ttl = Duration::from_secs(self.config.idempotency.api_layer_ttl_secs);
            return run_idempotent(self.idempotency_cache.as_ref(), IdempotencyLayer::Api, &key, ttl, BackoffPolicy::default(), || self.process_turn_locked(input.clone())).await;
        }
        self.process_turn_locked(input).await
    }

    async fn process_turn_locked(&self, input: TurnInput) -> Result<AlignmentResult> {
        let session_id = input.session_id.unwrap_or_else(Uuid::new_v4);
        let _permit = self.session_locks.acquire(session_id).await;
        let deadline = TurnDeadline::start(Utc::now() + chrono::Duration::milliseconds(self.config.concurrency.turn_deadline_ms as i64));

        let mut ws = self.phase_1_context_load(&input, session_id, deadline.deadline()).await?;
        let turn_id = ws.context.turn_id;

        self.phase_2_situational_sensor(&mut ws).await;
        self.phase_3_interlocutor_update(&mut ws).await;
        let scored_rules = self.phase_4_retrieval(&mut ws).await;
        self.phase_5_filtering(&mut ws, scored_rules).await;
        self.phase_6_gap_fill(&mut ws).await;
        let before_tools = self.phase_7_tool_execution(&mut ws, BindingTiming::BeforeStep).await;
        let during_tools = self.phase_7_tool_execution(&mut ws, BindingTiming::DuringStep).await;
        ws.tools_called.extend(before_tools.iter().chain(during_tools.iter()).filter(|o| o.succeeded).map(|o| o.tool_id.to_string()));

        self.phase_8_generation(&mut ws).await?;
        self.phase_9_enforcement(&mut ws, turn_id).await?;
        let after_tools = self.phase_10_after_tool_bindings(&mut ws).await;
        ws.tools_called.extend(after_tools.iter().filter(|o| o.succeeded).map(|o| o.tool_id.to_string()));

        self.phase_11_persistence(&mut ws).await?;
        self.phase_12_audit_and_memory(&mut ws).await;

        Ok(Self::build_result(ws))
    }

    async fn phase_1_context_load(&self, input: &TurnInput, session_id: Uuid, deadline: chrono::DateTime<Utc>) -> Result<TurnWorkingSet> {
        let turn_id = Uuid::new_v4();
        let clock = PhaseClock::start(turn_id);

        let mut session = match self.session_repo.get(input.tenant_id, session_id).await? {
            Some(s) => s,
            None => {
                self.session_repo
                    .get_by_channel_identity(input.tenant_id, input.agent_id, &input.channel, &input.channel_user_id)
                    .await?
                    .unwrap_or_else(|| Self::new_session(input.tenant_id, input.agent_id, &input.channel, &input.channel_user_id, session_id))
            }
        };

        let field_schema = self.config_repo.list_field_schema(input.tenant_id, input.agent_id).await?;
        let glossary = self.config_repo.list_glossary(input.tenant_id, input.agent_id).await?;

        let reconciliation = if let Some(scenario_id) = session.active_scenario_id {
            if let Some(current) = self.config_repo.get_latest_scenario(input.tenant_id, scenario_id).await? {
                let (reconciled_session, result) = self.migration_executor.reconcile(session, &current, Some(session_id), Some(&input.message)).await?;
                session = reconciled_session;
                result
            } else {
                loom_domain::migration::ReconciliationResult::continue_unchanged()
            }
        } else {
            loom_domain::migration::ReconciliationResult::continue_unchanged()
        };

        let profile = self.interlocutor_repo.get_profile(input.tenant_id, session_id).await?;
        let interlocutor_snapshot = profile
            .map(|p| {
                p.fields
                    .into_iter()
                    .filter(|(name, entry)| entry.status == VariableStatus::Active && field_schema.iter().any(|f| &f.name == name))
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default();

        let context = TurnContext {
            turn_id,
            tenant_id: input.tenant_id,
            agent_id: input.agent_id,
            channel: input.channel.clone(),
            channel_user_id: input.channel_user_id.clone(),
            session,
            interlocutor_snapshot,
            pipeline_config: self.config.clone(),
            field_schema,
            glossary,
            reconciliation,
            deadline,
        };

        let mut ws = TurnWorkingSet::new(context, input.message.clone());
        ws.record_timing(clock.finish("context_load", false, None));
        Ok(ws)
    }

    fn new_session(tenant_id: Uuid, agent_id: Uuid, channel: &str, channel_user_id: &str, id: Uuid) -> Session {
        let now = Utc::now();
        Session {
            id,
            tenant_id,
            agent_id,
            channel: channel.to_string(),
            channel_user_id: channel_user_id.to_string(),
            active_scenario_id: None,
            active_step_id: None,
            active_scenario_version: None,
            variables: HashMap::new(),
            turn_count: 0,
            step_history: vec![],
            scenario_checksum: None,
            pending_migration: None,
            migration_state: MigrationState::Synced,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    async fn phase_2_situational_sensor(&self, ws: &mut TurnWorkingSet) {
        let clock = PhaseClock::start(ws.context.turn_id);
        if !ws.context.pipeline_config.phases.situational_sensor {
            ws.record_timing(clock.finish("situational_sensor", true, Some("disabled".into())));
            return;
        }

        let budget = Duration::from_millis(ws.context.pipeline_config.concurrency.llm_judge_soft_budget_ms);
        let prompt = format!(
            "Analyze this user message and respond as JSON: \
             {{\"language\": str|null, \"intent_changed\": bool, \"tone\": str|null, \
             \"frustration_level\": number|null, \"candidate_variables\": object}}.\n\nMessage: {}",
            ws.user_message
        );
        let snapshot = run_with_soft_budget(budget, self.judge.chat(ChatRequest { messages: vec![loom_domain::message::Message::user(&prompt)], tools: vec![], temperature: Some(0.0), max_tokens: None, json_mode: true, model: None })).await;

        match snapshot {
            Some(Ok(response)) => match serde_json::from_str::<SituationalSnapshot>(&response.content) {
                Ok(parsed) => {
                    ws.situational_snapshot = Some(parsed);
                    ws.record_timing(clock.finish("situational_sensor", false, None));
                }
                Err(_) => ws.record_timing(clock.finish("situational_sensor", true, Some("unparseable judge response".into()))),
            },
            Some(Err(e)) => ws.record_timing(clock.finish("situational_sensor", true, Some(e.to_string()))),
            None => ws.record_timing(clock.finish("situational_sensor", true, Some("soft budget exceeded".into()))),
        }
    }

    async fn phase_3_interlocutor_update(&self, ws: &mut TurnWorkingSet) {
        let clock = PhaseClock::start(ws.context.turn_id);
        if !ws.context.pipeline_config.phases.interlocutor_update {
            ws.record_timing(clock.finish("interlocutor_update", true, Some("disabled".into())));
            return;
        }

        let Some(snapshot) = ws.situational_snapshot.clone() else {
            ws.record_timing(clock.finish("interlocutor_update", true, Some("no situational snapshot".into())));
            return;
        };

        let mut failed = false;
        for (name, value) in snapshot.candidate_variables {
            if !ws.context.field_schema.iter().any(|f| f.name == name) {
                continue;
            }
            if let Err(e) = self.interlocutor_repo.update_field(ws.context.tenant_id, ws.context.session.id, &name, value, "string", VariableSource::Inferred, 0.7).await {
                tracing::warn!(error = %e, field = %name, "interlocutor field update failed");
                failed = true;
            }
        }
        ws.record_timing(clock.finish("interlocutor_update", false, if failed { Some("one or more field updates failed".into()) } else { None }));
    }

    async fn phase_4_retrieval(&self, ws: &mut TurnWorkingSet) -> Vec<retrieval::ScoredRule> {
        let clock = PhaseClock::start(ws.context.turn_id);
        if !ws.context.pipeline_config.phases.retrieval {
            ws.record_timing(clock.finish("retrieval", true, Some("disabled".into())));
            return vec![];
        }

        let budget = Duration::from_millis(ws.context.pipeline_config.concurrency.embedding_soft_budget_ms);
        let embedding = run_with_soft_budget(budget, self.embedder.embeddings(EmbeddingsRequest { input: vec![ws.user_message.clone()], model: None })).await;
        let query_embedding: Option<Vec<f32>> = match embedding {
            Some(Ok(resp)) => resp.embeddings.into_iter().next(),
            _ => None,
        };

        let scope_id = ws.context.session.active_scenario_id;
        match self.config_repo.search_rules(ws.context.tenant_id, ws.context.agent_id, None, scope_id).await {
            Ok(candidates) => {
                let candidates: Vec<_> = candidates.into_iter().filter(|r| r.enabled && !r.is_global()).collect();
                let scored = retrieval::retrieve_candidates(candidates, query_embedding.as_deref(), &ws.user_message, &ws.context.pipeline_config.retrieval);
                ws.record_timing(clock.finish("retrieval", false, None));
                scored
            }
            Err(e) => {
                tracing::warn!(error = %e, "retrieval degraded");
                ws.record_timing(clock.finish("retrieval", true, Some(e.to_string())));
                vec![]
            }
        }
    }

    async fn phase_5_filtering(&self, ws: &mut TurnWorkingSet, scored: Vec<retrieval::ScoredRule>) {
        let clock = PhaseClock::start(ws.context.turn_id);
        if !ws.context.pipeline_config.phases.filtering {
            ws.record_timing(clock.finish("filtering", true, Some("disabled".into())));
            return;
        }

        let mut matched = match filtering::judge_candidates(&self.judge, ws.context.turn_id, &ws.user_message, &scored).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "filtering degraded to empty matched-rule set");
                ws.record_timing(clock.finish("filtering", true, Some(e.to_string())));
                vec![]
            }
        };

        if let Ok(globals) = self.config_repo.list_global_hard_constraints(ws.context.tenant_id, ws.context.agent_id).await {
            matched.extend(filtering::always_include_global(&globals, ws.context.turn_id));
        }
        ws.matched_rules = matched;

        let scenario = if let Some(scenario_id) = ws.context.session.active_scenario_id {
            self.config_repo.get_latest_scenario(ws.context.tenant_id, scenario_id).await.ok().flatten()
        } else {
            None
        };
        let satisfied: HashSet<String> = ws.context.session.variables.keys().cloned().collect();
        let (action, target) = filtering::navigate(scenario.as_ref(), ws.context.session.active_step_id, &satisfied, false);
        ws.scenario_nav_action = action;
        if action != ScenarioNavAction::None {
            ws.context.session.active_step_id = target;
        }

        ws.record_timing(clock.finish("filtering", false, None));
    }

    async fn phase_6_gap_fill(&self, ws: &mut TurnWorkingSet) {
        let clock = PhaseClock::start(ws.context.turn_id);
        if !ws.context.pipeline_config.phases.gap_fill_planning {
            ws.record_timing(clock.finish("gap_fill_planning", true, Some("disabled".into())));
            return;
        }

        let step = self.active_step(ws).await;
        let required: Vec<String> = step.as_ref().map(|s| s.collects_fields.clone()).unwrap_or_default();
        if required.is_empty() {
            ws.record_timing(clock.finish("gap_fill_planning", true, Some("no required fields".into())));
            return;
        }

        match self.field_resolver.resolve_missing(ws.context.tenant_id, Some(ws.context.session.id), &ws.context.session, &required, Some(&ws.user_message)).await {
            Ok(results) => {
                ws.missing_fields = results.iter().filter(|r| !r.filled).map(|r| r.field_name.clone()).collect();
                for r in results.iter().filter(|r| r.filled) {
                    if let Some(value) = &r.value {
                        ws.context.session.variables.insert(r.field_name.clone(), value.clone());
                    }
                }
                ws.record_timing(clock.finish("gap_fill_planning", false, None));
            }
            Err(e) => {
                ws.missing_fields = required;
                ws.record_timing(clock.finish("gap_fill_planning", true, Some(e.to_string())));
            }
        }
    }

    /// Fetches the session's currently active scenario step, if any.
    async fn active_step(&self, ws: &TurnWorkingSet) -> Option<ScenarioStep> {
        let scenario_id = ws.context.session.active_scenario_id?;
        let step_id = ws.context.session.active_step_id?;
        let scenario = self.config_repo.get_latest_scenario(ws.context.tenant_id, scenario_id).await.ok().flatten()?;
        scenario.step(step_id).cloned()
    }

    async fn phase_7_tool_execution(&self, ws: &mut TurnWorkingSet, timing: BindingTiming) -> Vec<ToolOutcome> {
        let clock = PhaseClock::start(ws.context.turn_id);
        if !ws.context.pipeline_config.phases.tool_execution {
            ws.record_timing(clock.finish(phase_name(timing), true, Some("disabled".into())));
            return vec![];
        }
        let Some(executor) = &self.tool_executor else {
            ws.record_timing(clock.finish(phase_name(timing), true, Some("no tool executor configured".into())));
            return vec![];
        };

        let bindings = self.active_step(ws).await.map(|s| s.tool_bindings).unwrap_or_default();
        let known_vars = ws.context.session.variables.clone();
        let outcomes = executor.run_bindings(ws.context.turn_id, &bindings, timing, &known_vars).await;
        crate::tool::emit_idempotency_trace_if_tool_failed(ws.context.turn_id, &outcomes);
        ws.record_timing(clock.finish(phase_name(timing), false, None));
        outcomes
    }

    async fn phase_8_generation(&self, ws: &mut TurnWorkingSet) -> Result<()> {
        let clock = PhaseClock::start(ws.context.turn_id);
        let candidates = self.config_repo.list_templates(ws.context.tenant_id, ws.context.agent_id, ws.context.session.active_scenario_id, ws.context.session.active_step_id).await?;

        let required: HashSet<String> = candidates.iter().flat_map(|t| variables::placeholder_names(&t.text)).collect();
        let (known_vars, _missing) = variables::resolve_variables(&required, &ws.context.interlocutor_snapshot, &ws.context.session);

        let active_step = self.active_step(ws).await;
        let rule_action_texts: HashMap<Uuid, String> = HashMap::new();
        let input = GenerationInput {
            system_instructions: "You are a helpful assistant bound by the rules and scenario context provided.",
            glossary: &ws.context.glossary,
            field_schema: &ws.context.field_schema,
            active_step: active_step.as_ref(),
            matched_rules: &ws.matched_rules,
            rule_action_texts: &rule_action_texts,
            user_message: &ws.user_message,
            known_vars: &known_vars,
        };

        match generation::generate(self.generator.as_ref(), &candidates, &input).await {
            Ok(outcome) => {
                ws.candidate_response = Some(outcome.into_text());
                ws.record_timing(clock.finish("response_generation", false, None));
                Ok(())
            }
            Err(e) => {
                if let Some(fallback) = candidates.iter().find(|t| t.mode == TemplateMode::Fallback) {
                    ws.candidate_response = Some(generation::fallback_text(fallback, &known_vars));
                    ws.record_timing(clock.finish("response_generation", true, Some(format!("generation failed, used fallback: {e}"))));
                    Ok(())
                } else {
                    ws.record_timing(clock.finish("response_generation", true, Some(e.to_string())));
                    Err(e)
                }
            }
        }
    }

    async fn phase_9_enforcement(&self, ws: &mut TurnWorkingSet, turn_id: Uuid) -> Result<()> {
        let clock = PhaseClock::start(turn_id);
        let candidate_response = ws.candidate_response.clone().unwrap_or_default();
        let candidate_hard_rules = vec![];

        let session_vars: HashMap<String, loom_enforcement::Value> = ws.context.session.variables.iter().filter_map(|(k, v)| loom_enforcement::to_expr_value(v).map(|ev| (k.clone(), ev))).collect();
        let profile_vars: HashMap<String, loom_enforcement::Value> =
            ws.context.interlocutor_snapshot.iter().filter_map(|(k, entry)| loom_enforcement::to_expr_value(&entry.value).map(|ev| (k.clone(), ev))).collect();

        let generator = self.generator.clone();
        let outcome = self
            .enforcer
            .enforce_turn(
                turn_id,
                ws.context.tenant_id,
                ws.context.agent_id,
                &ws.context.pipeline_config.enforcement,
                candidate_hard_rules,
                &session_vars,
                &profile_vars,
                ws.context.session.active_scenario_id,
                ws.context.session.active_step_id,
                candidate_response,
                move |text: String| {
                    let generator = generator.clone();
                    async move {
                        generator
                            .chat(ChatRequest { messages: vec![loom_domain::message::Message::user(&format!("Revise this response to satisfy the constraint: {text}"))], tools: vec![], temperature: Some(0.3), max_tokens: None, json_mode: false, model: None })
                            .await
                            .map(|r| r.content)
                    }
                },
            )
            .await?;

        ws.candidate_response = Some(outcome.final_response.clone());
        ws.enforcement = Some(outcome);
        ws.record_timing(clock.finish("enforcement", false, None));
        Ok(())
    }

    async fn phase_10_after_tool_bindings(&self, ws: &mut TurnWorkingSet) -> Vec<ToolOutcome> {
        let clock = PhaseClock::start(ws.context.turn_id);
        if !ws.context.pipeline_config.phases.after_tool_bindings {
            ws.record_timing(clock.finish("after_tool_bindings", true, Some("disabled".into())));
            return vec![];
        }
        let outcomes = self.phase_7_tool_execution(ws, BindingTiming::AfterStep).await;
        ws.record_timing(clock.finish("after_tool_bindings", false, None));
        outcomes
    }

    async fn phase_11_persistence(&self, ws: &mut TurnWorkingSet) -> Result<()> {
        let clock = PhaseClock::start(ws.context.turn_id);
        let mut session = ws.context.session.clone();
        session.turn_count += 1;
        session.updated_at = Utc::now();
        self.session_repo.save(session.clone()).await?;
        ws.context.session = session;

        self.audit_repo
            .append_turn_record(loom_domain::audit::TurnRecord {
                id: Uuid::new_v4(),
                tenant_id: ws.context.tenant_id,
                session_id: ws.context.session.id,
                turn_number: ws.context.session.turn_count,
                user_message: ws.user_message.clone(),
                response: ws.candidate_response.clone().unwrap_or_default(),
                matched_rule_ids: ws.matched_rules.iter().map(|r| r.rule_id).collect(),
                tools_called: ws.tools_called.clone(),
                tokens_used: ws.tokens_used,
                latency_ms: ws.timings.iter().map(|t| t.duration_ms).sum(),
                created_at: Utc::now(),
            })
            .await?;

        ws.record_timing(clock.finish("persistence", false, None));
        Ok(())
    }

    async fn phase_12_audit_and_memory(&self, ws: &mut TurnWorkingSet) {
        let clock = PhaseClock::start(ws.context.turn_id);
        let event = self
            .audit_repo
            .append_audit_event(loom_domain::audit::AuditEvent {
                id: Uuid::new_v4(),
                tenant_id: ws.context.tenant_id,
                event_type: "turn_completed".into(),
                payload: serde_json::json!({"turn_id": ws.context.turn_id, "session_id": ws.context.session.id}),
                created_at: Utc::now(),
            })
            .await;
        if let Err(e) = event {
            tracing::warn!(error = %e, "best-effort audit event append failed");
        }

        if ws.context.pipeline_config.phases.memory_ingestion {
            if let Some(ingestor) = &self.memory_ingestor {
                if let Err(e) = ingestor
                    .ingest_turn(ws.context.tenant_id, ws.context.session.id, &ws.user_message, ws.candidate_response.as_deref().unwrap_or_default(), Utc::now(), ws.context.session.turn_count)
                    .await
                {
                    tracing::warn!(error = %e, "best-effort memory ingestion failed");
                }
            }
        }

        ws.record_timing(clock.finish("audit_and_memory_ingestion", false, None));
    }

    fn build_result(ws: TurnWorkingSet) -> AlignmentResult {
        let enforcement_passed = ws.enforcement.as_ref().map(|e| e.passed).unwrap_or(true);
        AlignmentResult {
            turn_id: ws.context.turn_id,
            session_id: ws.context.session.id,
            response: ws.candidate_response.unwrap_or_default(),
            matched_rules: ws.matched_rules,
            scenario_state: ScenarioState { scenario_id: ws.context.session.active_scenario_id, step_id: ws.context.session.active_step_id },
            tools_called: ws.tools_called,
            tokens_used: ws.tokens_used,
            latency_ms: ws.timings.iter().map(|t| t.duration_ms).sum(),
            phase_timings: ws.timings,
            enforcement_passed,
        }
    }
}

fn phase_name(timing: BindingTiming) -> &'static str {
    match timing {
        BindingTiming::BeforeStep => "tool_execution_before",
        BindingTiming::DuringStep => "tool_execution_during",
        BindingTiming::AfterStep => "tool_execution_after",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_domain::rule::{Rule, RuleScope};
    use loom_providers::MockProvider;
    use loom_repositories::{InMemoryAuditRepository, InMemoryConfigRepository, InMemoryIdempotencyCache, InMemoryInterlocutorRepository, InMemorySessionRepository, InMemoryVectorRepository};

    fn rule(tenant: Uuid, agent: Uuid, scope: RuleScope, condition: &str, action: &str, enforcement_expression: Option<String>, is_hard_constraint: bool) -> Rule {
        let now = Utc::now();
        Rule {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            agent_id: agent,
            condition_text: condition.into(),
            action_text: action.into(),
            embedding: None,
            scope,
            scope_id: None,
            priority: 0,
            enabled: true,
            max_fires_per_session: 0,
            cooldown_turns: 0,
            is_hard_constraint,
            enforcement_expression,
            tool_bindings: vec![],
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Disables every optional phase so a test only exercises retrieval,
    /// filtering, generation, and enforcement — the phases S1/S2 assert on.
    fn minimal_phase_flags() -> loom_domain::config::PhaseFlags {
        loom_domain::config::PhaseFlags {
            situational_sensor: false,
            interlocutor_update: false,
            retrieval: true,
            filtering: true,
            gap_fill_planning: false,
            tool_execution: false,
            after_tool_bindings: false,
            memory_ingestion: false,
        }
    }

    struct Harness {
        pipeline: Pipeline,
        tenant_id: Uuid,
        agent_id: Uuid,
        generator: Arc<MockProvider>,
        judge: Arc<MockProvider>,
    }

    fn build_harness() -> Harness {
        let tenant_id = Uuid::new_v4();
        let agent_id = Uuid::new_v4();

        let session_repo = Arc::new(InMemorySessionRepository::new());
        let interlocutor_repo: Arc<dyn InterlocutorRepository> = Arc::new(InMemoryInterlocutorRepository::new());
        let config_repo = Arc::new(InMemoryConfigRepository::new());
        let vector_repo: Arc<dyn VectorRepository> = Arc::new(InMemoryVectorRepository::new());
        let audit_repo: Arc<dyn AuditRepository> = Arc::new(InMemoryAuditRepository::new());
        let idempotency_cache: Arc<dyn IdempotencyCache> = Arc::new(InMemoryIdempotencyCache::new());

        let generator = Arc::new(MockProvider::new("test-generator"));
        let judge = Arc::new(MockProvider::new("test-judge"));
        let embedder: Arc<dyn LlmProvider> = Arc::new(MockProvider::new("test-embedder"));
        let generator_dyn: Arc<dyn LlmProvider> = generator.clone();
        let judge_dyn: Arc<dyn LlmProvider> = judge.clone();

        let config_repo_dyn: Arc<dyn ConfigRepository> = config_repo;
        let enforcer = Arc::new(Enforcer::new(config_repo_dyn.clone(), judge_dyn.clone()));

        let migration_field_resolver = MissingFieldResolver::new(Some(interlocutor_repo.clone()), Some(judge_dyn.clone()));
        let migration_executor = Arc::new(MigrationExecutor::new(config_repo_dyn.clone(), session_repo.clone(), migration_field_resolver));
        let field_resolver = Arc::new(MissingFieldResolver::new(Some(interlocutor_repo.clone()), Some(judge_dyn.clone())));

        let session_locks = Arc::new(SessionLockManager::new());

        let pipeline = Pipeline {
            session_repo,
            interlocutor_repo,
            config_repo: config_repo_dyn,
            vector_repo,
            audit_repo,
            idempotency_cache,
            generator: generator_dyn,
            judge: judge_dyn,
            embedder,
            enforcer,
            migration_executor,
            field_resolver,
            memory_ingestor: None,
            tool_executor: None,
            session_locks,
            config: PipelineConfig { phases: minimal_phase_flags(), ..PipelineConfig::default() },
        };

        Harness { pipeline, tenant_id, agent_id, generator, judge }
    }

    /// S1 — a simple greeting matches one rule and produces a non-empty
    /// response with no scenario, no tools, and enforcement passing.
    #[tokio::test]
    async fn s1_simple_greeting_matches_one_rule_and_passes_enforcement() {
        let h = build_harness();
        let greet_rule = rule(h.tenant_id, h.agent_id, RuleScope::Scenario, "user greets the agent", "respond warmly and offer help", None, false);
        h.pipeline.config_repo.save_rule(greet_rule.clone()).await.unwrap();

        h.judge.on(
            "User message: Hi there",
            &format!(r#"[{{"rule_id": "{}", "relevant": true, "relevance_score": 0.95, "rationale": "greeting"}}]"#, greet_rule.id),
        );
        h.generator.set_default_response("Hi there! How can I help you today?");

        let input = TurnInput {
            tenant_id: h.tenant_id,
            agent_id: h.agent_id,
            channel: "test".into(),
            channel_user_id: "user-1".into(),
            message: "Hi there".into(),
            session_id: None,
            metadata: None,
            idempotency_key: None,
        };

        let result = h.pipeline.process_turn(input).await.unwrap();

        assert!(result.matched_rules.iter().any(|m| m.rule_id == greet_rule.id));
        assert!(!result.response.is_empty());
        assert_eq!(result.scenario_state.scenario_id, None);
        assert!(result.tools_called.is_empty());
        assert!(result.enforcement_passed);
    }

    /// S2 — a GLOBAL hard constraint catches a first draft that violates
    /// it, triggers exactly one regeneration, and the final response
    /// both passes enforcement and stays within the constraint.
    #[tokio::test]
    async fn s2_hard_constraint_violation_triggers_one_regeneration_then_passes() {
        let h = build_harness();
        let discount_rule = rule(
            h.tenant_id,
            h.agent_id,
            RuleScope::Global,
            "never discount more than 10%",
            "cap any discount offer at 10%",
            Some("discount_percent <= 10".into()),
            true,
        );
        h.pipeline.config_repo.save_rule(discount_rule.clone()).await.unwrap();

        h.generator.set_default_response("As a goodwill gesture, here's 20% off your next order!");
        h.generator.on("Revise this response", "As a goodwill gesture, here's 10% off your next order!");

        let input = TurnInput {
            tenant_id: h.tenant_id,
            agent_id: h.agent_id,
            channel: "test".into(),
            channel_user_id: "user-2".into(),
            message: "Can I get a discount?".into(),
            session_id: None,
            metadata: None,
            idempotency_key: None,
        };

        let result = h.pipeline.process_turn(input).await.unwrap();

        assert!(result.enforcement_passed);
        assert!(result.response.contains("10%"));
        assert!(!result.response.contains("20%"));
    }
}
