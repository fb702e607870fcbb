//! JIT migration executor (§4.5): decides what to do with a session
//! whose remembered scenario step predates the live scenario version,
//! before the turn pipeline's Phase 1 finishes loading `TurnContext`.
//! Grounded on `ruche/brains/focal/migration/executor.py`'s
//! `MigrationExecutor.reconcile` and its `_execute_*` dispatch methods.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use loom_domain::migration::{AnchorTransformation, MigrationScenarioKind, ReconciliationAction, ReconciliationResult};
use loom_domain::scenario::Scenario;
use loom_domain::session::{MigrationState, Session, StepVisit};
use loom_domain::trace::TraceEvent;
use loom_domain::Result;
use loom_repositories::{ConfigRepository, SessionRepository};
use uuid::Uuid;

use crate::composite::CompositeMapper;
use crate::diff::{compute_scenario_checksum, compute_step_content_hash};
use crate::field_resolver::MissingFieldResolver;

pub struct MigrationExecutor {
    config_repo: Arc<dyn ConfigRepository>,
    session_repo: Arc<dyn SessionRepository>,
    field_resolver: MissingFieldResolver,
    composite_mapper: CompositeMapper,
}

impl MigrationExecutor {
    pub fn new(
        config_repo: Arc<dyn ConfigRepository>,
        session_repo: Arc<dyn SessionRepository>,
        field_resolver: MissingFieldResolver,
    ) -> Self {
        let composite_mapper = CompositeMapper::new(config_repo.clone());
        Self {
            config_repo,
            session_repo,
            field_resolver,
            composite_mapper,
        }
    }

    /// Performs pre-turn reconciliation for `session` against
    /// `current_scenario`. `profile_id` and `conversation_text` feed
    /// GAP_FILL's field resolution. Persists `session` and returns its
    /// updated form alongside the outcome.
    pub async fn reconcile(
        &self,
        mut session: Session,
        current_scenario: &Scenario,
        profile_id: Option<Uuid>,
        conversation_text: Option<&str>,
    ) -> Result<(Session, ReconciliationResult)> {
        if session.pending_migration.is_none()
            && session.active_scenario_version == Some(current_scenario.version)
        {
            return Ok((session, ReconciliationResult::continue_unchanged()));
        }

        session.migration_state = MigrationState::Migrating;

        let plan = match &session.pending_migration {
            Some(pending) => self.config_repo.get_migration_plan(session.tenant_id, pending.migration_plan_id).await?,
            None => None,
        };

        let anchor_hash = self.current_anchor_hash(&session);

        let result = if plan.is_none() || anchor_hash.is_none() {
            self.fallback_reconciliation(&mut session, current_scenario).await?
        } else {
            let plan = plan.unwrap();
            let anchor_hash = anchor_hash.unwrap();

            if plan.to_version < current_scenario.version {
                let chain = self
                    .composite_mapper
                    .get_plan_chain(session.tenant_id, current_scenario.id, plan.from_version, current_scenario.version)
                    .await?;
                if chain.is_empty() {
                    self.fallback_reconciliation(&mut session, current_scenario).await?
                } else {
                    let r = self
                        .composite_mapper
                        .execute_composite_migration(&session, &chain, &anchor_hash, current_scenario)
                        .await;
                    if r.action == ReconciliationAction::Teleport {
                        if let Some(target) = r.target_step_id {
                            self.teleport_session(&mut session, target, "composite", current_scenario);
                        }
                    }
                    r
                }
            } else {
                let anchor_transform = plan.transformation_map.iter().find(|a| a.anchor_content_hash == anchor_hash).cloned();
                match anchor_transform {
                    None => self.fallback_reconciliation(&mut session, current_scenario).await?,
                    Some(anchor) => {
                        if let Some(policy) = &anchor.policy {
                            if !policy.update_downstream {
                                session.active_scenario_version = Some(current_scenario.version);
                                ReconciliationResult::continue_unchanged()
                            } else {
                                let kind = self.resolve_scenario_kind(&anchor.migration_scenario, policy.force_scenario.as_deref(), &session);
                                self.dispatch(&mut session, &anchor, kind, current_scenario, profile_id, conversation_text).await?
                            }
                        } else {
                            self.dispatch(&mut session, &anchor, anchor.migration_scenario, current_scenario, profile_id, conversation_text).await?
                        }
                    }
                }
            }
        };

        match result.action {
            ReconciliationAction::Continue if !result.blocked_by_checkpoint => {
                self.finalize_migration(&mut session, current_scenario);
            }
            ReconciliationAction::Teleport => {
                self.finalize_migration(&mut session, current_scenario);
            }
            ReconciliationAction::Collect => {
                session.migration_state = MigrationState::Pending;
            }
            ReconciliationAction::ExitScenario => {
                session.migration_state = MigrationState::Exited;
            }
            _ => {}
        }

        TraceEvent::MigrationReconciled {
            session_id: session.id.to_string(),
            action: format!("{:?}", result.action),
            from_version: session.active_scenario_version.unwrap_or(-1),
            to_version: current_scenario.version,
        }
        .emit();

        self.session_repo.save(session.clone()).await?;
        Ok((session, result))
    }

    fn resolve_scenario_kind(&self, computed: &MigrationScenarioKind, force_scenario: Option<&str>, session: &Session) -> MigrationScenarioKind {
        let Some(raw) = force_scenario else { return *computed };
        match raw {
            "CLEAN_GRAFT" => MigrationScenarioKind::CleanGraft,
            "GAP_FILL" => MigrationScenarioKind::GapFill,
            "RE_ROUTE" => MigrationScenarioKind::ReRoute,
            other => {
                tracing::warn!(session_id = %session.id, force_scenario = other, "invalid force_scenario, ignoring");
                *computed
            }
        }
    }

    async fn dispatch(
        &self,
        session: &mut Session,
        anchor: &AnchorTransformation,
        kind: MigrationScenarioKind,
        current_scenario: &Scenario,
        profile_id: Option<Uuid>,
        conversation_text: Option<&str>,
    ) -> Result<ReconciliationResult> {
        match kind {
            MigrationScenarioKind::CleanGraft => {
                self.teleport_session(session, anchor.anchor_node_id_v2, "clean_graft", current_scenario);
                Ok(ReconciliationResult::teleport(anchor.anchor_node_id_v2))
            }
            MigrationScenarioKind::GapFill => {
                self.execute_gap_fill(session, anchor, current_scenario, profile_id, conversation_text).await
            }
            MigrationScenarioKind::ReRoute => self.execute_re_route(session, anchor, current_scenario),
        }
    }

    async fn execute_gap_fill(
        &self,
        session: &mut Session,
        anchor: &AnchorTransformation,
        current_scenario: &Scenario,
        profile_id: Option<Uuid>,
        conversation_text: Option<&str>,
    ) -> Result<ReconciliationResult> {
        let mut required_fields: Vec<String> = Vec::new();
        for node_id in &anchor.upstream_changes.inserted_nodes {
            if let Some(step) = current_scenario.step(*node_id) {
                for field in &step.collects_fields {
                    if !required_fields.contains(field) {
                        required_fields.push(field.clone());
                    }
                }
            }
        }

        let results = self
            .field_resolver
            .resolve_missing(session.tenant_id, profile_id, session, &required_fields, conversation_text)
            .await?;

        let mut still_missing = Vec::new();
        let mut filled = Vec::new();
        for r in &results {
            if r.filled {
                if let Some(value) = &r.value {
                    session.variables.insert(r.field_name.clone(), value.clone());
                }
                TraceEvent::GapFillAutoFilled {
                    session_id: session.id.to_string(),
                    field_name: r.field_name.clone(),
                    confidence: r.confidence,
                }
                .emit();
                filled.push(r.clone());
            } else {
                still_missing.push(r.field_name.clone());
            }
        }

        if let Some(profile_id) = profile_id {
            if !filled.is_empty() {
                self.field_resolver.persist_extracted_values(session.tenant_id, profile_id, &filled).await?;
            }
        }

        if !still_missing.is_empty() {
            let msg = format!("Before we continue, I need to collect some information: {}", still_missing.join(", "));
            return Ok(ReconciliationResult {
                action: ReconciliationAction::Collect,
                target_step_id: None,
                collect_fields: Some(still_missing),
                checkpoint_warning: Some(msg),
                blocked_by_checkpoint: false,
            });
        }

        self.teleport_session(session, anchor.anchor_node_id_v2, "gap_fill", current_scenario);
        Ok(ReconciliationResult::teleport(anchor.anchor_node_id_v2))
    }

    fn execute_re_route(
        &self,
        session: &mut Session,
        anchor: &AnchorTransformation,
        current_scenario: &Scenario,
    ) -> Result<ReconciliationResult> {
        if let Some(idx) = session.last_checkpoint_index() {
            let checkpoint_step_id = session.step_history[idx].step_id;
            if self.is_upstream_of_checkpoint(current_scenario, anchor.anchor_node_id_v2, checkpoint_step_id) {
                TraceEvent::CheckpointBlocked {
                    session_id: session.id.to_string(),
                    target_step_id: anchor.anchor_node_id_v2.to_string(),
                }
                .emit();
                return Ok(ReconciliationResult::blocked_by_checkpoint(format!(
                    "cannot migrate past checkpoint {checkpoint_step_id}"
                )));
            }
        }

        let target = self.evaluate_fork_target(session, anchor, current_scenario);
        match target {
            Some(target_step_id) => {
                self.teleport_session(session, target_step_id, "re_route", current_scenario);
                Ok(ReconciliationResult::teleport(target_step_id))
            }
            None => Ok(ReconciliationResult {
                action: ReconciliationAction::Continue,
                target_step_id: None,
                collect_fields: None,
                checkpoint_warning: Some("We need some additional information to continue.".into()),
                blocked_by_checkpoint: false,
            }),
        }
    }

    fn evaluate_fork_target(
        &self,
        session: &Session,
        anchor: &AnchorTransformation,
        current_scenario: &Scenario,
    ) -> Option<Uuid> {
        for fork_id in &anchor.upstream_changes.new_forks {
            let Some(fork_step) = current_scenario.step(*fork_id) else { continue };
            for transition in &fork_step.transitions {
                if transition.condition_fields.is_empty() {
                    continue;
                }
                let all_present = transition.condition_fields.iter().all(|f| session.variables.contains_key(f));
                if all_present {
                    return Some(transition.to_step_id);
                }
            }
        }
        None
    }

    /// Reverse-BFS from `checkpoint_step_id` to see whether
    /// `target_step_id` is reachable going backwards — if so, a
    /// teleport there would cross the checkpoint in reverse.
    fn is_upstream_of_checkpoint(&self, scenario: &Scenario, target_step_id: Uuid, checkpoint_step_id: Uuid) -> bool {
        let mut reverse_adj: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for step in &scenario.steps {
            for t in &step.transitions {
                reverse_adj.entry(t.to_step_id).or_default().push(step.id);
            }
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([checkpoint_step_id]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            if current == target_step_id {
                return true;
            }
            if let Some(preds) = reverse_adj.get(&current) {
                for p in preds {
                    if !visited.contains(p) {
                        queue.push_back(*p);
                    }
                }
            }
        }
        false
    }

    async fn fallback_reconciliation(&self, session: &mut Session, current_scenario: &Scenario) -> Result<ReconciliationResult> {
        if let Some(active_step_id) = session.active_step_id {
            if let Some(hash) = session
                .step_history
                .iter()
                .rev()
                .find(|v| v.step_id == active_step_id)
                .map(|v| v.step_content_hash.clone())
            {
                for step in &current_scenario.steps {
                    if compute_step_content_hash(step) == hash {
                        self.teleport_session(session, step.id, "fallback_hash_match", current_scenario);
                        return Ok(ReconciliationResult::teleport(step.id));
                    }
                }
            }
        }

        self.teleport_session(session, current_scenario.entry_step_id, "fallback_entry", current_scenario);
        Ok(ReconciliationResult::teleport(current_scenario.entry_step_id))
    }

    fn current_anchor_hash(&self, session: &Session) -> Option<String> {
        let active_step_id = session.active_step_id?;
        session
            .step_history
            .iter()
            .rev()
            .find(|v| v.step_id == active_step_id)
            .map(|v| v.step_content_hash.clone())
    }

    fn teleport_session(&self, session: &mut Session, target_step_id: Uuid, reason: &str, current_scenario: &Scenario) {
        let hash = current_scenario
            .step(target_step_id)
            .map(compute_step_content_hash)
            .unwrap_or_default();

        session.active_step_id = Some(target_step_id);
        session.active_scenario_version = Some(current_scenario.version);
        session.step_history.push(StepVisit {
            step_id: target_step_id,
            scenario_version: current_scenario.version,
            visited_at: Utc::now(),
            transition_reason: format!("migration:{reason}"),
            step_content_hash: hash,
        });
    }

    fn finalize_migration(&self, session: &mut Session, current_scenario: &Scenario) {
        session.pending_migration = None;
        session.scenario_checksum = Some(compute_scenario_checksum(current_scenario));
        session.migration_state = MigrationState::Synced;
    }
}
