use std::collections::HashMap;

use loom_domain::glossary::GlossaryItem;
use loom_domain::interlocutor::InterlocutorFieldDef;
use loom_domain::migration::MigrationPlan;
use loom_domain::rule::{Rule, RuleScope};
use loom_domain::scenario::Scenario;
use loom_domain::template::Template;
use loom_domain::{Error, Result};
use parking_lot::RwLock;
use uuid::Uuid;

/// CRUD on rules (+vector search), scenarios (+archive by version),
/// templates, migration plans, glossary, and interlocutor field
/// definitions (§6). "Agents" and "tool activations" are adapter-owned
/// concerns not named in the data model (§3) and are out of scope here.
#[async_trait::async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn get_rule(&self, tenant_id: Uuid, rule_id: Uuid) -> Result<Option<Rule>>;
    async fn save_rule(&self, rule: Rule) -> Result<()>;
    /// All enabled `GLOBAL` hard-constraint rules for `(tenant, agent)` —
    /// the enforcer fetches these directly every turn regardless of
    /// retrieval (§4.4 critical invariant).
    async fn list_global_hard_constraints(&self, tenant_id: Uuid, agent_id: Uuid) -> Result<Vec<Rule>>;
    /// Candidate rules for retrieval's hybrid scoring, scoped by
    /// `(tenant, agent)` and optionally narrowed to a scenario/step scope.
    async fn search_rules(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        scope: Option<RuleScope>,
        scope_id: Option<Uuid>,
    ) -> Result<Vec<Rule>>;

    async fn get_scenario(&self, tenant_id: Uuid, scenario_id: Uuid, version: i64) -> Result<Option<Scenario>>;
    async fn get_latest_scenario(&self, tenant_id: Uuid, scenario_id: Uuid) -> Result<Option<Scenario>>;
    async fn save_scenario(&self, scenario: Scenario) -> Result<()>;
    /// Archives never expire — every published version stays retrievable
    /// indefinitely (§6 persisted state layout).
    async fn archive_scenario_version(&self, tenant_id: Uuid, scenario_id: Uuid, version: i64) -> Result<Option<Scenario>>;

    async fn list_templates(&self, tenant_id: Uuid, agent_id: Uuid, scenario_id: Option<Uuid>, step_id: Option<Uuid>) -> Result<Vec<Template>>;
    async fn save_template(&self, template: Template) -> Result<()>;

    async fn get_migration_plan(&self, tenant_id: Uuid, plan_id: Uuid) -> Result<Option<MigrationPlan>>;
    /// The plan whose `from_version` matches, used by the reconciliation
    /// algorithm's step 3 lookup (§4.5).
    async fn find_migration_plan_from(&self, tenant_id: Uuid, scenario_id: Uuid, from_version: i64) -> Result<Option<MigrationPlan>>;
    async fn save_migration_plan(&self, plan: MigrationPlan) -> Result<()>;

    async fn list_glossary(&self, tenant_id: Uuid, agent_id: Uuid) -> Result<Vec<GlossaryItem>>;
    async fn list_field_schema(&self, tenant_id: Uuid, agent_id: Uuid) -> Result<Vec<InterlocutorFieldDef>>;
}

/// In-memory reference implementation — `parking_lot::RwLock`-backed
/// maps, mirroring `sa_sessions::store::SessionStore`'s shape.
#[derive(Default)]
pub struct InMemoryConfigRepository {
    rules: RwLock<HashMap<Uuid, Rule>>,
    /// scenario_id -> version -> Scenario, all versions kept (archive).
    scenarios: RwLock<HashMap<Uuid, HashMap<i64, Scenario>>>,
    templates: RwLock<HashMap<Uuid, Template>>,
    migration_plans: RwLock<HashMap<Uuid, MigrationPlan>>,
    glossary: RwLock<HashMap<Uuid, Vec<GlossaryItem>>>,
    field_schema: RwLock<HashMap<Uuid, Vec<InterlocutorFieldDef>>>,
}

impl InMemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_glossary(&self, agent_id: Uuid, items: Vec<GlossaryItem>) {
        self.glossary.write().insert(agent_id, items);
    }

    pub fn set_field_schema(&self, agent_id: Uuid, fields: Vec<InterlocutorFieldDef>) {
        self.field_schema.write().insert(agent_id, fields);
    }
}

#[async_trait::async_trait]
impl ConfigRepository for InMemoryConfigRepository {
    async fn get_rule(&self, tenant_id: Uuid, rule_id: Uuid) -> Result<Option<Rule>> {
        Ok(self
            .rules
            .read()
            .get(&rule_id)
            .filter(|r| r.tenant_id == tenant_id && r.deleted_at.is_none())
            .cloned())
    }

    async fn save_rule(&self, rule: Rule) -> Result<()> {
        self.rules.write().insert(rule.id, rule);
        Ok(())
    }

    async fn list_global_hard_constraints(&self, tenant_id: Uuid, agent_id: Uuid) -> Result<Vec<Rule>> {
        Ok(self
            .rules
            .read()
            .values()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.agent_id == agent_id
                    && r.deleted_at.is_none()
                    && r.enabled
                    && r.is_hard_constraint
                    && r.is_global()
            })
            .cloned()
            .collect())
    }

    async fn search_rules(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        scope: Option<RuleScope>,
        scope_id: Option<Uuid>,
    ) -> Result<Vec<Rule>> {
        Ok(self
            .rules
            .read()
            .values()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.agent_id == agent_id
                    && r.deleted_at.is_none()
                    && r.enabled
                    && scope.map(|s| r.scope == s).unwrap_or(true)
                    && scope_id.map(|id| r.scope_id == Some(id)).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn get_scenario(&self, tenant_id: Uuid, scenario_id: Uuid, version: i64) -> Result<Option<Scenario>> {
        Ok(self
            .scenarios
            .read()
            .get(&scenario_id)
            .and_then(|versions| versions.get(&version))
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_latest_scenario(&self, tenant_id: Uuid, scenario_id: Uuid) -> Result<Option<Scenario>> {
        Ok(self.scenarios.read().get(&scenario_id).and_then(|versions| {
            versions
                .values()
                .filter(|s| s.tenant_id == tenant_id && s.deleted_at.is_none())
                .max_by_key(|s| s.version)
                .cloned()
        }))
    }

    async fn save_scenario(&self, scenario: Scenario) -> Result<()> {
        scenario
            .validate()
            .map_err(|e| Error::Validation(e.to_string()))?;
        self.scenarios
            .write()
            .entry(scenario.id)
            .or_default()
            .insert(scenario.version, scenario);
        Ok(())
    }

    async fn archive_scenario_version(&self, tenant_id: Uuid, scenario_id: Uuid, version: i64) -> Result<Option<Scenario>> {
        self.get_scenario(tenant_id, scenario_id, version).await
    }

    async fn list_templates(&self, tenant_id: Uuid, agent_id: Uuid, scenario_id: Option<Uuid>, step_id: Option<Uuid>) -> Result<Vec<Template>> {
        Ok(self
            .templates
            .read()
            .values()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.agent_id == agent_id
                    && t.deleted_at.is_none()
                    && scenario_id.map(|id| t.scenario_id == Some(id)).unwrap_or(true)
                    && step_id.map(|id| t.step_id == Some(id)).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn save_template(&self, template: Template) -> Result<()> {
        self.templates.write().insert(template.id, template);
        Ok(())
    }

    async fn get_migration_plan(&self, tenant_id: Uuid, plan_id: Uuid) -> Result<Option<MigrationPlan>> {
        Ok(self
            .migration_plans
            .read()
            .get(&plan_id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_migration_plan_from(&self, tenant_id: Uuid, scenario_id: Uuid, from_version: i64) -> Result<Option<MigrationPlan>> {
        let _ = scenario_id;
        Ok(self
            .migration_plans
            .read()
            .values()
            .find(|p| p.tenant_id == tenant_id && p.from_version == from_version)
            .cloned())
    }

    async fn save_migration_plan(&self, plan: MigrationPlan) -> Result<()> {
        self.migration_plans.write().insert(plan.id, plan);
        Ok(())
    }

    async fn list_glossary(&self, tenant_id: Uuid, agent_id: Uuid) -> Result<Vec<GlossaryItem>> {
        let _ = tenant_id;
        Ok(self.glossary.read().get(&agent_id).cloned().unwrap_or_default())
    }

    async fn list_field_schema(&self, tenant_id: Uuid, agent_id: Uuid) -> Result<Vec<InterlocutorFieldDef>> {
        let _ = tenant_id;
        Ok(self.field_schema.read().get(&agent_id).cloned().unwrap_or_default())
    }
}
