//! Demo data for the `run`/`chat` commands — a small self-contained
//! tenant/agent with one scenario, one global rule, a glossary entry, a
//! field schema, and templates covering SUGGEST and FALLBACK. Without
//! this, a fresh in-memory `ConfigRepository` has nothing to drive a
//! turn with and Phase 8 would have no template to fall back on.

use chrono::Utc;
use loom_domain::glossary::GlossaryItem;
use loom_domain::interlocutor::InterlocutorFieldDef;
use loom_domain::rule::{Rule, RuleScope};
use loom_domain::scenario::{Scenario, ScenarioStep, Transition};
use loom_domain::template::{Template, TemplateMode};
use loom_repositories::InMemoryConfigRepository;
use uuid::Uuid;

pub struct DemoIds {
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub scenario_id: Uuid,
}

/// Populates `config_repo` with a minimal onboarding scenario ("ask for
/// the caller's name, then confirm it") plus the ambient rule/template/
/// glossary fixtures needed for every phase to have something to work
/// with. Returns the tenant/agent/scenario ids the caller should pass on
/// every `TurnInput`.
pub async fn seed_demo_data(config_repo: &InMemoryConfigRepository) -> DemoIds {
    let tenant_id = Uuid::new_v4();
    let agent_id = Uuid::new_v4();
    let scenario_id = Uuid::new_v4();
    let entry_step_id = Uuid::new_v4();
    let confirm_step_id = Uuid::new_v4();
    let now = Utc::now();

    let entry_step = ScenarioStep {
        id: entry_step_id,
        prompt_text: "Greet the caller and ask for their name.".into(),
        is_checkpoint: false,
        tool_bindings: vec![],
        transitions: vec![Transition { to_step_id: confirm_step_id, condition_fields: vec!["name".into()] }],
        collects_fields: vec!["name".into()],
    };
    let confirm_step = ScenarioStep {
        id: confirm_step_id,
        prompt_text: "Confirm the caller's name and ask how you can help.".into(),
        is_checkpoint: true,
        tool_bindings: vec![],
        transitions: vec![],
        collects_fields: vec![],
    };

    let scenario = Scenario {
        id: scenario_id,
        tenant_id,
        agent_id,
        version: 1,
        entry_step_id,
        steps: vec![entry_step, confirm_step],
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    scenario.validate().expect("demo scenario must be well-formed");

    config_repo.set_field_schema(agent_id, vec![InterlocutorFieldDef { name: "name".into(), value_type: "string".into(), required: false }]);
    config_repo.set_glossary(
        agent_id,
        vec![GlossaryItem { term: "checkpoint".into(), definition: "a step that blocks backwards teleport during migration".into(), aliases: vec![] }],
    );

    let global_rule = Rule {
        id: Uuid::new_v4(),
        tenant_id,
        agent_id,
        condition_text: "never promise a refund without a supervisor".into(),
        action_text: "Do not promise any refund; offer to escalate to a supervisor instead.".into(),
        embedding: None,
        scope: RuleScope::Global,
        scope_id: None,
        priority: 100,
        enabled: true,
        max_fires_per_session: 0,
        cooldown_turns: 0,
        is_hard_constraint: true,
        enforcement_expression: None,
        tool_bindings: vec![],
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    let suggest_template = Template {
        id: Uuid::new_v4(),
        tenant_id,
        agent_id,
        mode: TemplateMode::Suggest,
        text: "Thanks, {name}! How can I help you today?".into(),
        scenario_id: Some(scenario_id),
        step_id: Some(confirm_step_id),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    let fallback_template = Template {
        id: Uuid::new_v4(),
        tenant_id,
        agent_id,
        mode: TemplateMode::Fallback,
        text: "Sorry, I'm having trouble helping with that right now.".into(),
        scenario_id: None,
        step_id: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    config_repo.save_scenario(scenario).await.expect("save demo scenario");
    config_repo.save_rule(global_rule).await.expect("save demo rule");
    config_repo.save_template(suggest_template).await.expect("save suggest template");
    config_repo.save_template(fallback_template).await.expect("save fallback template");

    DemoIds { tenant_id, agent_id, scenario_id }
}
