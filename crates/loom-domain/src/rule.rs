use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A behavioral policy owned by `(tenant_id, agent_id)` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,

    pub condition_text: String,
    pub action_text: String,
    /// Precomputed embedding of `condition_text`, used by retrieval's
    /// cosine-similarity term.
    pub embedding: Option<Vec<f32>>,

    pub scope: RuleScope,
    /// Required when `scope` is `Scenario` or `Step`; references the
    /// bound scenario/step id.
    pub scope_id: Option<Uuid>,

    /// `[-100, 100]`.
    pub priority: i32,
    pub enabled: bool,
    /// `0` means unlimited.
    pub max_fires_per_session: u32,
    pub cooldown_turns: u32,

    /// When true, must be enforced on every turn regardless of retrieval.
    pub is_hard_constraint: bool,
    /// Formal expression (e.g. `"amount <= 50"`) used by the
    /// deterministic enforcement lane. Absence routes the rule to the
    /// subjective (LLM-judge) lane.
    pub enforcement_expression: Option<String>,

    pub tool_bindings: Vec<ToolBinding>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleScope {
    Global,
    Scenario,
    Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBinding {
    pub tool_id: Uuid,
    pub when: BindingTiming,
    pub required_variables: Vec<String>,
    pub depends_on: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BindingTiming {
    BeforeStep,
    DuringStep,
    AfterStep,
}

impl Rule {
    /// Rules with `scope = Global` bypass retrieval — the enforcer (§4.4)
    /// and the filtering phase (§4.1) both need this check.
    pub fn is_global(&self) -> bool {
        matches!(self.scope, RuleScope::Global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(scope: RuleScope) -> Rule {
        Rule {
            id: Uuid::nil(),
            tenant_id: Uuid::nil(),
            agent_id: Uuid::nil(),
            condition_text: "x".into(),
            action_text: "y".into(),
            embedding: None,
            scope,
            scope_id: None,
            priority: 0,
            enabled: true,
            max_fires_per_session: 0,
            cooldown_turns: 0,
            is_hard_constraint: false,
            enforcement_expression: None,
            tool_bindings: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn is_global_true_only_for_global_scope() {
        assert!(rule(RuleScope::Global).is_global());
        assert!(!rule(RuleScope::Scenario).is_global());
        assert!(!rule(RuleScope::Step).is_global());
    }
}
