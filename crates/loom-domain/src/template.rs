use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parameterized response text (§3). Selection precedence in the
/// generation phase is `Exclusive → Suggest → Fallback` (§4.1 detail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub mode: TemplateMode,
    /// May contain `{name[:format_spec]}` placeholders (§4.3).
    pub text: String,
    pub scenario_id: Option<Uuid>,
    pub step_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemplateMode {
    /// The LLM may adapt the template text.
    Suggest,
    /// Bypasses the LLM entirely; variables are interpolated directly.
    Exclusive,
    /// Used only when enforcement exhausts regeneration.
    Fallback,
}

/// Picks the highest-precedence template from a candidate set, per §4.1's
/// `Exclusive → Suggest → Fallback` ordering. When more than one template
/// is eligible at the winning precedence level, the first by insertion
/// order wins — an explicit Open Question resolution (§9), not a guess.
pub fn select_template(candidates: &[Template]) -> Option<&Template> {
    for mode in [TemplateMode::Exclusive, TemplateMode::Suggest, TemplateMode::Fallback] {
        if let Some(t) = candidates.iter().find(|t| t.mode == mode) {
            return Some(t);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(mode: TemplateMode) -> Template {
        Template {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            agent_id: Uuid::nil(),
            mode,
            text: "hello {name}".into(),
            scenario_id: None,
            step_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn exclusive_wins_over_suggest_and_fallback() {
        let candidates = vec![
            template(TemplateMode::Fallback),
            template(TemplateMode::Suggest),
            template(TemplateMode::Exclusive),
        ];
        assert_eq!(select_template(&candidates).unwrap().mode, TemplateMode::Exclusive);
    }

    #[test]
    fn suggest_wins_when_no_exclusive() {
        let candidates = vec![template(TemplateMode::Fallback), template(TemplateMode::Suggest)];
        assert_eq!(select_template(&candidates).unwrap().mode, TemplateMode::Suggest);
    }

    #[test]
    fn first_insertion_order_wins_among_same_mode() {
        let first = template(TemplateMode::Suggest);
        let first_id = first.id;
        let candidates = vec![first, template(TemplateMode::Suggest)];
        assert_eq!(select_template(&candidates).unwrap().id, first_id);
    }

    #[test]
    fn empty_candidates_yield_none() {
        assert!(select_template(&[]).is_none());
    }
}
