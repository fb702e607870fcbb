use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rule::ToolBinding;

/// A versioned directed graph of steps owned by `(tenant_id, agent_id)` (§3).
///
/// Invariant: every step is reachable from `entry_step_id`; no isolated
/// checkpoints (enforced by `Scenario::validate`, called on publish).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    /// Monotonically increasing.
    pub version: i64,
    pub entry_step_id: Uuid,
    pub steps: Vec<ScenarioStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioStep {
    pub id: Uuid,
    /// Prompt/description text — one of the stable fields folded into
    /// `content_hash` (§4.5).
    pub prompt_text: String,
    /// Blocks backwards teleport past this point (§4.5, §5).
    pub is_checkpoint: bool,
    pub tool_bindings: Vec<ToolBinding>,
    pub transitions: Vec<Transition>,
    pub collects_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub to_step_id: Uuid,
    pub condition_fields: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioNavAction {
    None,
    Start,
    Continue,
    Transition,
    Exit,
    Relocalize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScenarioValidationError {
    #[error("entry step {0} not found among scenario steps")]
    MissingEntryStep(Uuid),
    #[error("step {0} is unreachable from the entry step")]
    UnreachableStep(Uuid),
    #[error("checkpoint step {0} is unreachable from the entry step")]
    IsolatedCheckpoint(Uuid),
}

impl Scenario {
    pub fn step(&self, id: Uuid) -> Option<&ScenarioStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Every step — checkpoints included — must be reachable by walking
    /// `transitions` from `entry_step_id` (§3 invariant).
    pub fn validate(&self) -> Result<(), ScenarioValidationError> {
        if self.step(self.entry_step_id).is_none() {
            return Err(ScenarioValidationError::MissingEntryStep(self.entry_step_id));
        }

        let mut reachable = std::collections::HashSet::new();
        let mut stack = vec![self.entry_step_id];
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(step) = self.step(id) {
                for t in &step.transitions {
                    stack.push(t.to_step_id);
                }
            }
        }

        for step in &self.steps {
            if !reachable.contains(&step.id) {
                if step.is_checkpoint {
                    return Err(ScenarioValidationError::IsolatedCheckpoint(step.id));
                }
                return Err(ScenarioValidationError::UnreachableStep(step.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: Uuid, transitions: Vec<Uuid>, checkpoint: bool) -> ScenarioStep {
        ScenarioStep {
            id,
            prompt_text: "hi".into(),
            is_checkpoint: checkpoint,
            tool_bindings: vec![],
            transitions: transitions
                .into_iter()
                .map(|to_step_id| Transition {
                    to_step_id,
                    condition_fields: vec![],
                })
                .collect(),
            collects_fields: vec![],
        }
    }

    fn scenario(steps: Vec<ScenarioStep>, entry: Uuid) -> Scenario {
        Scenario {
            id: Uuid::nil(),
            tenant_id: Uuid::nil(),
            agent_id: Uuid::nil(),
            version: 1,
            entry_step_id: entry,
            steps,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn linear_scenario_is_valid() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let s = scenario(vec![step(a, vec![b], false), step(b, vec![], false)], a);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn unreachable_step_is_rejected() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let orphan = Uuid::new_v4();
        let s = scenario(
            vec![step(a, vec![b], false), step(b, vec![], false), step(orphan, vec![], false)],
            a,
        );
        assert_eq!(
            s.validate(),
            Err(ScenarioValidationError::UnreachableStep(orphan))
        );
    }

    #[test]
    fn isolated_checkpoint_is_rejected_distinctly() {
        let a = Uuid::new_v4();
        let orphan_checkpoint = Uuid::new_v4();
        let s = scenario(
            vec![step(a, vec![], false), step(orphan_checkpoint, vec![], true)],
            a,
        );
        assert_eq!(
            s.validate(),
            Err(ScenarioValidationError::IsolatedCheckpoint(orphan_checkpoint))
        );
    }

    #[test]
    fn missing_entry_step_is_rejected() {
        let a = Uuid::new_v4();
        let missing = Uuid::new_v4();
        let s = scenario(vec![step(a, vec![], false)], missing);
        assert_eq!(
            s.validate(),
            Err(ScenarioValidationError::MissingEntryStep(missing))
        );
    }
}
