//! Content hashing over the stable fields a scenario step/checksum is
//! defined over (§4.5): `sha2::Sha256` over a canonical byte encoding
//! (sorted keys where order isn't already significant, fixed
//! separators), the same hashing crate the teacher depends on for auth
//! token hashing.

use loom_domain::scenario::{Scenario, ScenarioStep};
use sha2::{Digest, Sha256};

/// Hashes the fields that define a step's identity across scenario
/// versions: prompt text, tool bindings, collected fields, transitions.
/// Anything else (id, checkpoint flag) can change without the step
/// being considered "different" for migration-matching purposes — an
/// operator may flip `is_checkpoint` without that counting as a new
/// anchor.
pub fn compute_step_content_hash(step: &ScenarioStep) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"prompt_text:");
    hasher.update(step.prompt_text.as_bytes());

    hasher.update(b"|tool_bindings:");
    for binding in &step.tool_bindings {
        hasher.update(binding.tool_id.as_bytes());
        hasher.update(format!("{:?}", binding.when).as_bytes());
        let mut vars = binding.required_variables.clone();
        vars.sort();
        for v in &vars {
            hasher.update(v.as_bytes());
            hasher.update(b",");
        }
    }

    hasher.update(b"|collects_fields:");
    let mut fields = step.collects_fields.clone();
    fields.sort();
    for f in &fields {
        hasher.update(f.as_bytes());
        hasher.update(b",");
    }

    hasher.update(b"|transitions:");
    for t in &step.transitions {
        hasher.update(t.to_step_id.as_bytes());
        let mut conds = t.condition_fields.clone();
        conds.sort();
        for c in &conds {
            hasher.update(c.as_bytes());
            hasher.update(b",");
        }
    }

    hex::encode(hasher.finalize())
}

/// A scenario's checksum is the hash of its ordered step hashes (steps
/// sorted by id so the checksum is independent of in-memory ordering).
pub fn compute_scenario_checksum(scenario: &Scenario) -> String {
    let mut step_hashes: Vec<(uuid::Uuid, String)> = scenario
        .steps
        .iter()
        .map(|s| (s.id, compute_step_content_hash(s)))
        .collect();
    step_hashes.sort_by_key(|(id, _)| *id);

    let mut hasher = Sha256::new();
    for (id, hash) in &step_hashes {
        hasher.update(id.as_bytes());
        hasher.update(hash.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_domain::rule::{BindingTiming, ToolBinding};
    use loom_domain::scenario::Transition;
    use uuid::Uuid;

    fn step(prompt: &str) -> ScenarioStep {
        ScenarioStep {
            id: Uuid::new_v4(),
            prompt_text: prompt.into(),
            is_checkpoint: false,
            tool_bindings: vec![],
            transitions: vec![],
            collects_fields: vec!["email".into()],
        }
    }

    #[test]
    fn identical_stable_fields_hash_the_same_regardless_of_id() {
        let mut a = step("hello");
        let mut b = step("hello");
        a.id = Uuid::new_v4();
        b.id = Uuid::new_v4();
        assert_eq!(compute_step_content_hash(&a), compute_step_content_hash(&b));
    }

    #[test]
    fn checkpoint_flag_does_not_affect_hash() {
        let mut a = step("hello");
        a.is_checkpoint = false;
        let mut b = a.clone();
        b.is_checkpoint = true;
        assert_eq!(compute_step_content_hash(&a), compute_step_content_hash(&b));
    }

    #[test]
    fn different_prompt_text_hashes_differently() {
        let a = step("hello");
        let b = step("goodbye");
        assert_ne!(compute_step_content_hash(&a), compute_step_content_hash(&b));
    }

    #[test]
    fn tool_binding_order_independent_of_required_variables_order() {
        let mut a = step("hello");
        a.tool_bindings = vec![ToolBinding {
            tool_id: Uuid::nil(),
            when: BindingTiming::BeforeStep,
            required_variables: vec!["a".into(), "b".into()],
            depends_on: vec![],
        }];
        let mut b = a.clone();
        b.tool_bindings[0].required_variables = vec!["b".into(), "a".into()];
        assert_eq!(compute_step_content_hash(&a), compute_step_content_hash(&b));
    }

    #[test]
    fn transition_target_affects_hash() {
        let mut a = step("hello");
        a.transitions = vec![Transition {
            to_step_id: Uuid::nil(),
            condition_fields: vec![],
        }];
        let mut b = a.clone();
        b.transitions[0].to_step_id = Uuid::new_v4();
        assert_ne!(compute_step_content_hash(&a), compute_step_content_hash(&b));
    }
}
