//! Variable resolution (§4.3): a template string carries `{name[:format_spec]}`
//! placeholders; unresolved names are preserved verbatim so enforcement
//! can detect them in generated text (§4.1 "Generation" detail).
//! Grounded on `ruche/brains/focal/phases/execution/variable_resolver.py`'s
//! `VariableResolver`.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use loom_domain::interlocutor::VariableEntry;
use loom_domain::session::Session;
use regex::Regex;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(?::([^{}]*))?\}").unwrap())
}

/// Resolution order (§4.3): (a) ACTIVE interlocutor field; (b) session
/// variable. Returns the values resolved for `required_vars`, keyed by
/// name, and the subset still missing.
pub fn resolve_variables(
    required_vars: &HashSet<String>,
    interlocutor_snapshot: &HashMap<String, VariableEntry>,
    session: &Session,
) -> (HashMap<String, serde_json::Value>, HashSet<String>) {
    let mut known = HashMap::new();

    for name in required_vars {
        if let Some(entry) = interlocutor_snapshot.get(name) {
            known.insert(name.clone(), entry.value.clone());
        }
    }
    for name in required_vars {
        if !known.contains_key(name) {
            if let Some(value) = session.variables.get(name) {
                known.insert(name.clone(), value.clone());
            }
        }
    }

    let missing = required_vars.difference(&known.keys().cloned().collect()).cloned().collect();
    (known, missing)
}

/// Substitutes `{name[:format_spec]}` placeholders in `template` from
/// `known_vars`. `format_spec` is honored only for numeric values
/// needing fixed decimal places (`.Nf`); any other spec, or a value
/// with no matching placeholder name, is rendered with its default
/// JSON-value-to-string form. Names absent from `known_vars` are left
/// untouched, braces included.
pub fn substitute(template: &str, known_vars: &HashMap<String, serde_json::Value>) -> String {
    placeholder_re()
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            let format_spec = caps.get(2).map(|m| m.as_str());
            match known_vars.get(name) {
                Some(value) => render_value(value, format_spec),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn render_value(value: &serde_json::Value, format_spec: Option<&str>) -> String {
    match (value, format_spec) {
        (serde_json::Value::Number(n), Some(spec)) if spec.ends_with('f') => {
            let precision: usize = spec.trim_start_matches('.').trim_end_matches('f').parse().unwrap_or(2);
            format!("{:.*}", precision, n.as_f64().unwrap_or(0.0))
        }
        (serde_json::Value::String(s), _) => s.clone(),
        (other, _) => other.to_string().trim_matches('"').to_string(),
    }
}

/// Extracts every placeholder name referenced in `template`, for
/// collecting a step/template's `required_vars` set before resolution.
pub fn placeholder_names(template: &str) -> HashSet<String> {
    placeholder_re().captures_iter(template).map(|c| c[1].to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loom_domain::interlocutor::{VariableSource, VariableStatus};
    use loom_domain::session::MigrationState;
    use uuid::Uuid;

    fn entry(value: serde_json::Value) -> VariableEntry {
        VariableEntry {
            id: Uuid::new_v4(),
            value,
            value_type: "string".into(),
            source: VariableSource::User,
            confidence: 1.0,
            verified: true,
            status: VariableStatus::Active,
            superseded_by: None,
            source_item_id: None,
            source_item_type: None,
            expires_at: None,
            history: vec![],
        }
    }

    fn session() -> Session {
        Session {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            channel: "webchat".into(),
            channel_user_id: "u1".into(),
            active_scenario_id: None,
            active_step_id: None,
            active_scenario_version: None,
            variables: HashMap::new(),
            turn_count: 0,
            step_history: vec![],
            scenario_checksum: None,
            pending_migration: None,
            migration_state: MigrationState::Synced,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn interlocutor_field_takes_precedence_over_session_variable() {
        let mut snapshot = HashMap::new();
        snapshot.insert("order_id".to_string(), entry(serde_json::json!("A1")));
        let mut sess = session();
        sess.variables.insert("order_id".to_string(), serde_json::json!("B2"));

        let required: HashSet<String> = ["order_id".to_string()].into_iter().collect();
        let (known, missing) = resolve_variables(&required, &snapshot, &sess);
        assert_eq!(known.get("order_id"), Some(&serde_json::json!("A1")));
        assert!(missing.is_empty());
    }

    #[test]
    fn session_variable_used_when_not_in_interlocutor_snapshot() {
        let snapshot = HashMap::new();
        let mut sess = session();
        sess.variables.insert("nickname".to_string(), serde_json::json!("Bo"));

        let required: HashSet<String> = ["nickname".to_string()].into_iter().collect();
        let (known, _) = resolve_variables(&required, &snapshot, &sess);
        assert_eq!(known.get("nickname"), Some(&serde_json::json!("Bo")));
    }

    #[test]
    fn unknown_name_is_reported_missing() {
        let required: HashSet<String> = ["ghost".to_string()].into_iter().collect();
        let (known, missing) = resolve_variables(&required, &HashMap::new(), &session());
        assert!(known.is_empty());
        assert!(missing.contains("ghost"));
    }

    #[test]
    fn substitute_replaces_known_and_preserves_unknown() {
        let mut known = HashMap::new();
        known.insert("order_id".to_string(), serde_json::json!("A1"));
        let out = substitute("Order {order_id} is behind {eta}.", &known);
        assert_eq!(out, "Order A1 is behind {eta}.");
    }

    #[test]
    fn substitute_applies_fixed_point_format_spec() {
        let mut known = HashMap::new();
        known.insert("amount".to_string(), serde_json::json!(12.5));
        let out = substitute("Total: {amount:.2f}", &known);
        assert_eq!(out, "Total: 12.50");
    }

    #[test]
    fn placeholder_names_collects_all_distinct_names() {
        let names = placeholder_names("Hi {name}, your order {order_id} totals {amount:.2f}.");
        assert_eq!(names.len(), 3);
        assert!(names.contains("order_id"));
    }
}
