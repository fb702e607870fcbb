//! Gap-fill field resolution for GAP_FILL migrations (§4.5 step 6).
//!
//! Tries the interlocutor profile first (fast, no LLM call), then falls
//! back to conversation extraction via an `LlmProvider` judge. Two
//! thresholds gate how a candidate value is used, grounded on
//! `ruche/brains/focal/migration/field_resolver.py`'s equivalent
//! (compressed to a single clause in spec.md): below `USE` the value is
//! discarded outright, between `USE` and `NO_CONFIRM` it's used but
//! flagged for confirmation, at or above `NO_CONFIRM` it's used silently.

use std::sync::Arc;

use loom_domain::interlocutor::VariableSource;
use loom_domain::message::{Message, MessageContent, Role};
use loom_domain::session::Session;
use loom_domain::{Error, Result};
use loom_providers::{ChatRequest, LlmProvider};
use loom_repositories::InterlocutorRepository;
use uuid::Uuid;

/// Below this, a candidate value is discarded rather than used.
pub const USE_THRESHOLD: f64 = 0.85;
/// At or above this, a candidate value is used without asking the
/// customer to confirm it.
pub const NO_CONFIRM_THRESHOLD: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapFillSource {
    Profile,
    ConversationExtraction,
}

#[derive(Debug, Clone)]
pub struct GapFillResult {
    pub field_name: String,
    pub filled: bool,
    pub value: Option<serde_json::Value>,
    pub confidence: f64,
    pub source: Option<GapFillSource>,
    pub needs_confirmation: bool,
}

impl GapFillResult {
    fn not_filled(field_name: &str) -> Self {
        Self {
            field_name: field_name.to_string(),
            filled: false,
            value: None,
            confidence: 0.0,
            source: None,
            needs_confirmation: false,
        }
    }
}

pub struct MissingFieldResolver {
    profile_repo: Option<Arc<dyn InterlocutorRepository>>,
    judge: Option<Arc<dyn LlmProvider>>,
}

impl MissingFieldResolver {
    pub fn new(
        profile_repo: Option<Arc<dyn InterlocutorRepository>>,
        judge: Option<Arc<dyn LlmProvider>>,
    ) -> Self {
        Self { profile_repo, judge }
    }

    /// Resolves one missing field. `profile_id` is the interlocutor
    /// profile to check first; `conversation_text` (when present) is run
    /// through the judge as a fallback extraction source.
    pub async fn fill_gap(
        &self,
        tenant_id: Uuid,
        profile_id: Option<Uuid>,
        field_name: &str,
        conversation_text: Option<&str>,
    ) -> Result<GapFillResult> {
        let candidate = self.resolve_candidate(tenant_id, profile_id, field_name, conversation_text).await?;

        let Some((value, confidence, source)) = candidate else {
            return Ok(GapFillResult::not_filled(field_name));
        };

        if confidence < USE_THRESHOLD {
            return Ok(GapFillResult::not_filled(field_name));
        }

        Ok(GapFillResult {
            field_name: field_name.to_string(),
            filled: true,
            value: Some(value),
            confidence,
            source: Some(source),
            needs_confirmation: confidence < NO_CONFIRM_THRESHOLD,
        })
    }

    async fn resolve_candidate(
        &self,
        tenant_id: Uuid,
        profile_id: Option<Uuid>,
        field_name: &str,
        conversation_text: Option<&str>,
    ) -> Result<Option<(serde_json::Value, f64, GapFillSource)>> {
        if let (Some(repo), Some(profile_id)) = (&self.profile_repo, profile_id) {
            if let Some(profile) = repo.get_profile(tenant_id, profile_id).await? {
                if let Some(entry) = profile.active_field(field_name) {
                    return Ok(Some((entry.value.clone(), entry.confidence, GapFillSource::Profile)));
                }
            }
        }

        if let (Some(judge), Some(text)) = (&self.judge, conversation_text) {
            if let Some((value, confidence)) = self.extract_from_conversation(judge, field_name, text).await? {
                return Ok(Some((value, confidence, GapFillSource::ConversationExtraction)));
            }
        }

        Ok(None)
    }

    async fn extract_from_conversation(
        &self,
        judge: &Arc<dyn LlmProvider>,
        field_name: &str,
        conversation_text: &str,
    ) -> Result<Option<(serde_json::Value, f64)>> {
        let prompt = format!(
            "Extract the value of field \"{field_name}\" from the conversation below. \
             Respond with a single JSON object: {{\"value\": <extracted value or null>, \
             \"confidence\": <0.0-1.0>}}. If the field isn't mentioned, set value to null \
             and confidence to 0.0.\n\nConversation:\n{conversation_text}"
        );

        let response = judge
            .chat(ChatRequest {
                messages: vec![Message {
                    role: Role::User,
                    content: MessageContent::Text(prompt),
                }],
                temperature: Some(0.0),
                json_mode: true,
                ..Default::default()
            })
            .await?;

        let parsed: serde_json::Value = serde_json::from_str(&response.content)
            .map_err(|e| Error::Validation(format!("gap-fill judge returned non-JSON: {e}")))?;

        let value = parsed.get("value").cloned().unwrap_or(serde_json::Value::Null);
        if value.is_null() {
            return Ok(None);
        }
        let confidence = parsed.get("confidence").and_then(|c| c.as_f64()).unwrap_or(0.0);
        Ok(Some((value, confidence)))
    }

    /// Writes conversation-extracted values back onto the profile so a
    /// later turn's fast-path profile lookup finds them directly — only
    /// results actually sourced from conversation extraction are new
    /// information worth persisting; profile-sourced results are already
    /// there.
    pub async fn persist_extracted_values(
        &self,
        tenant_id: Uuid,
        profile_id: Uuid,
        results: &[GapFillResult],
    ) -> Result<()> {
        let Some(repo) = &self.profile_repo else { return Ok(()) };
        for result in results {
            if !result.filled || result.source != Some(GapFillSource::ConversationExtraction) {
                continue;
            }
            let Some(value) = &result.value else { continue };
            repo.update_field(
                tenant_id,
                profile_id,
                &result.field_name,
                value.clone(),
                "string",
                VariableSource::Inferred,
                result.confidence,
            )
            .await?;
        }
        Ok(())
    }

    /// Resolves the fast-path check against session variables first,
    /// then defers to [`fill_gap`](Self::fill_gap) — the union of a
    /// scenario's required fields is resolved this way by the
    /// reconciliation executor's GAP_FILL dispatch.
    pub async fn resolve_missing(
        &self,
        tenant_id: Uuid,
        profile_id: Option<Uuid>,
        session: &Session,
        required_fields: &[String],
        conversation_text: Option<&str>,
    ) -> Result<Vec<GapFillResult>> {
        let mut out = Vec::with_capacity(required_fields.len());
        for field in required_fields {
            if session.variables.contains_key(field) {
                continue;
            }
            out.push(self.fill_gap(tenant_id, profile_id, field, conversation_text).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loom_domain::interlocutor::InterlocutorProfile;
    use loom_repositories::InMemoryInterlocutorRepository;
    use std::collections::HashMap;

    fn session(tenant_id: Uuid) -> Session {
        Session {
            id: Uuid::new_v4(),
            tenant_id,
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
            migration_state: loom_domain::session::MigrationState::Synced,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn profile_value_above_no_confirm_is_used_silently() {
        let repo: Arc<dyn InterlocutorRepository> = Arc::new(InMemoryInterlocutorRepository::new());
        let tenant = Uuid::new_v4();
        let profile = InterlocutorProfile {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            fields: HashMap::new(),
            assets: vec![],
            channel_identities: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let pid = profile.id;
        repo.save_profile(profile).await.unwrap();
        repo.update_field(tenant, pid, "email", serde_json::json!("a@b.com"), "string", VariableSource::User, 0.99)
            .await
            .unwrap();

        let resolver = MissingFieldResolver::new(Some(repo), None);
        let result = resolver.fill_gap(tenant, Some(pid), "email", None).await.unwrap();
        assert!(result.filled);
        assert!(!result.needs_confirmation);
        assert_eq!(result.value, Some(serde_json::json!("a@b.com")));
    }

    #[tokio::test]
    async fn profile_value_between_thresholds_needs_confirmation() {
        let repo: Arc<dyn InterlocutorRepository> = Arc::new(InMemoryInterlocutorRepository::new());
        let tenant = Uuid::new_v4();
        let profile = InterlocutorProfile {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            fields: HashMap::new(),
            assets: vec![],
            channel_identities: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let pid = profile.id;
        repo.save_profile(profile).await.unwrap();
        repo.update_field(tenant, pid, "phone", serde_json::json!("555-1234"), "string", VariableSource::Inferred, 0.90)
            .await
            .unwrap();

        let resolver = MissingFieldResolver::new(Some(repo), None);
        let result = resolver.fill_gap(tenant, Some(pid), "phone", None).await.unwrap();
        assert!(result.filled);
        assert!(result.needs_confirmation);
    }

    #[tokio::test]
    async fn value_below_use_threshold_is_discarded() {
        let repo: Arc<dyn InterlocutorRepository> = Arc::new(InMemoryInterlocutorRepository::new());
        let tenant = Uuid::new_v4();
        let profile = InterlocutorProfile {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            fields: HashMap::new(),
            assets: vec![],
            channel_identities: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let pid = profile.id;
        repo.save_profile(profile).await.unwrap();
        repo.update_field(tenant, pid, "zip", serde_json::json!("94110"), "string", VariableSource::Inferred, 0.5)
            .await
            .unwrap();

        let resolver = MissingFieldResolver::new(Some(repo), None);
        let result = resolver.fill_gap(tenant, Some(pid), "zip", None).await.unwrap();
        assert!(!result.filled);
    }

    #[tokio::test]
    async fn session_fast_path_skips_already_present_variables() {
        let resolver = MissingFieldResolver::new(None, None);
        let mut s = session(Uuid::new_v4());
        s.variables.insert("email".into(), serde_json::json!("a@b.com"));

        let results = resolver
            .resolve_missing(s.tenant_id, None, &s, &["email".into(), "phone".into()], None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].field_name, "phone");
    }
}
