use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Per-tenant, per-end-user profile (§3).
///
/// Invariant: at most one `Active` `VariableEntry` per field name;
/// updates supersede atomically (`InterlocutorProfile::set_field`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterlocutorProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub fields: HashMap<String, VariableEntry>,
    pub assets: Vec<Asset>,
    pub channel_identities: Vec<ChannelIdentity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableStatus {
    Active,
    Superseded,
    Expired,
    Orphaned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    User,
    Agent,
    System,
    Inferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableEntry {
    pub id: Uuid,
    pub value: serde_json::Value,
    pub value_type: String,
    pub source: VariableSource,
    pub confidence: f64,
    pub verified: bool,
    pub status: VariableStatus,
    pub superseded_by: Option<Uuid>,
    pub source_item_id: Option<Uuid>,
    pub source_item_type: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Full supersession chain for this field name, oldest first.
    /// Recovered from `original_source` (SPEC_FULL.md §1) so testable
    /// property 4 ("supersession chain completeness") is checkable
    /// without re-querying storage.
    pub history: Vec<FieldHistoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldHistoryEntry {
    pub entry_id: Uuid,
    pub value: serde_json::Value,
    pub status: VariableStatus,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub name: String,
    pub asset_type: String,
    pub uri: String,
    pub status: VariableStatus,
    pub superseded_by: Option<Uuid>,
    pub source_item_id: Option<Uuid>,
    pub source_item_type: Option<String>,
    pub lineage: Vec<Uuid>,
}

/// `(channel, channel_user_id)` is unique within a tenant (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelIdentity {
    pub channel: String,
    pub channel_user_id: String,
}

/// Schema definition for an interlocutor field, used by the Phase 1
/// loader to filter unknown fields (§4.2) and by the migration engine's
/// gap-fill planning (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterlocutorFieldDef {
    pub name: String,
    pub value_type: String,
    pub required: bool,
}

impl InterlocutorProfile {
    /// Returns the single `Active` entry for `name`, if any.
    pub fn active_field(&self, name: &str) -> Option<&VariableEntry> {
        self.fields
            .get(name)
            .filter(|e| e.status == VariableStatus::Active)
    }

    /// Atomically supersedes the current `Active` entry for `name` (if
    /// any) and installs `new_value` as the new `Active` entry,
    /// preserving history. Returns the new entry's id.
    pub fn set_field(
        &mut self,
        name: &str,
        new_value: serde_json::Value,
        value_type: impl Into<String>,
        source: VariableSource,
        confidence: f64,
    ) -> Uuid {
        let new_id = Uuid::new_v4();
        let now = Utc::now();

        let mut history = Vec::new();
        if let Some(existing) = self.fields.get_mut(name) {
            history = std::mem::take(&mut existing.history);
            history.push(FieldHistoryEntry {
                entry_id: existing.id,
                value: existing.value.clone(),
                status: VariableStatus::Superseded,
                recorded_at: now,
            });
            existing.status = VariableStatus::Superseded;
            existing.superseded_by = Some(new_id);
        }

        self.fields.insert(
            name.to_string(),
            VariableEntry {
                id: new_id,
                value: new_value,
                value_type: value_type.into(),
                source,
                confidence,
                verified: false,
                status: VariableStatus::Active,
                superseded_by: None,
                source_item_id: None,
                source_item_type: None,
                expires_at: None,
                history,
            },
        );
        self.updated_at = now;
        new_id
    }
}
