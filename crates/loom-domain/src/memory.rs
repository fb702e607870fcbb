use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Atomic memory unit scoped by `group_id = tenant_id:session_id` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub group_id: String,
    pub content: String,
    pub content_type: EpisodeContentType,
    pub source: EpisodeSource,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
    pub entity_ids: Vec<Uuid>,
    /// Window/meta summaries record the episode ids they were derived
    /// from here (§4.6).
    pub source_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeContentType {
    Message,
    Event,
    Document,
    Summary,
    MetaSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeSource {
    User,
    Agent,
    System,
    External,
}

impl Episode {
    pub fn group_id_for(tenant_id: Uuid, session_id: Uuid) -> String {
        format!("{tenant_id}:{session_id}")
    }
}

/// A bi-temporally valid knowledge-graph node (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub entity_type: String,
    pub attributes: HashMap<String, serde_json::Value>,
    pub confidence: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Entity {
    /// Normalized name used by the dedup pipeline's exact-match stage
    /// (§4.6 stage 1): lowercase, punctuation stripped, whitespace
    /// collapsed.
    pub fn normalized_name(name: &str) -> String {
        let lowered = name.to_lowercase();
        let stripped: String = lowered
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
            .collect();
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// A bi-temporally valid knowledge-graph edge (§3). Relationship updates
/// are rewritten, not mutated in place (§4.6): the old row is stamped
/// with `valid_to = now` and a new row is inserted with `valid_from =
/// now, valid_to = None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub from_entity_id: Uuid,
    pub to_entity_id: Uuid,
    pub relation_type: String,
    pub attributes: HashMap<String, serde_json::Value>,
    pub confidence: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Relationship {
    pub fn is_active(&self) -> bool {
        self.valid_to.is_none()
    }
}
