use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Live conversational state keyed by `(tenant, agent, channel,
/// channel_user_id)` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub channel: String,
    pub channel_user_id: String,

    pub active_scenario_id: Option<Uuid>,
    pub active_step_id: Option<Uuid>,
    pub active_scenario_version: Option<i64>,
    pub variables: HashMap<String, serde_json::Value>,
    pub turn_count: u64,
    pub step_history: Vec<StepVisit>,
    /// Hash of the scenario as last observed by this session — compared
    /// against the live scenario's checksum to detect a version mismatch
    /// (§4.5).
    pub scenario_checksum: Option<String>,
    pub pending_migration: Option<PendingMigration>,
    pub migration_state: MigrationState,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepVisit {
    pub step_id: Uuid,
    pub scenario_version: i64,
    pub visited_at: DateTime<Utc>,
    pub transition_reason: String,
    pub step_content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMigration {
    pub migration_plan_id: Uuid,
    pub detected_at: DateTime<Utc>,
}

/// State machine for session vs. scenario version (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationState {
    Synced,
    Pending,
    Migrating,
    Exited,
}

impl Session {
    /// Whether the step at `step_id` has been visited at or before
    /// `visited_at`-ordered position — used by the migration engine's
    /// checkpoint-blocking check (§4.5 RE_ROUTE).
    pub fn has_passed_checkpoint(&self, step_id: Uuid) -> bool {
        self.step_history.iter().any(|v| v.step_id == step_id)
    }

    /// Index of the most recently visited checkpoint step, if any —
    /// used to decide whether a re-route target would require crossing
    /// backwards over it.
    pub fn last_checkpoint_index(&self) -> Option<usize> {
        self.step_history
            .iter()
            .enumerate()
            .rev()
            .find(|(_, v)| {
                // A checkpoint visit is recorded by the pipeline by
                // convention: transition_reason carries "checkpoint" when
                // the visited step is a checkpoint. See loom-migration's
                // reconciliation executor for the writer side.
                v.transition_reason.contains("checkpoint")
            })
            .map(|(i, _)| i)
    }
}
