use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Precomputed at publish time (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub from_version: i64,
    pub to_version: i64,
    pub transformation_map: Vec<AnchorTransformation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorTransformation {
    pub anchor_content_hash: String,
    pub anchor_node_id_v2: Uuid,
    pub migration_scenario: MigrationScenarioKind,
    pub upstream_changes: UpstreamChanges,
    pub policy: Option<AnchorMigrationPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationScenarioKind {
    CleanGraft,
    GapFill,
    ReRoute,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamChanges {
    pub inserted_nodes: Vec<Uuid>,
    pub new_forks: Vec<Uuid>,
}

/// Per-anchor operator policy. `force_scenario` accepts any string in
/// the source system; invalid values are logged and ignored rather than
/// rejected at load time — preserved verbatim per §9 Open Questions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnchorMigrationPolicy {
    pub force_scenario: Option<String>,
    pub update_downstream: bool,
    pub scope_filter: Option<String>,
}

/// Returned by the migration engine's pre-turn reconciliation (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub action: ReconciliationAction,
    pub target_step_id: Option<Uuid>,
    pub collect_fields: Option<Vec<String>>,
    pub checkpoint_warning: Option<String>,
    pub blocked_by_checkpoint: bool,
}

impl ReconciliationResult {
    pub fn continue_unchanged() -> Self {
        Self {
            action: ReconciliationAction::Continue,
            target_step_id: None,
            collect_fields: None,
            checkpoint_warning: None,
            blocked_by_checkpoint: false,
        }
    }

    pub fn teleport(target_step_id: Uuid) -> Self {
        Self {
            action: ReconciliationAction::Teleport,
            target_step_id: Some(target_step_id),
            collect_fields: None,
            checkpoint_warning: None,
            blocked_by_checkpoint: false,
        }
    }

    pub fn collect(fields: Vec<String>) -> Self {
        Self {
            action: ReconciliationAction::Collect,
            target_step_id: None,
            collect_fields: Some(fields),
            checkpoint_warning: None,
            blocked_by_checkpoint: false,
        }
    }

    pub fn exit_scenario() -> Self {
        Self {
            action: ReconciliationAction::ExitScenario,
            target_step_id: None,
            collect_fields: None,
            checkpoint_warning: None,
            blocked_by_checkpoint: false,
        }
    }

    pub fn blocked_by_checkpoint(warning: impl Into<String>) -> Self {
        Self {
            action: ReconciliationAction::Continue,
            target_step_id: None,
            collect_fields: None,
            checkpoint_warning: Some(warning.into()),
            blocked_by_checkpoint: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationAction {
    Continue,
    Teleport,
    Collect,
    ExitScenario,
}
