//! Multi-version gap handling (§4.5 step 7): when a session missed more
//! than one scenario publish, `CompositeMapper` walks the chain of
//! single-hop `MigrationPlan`s and executes the net effect as one
//! logical migration. Grounded on
//! `ruche/brains/focal/migration/composite.py` (referenced but not
//! defined in spec.md's step 7).

use std::sync::Arc;

use loom_domain::migration::{AnchorTransformation, MigrationPlan, MigrationScenarioKind, ReconciliationResult};
use loom_domain::scenario::Scenario;
use loom_domain::session::Session;
use loom_domain::Result;
use loom_repositories::ConfigRepository;
use uuid::Uuid;

/// Ordinal restrictiveness of a migration scenario kind — RE_ROUTE may
/// block at a checkpoint and so outranks GAP_FILL, which in turn
/// requires more of the customer than a silent CLEAN_GRAFT teleport.
fn restrictiveness(kind: MigrationScenarioKind) -> u8 {
    match kind {
        MigrationScenarioKind::CleanGraft => 0,
        MigrationScenarioKind::GapFill => 1,
        MigrationScenarioKind::ReRoute => 2,
    }
}

pub struct CompositeMapper {
    config_repo: Arc<dyn ConfigRepository>,
}

impl CompositeMapper {
    pub fn new(config_repo: Arc<dyn ConfigRepository>) -> Self {
        Self { config_repo }
    }

    /// Walks `from_version -> from_version+1 -> ... -> end_version`,
    /// collecting each single-hop plan. Returns an empty vec if the
    /// chain is broken anywhere (a hop has no plan) — the caller treats
    /// that the same as "no plan exists" and falls back to hash
    /// matching.
    pub async fn get_plan_chain(
        &self,
        tenant_id: Uuid,
        scenario_id: Uuid,
        start_version: i64,
        end_version: i64,
    ) -> Result<Vec<MigrationPlan>> {
        let mut chain = Vec::new();
        let mut version = start_version;
        while version < end_version {
            match self.config_repo.find_migration_plan_from(tenant_id, scenario_id, version).await? {
                Some(plan) => {
                    let to_version = plan.to_version;
                    chain.push(plan);
                    if to_version <= version {
                        // Malformed plan (non-advancing hop) — stop rather than loop forever.
                        break;
                    }
                    version = to_version;
                }
                None => return Ok(Vec::new()),
            }
        }
        if version < end_version {
            return Ok(Vec::new());
        }
        Ok(chain)
    }

    /// Executes the net effect of `plan_chain` as a single logical
    /// migration. Every plan in the chain is checked for an anchor
    /// transformation keyed by the session's original `anchor_hash` (a
    /// plan generated at publish time may carry transformations for any
    /// historical anchor a returning customer could be sitting on, not
    /// only its immediate predecessor's); the most restrictive scenario
    /// kind across all matches wins, and the target step is the
    /// furthest-downstream match's `anchor_node_id_v2`.
    pub async fn execute_composite_migration(
        &self,
        _session: &Session,
        plan_chain: &[MigrationPlan],
        anchor_hash: &str,
        _final_scenario: &Scenario,
    ) -> ReconciliationResult {
        let mut matches: Vec<&AnchorTransformation> = Vec::new();
        for plan in plan_chain {
            if let Some(anchor) = plan.transformation_map.iter().find(|a| a.anchor_content_hash == anchor_hash) {
                matches.push(anchor);
            }
        }

        let Some(last) = matches.last() else {
            return ReconciliationResult::exit_scenario();
        };

        let most_restrictive = matches
            .iter()
            .map(|a| a.migration_scenario)
            .max_by_key(|k| restrictiveness(*k))
            .unwrap_or(last.migration_scenario);

        match most_restrictive {
            MigrationScenarioKind::CleanGraft | MigrationScenarioKind::GapFill => {
                ReconciliationResult::teleport(last.anchor_node_id_v2)
            }
            MigrationScenarioKind::ReRoute => ReconciliationResult::teleport(last.anchor_node_id_v2),
        }
    }
}
