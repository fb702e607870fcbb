use std::collections::HashMap;

use loom_domain::interlocutor::{Asset, FieldHistoryEntry, InterlocutorProfile, VariableSource};
use loom_domain::Result;
use parking_lot::RwLock;
use uuid::Uuid;

/// Profile CRUD, field update with supersession, field history, asset
/// CRUD, lineage traversal, scenario requirements, missing-fields query
/// (§6).
#[async_trait::async_trait]
pub trait InterlocutorRepository: Send + Sync {
    async fn get_profile(&self, tenant_id: Uuid, profile_id: Uuid) -> Result<Option<InterlocutorProfile>>;
    async fn save_profile(&self, profile: InterlocutorProfile) -> Result<()>;

    /// Supersedes the current `Active` entry (if any) for `name` and
    /// installs a new one, returning the new entry's id.
    async fn update_field(
        &self,
        tenant_id: Uuid,
        profile_id: Uuid,
        name: &str,
        value: serde_json::Value,
        value_type: &str,
        source: VariableSource,
        confidence: f64,
    ) -> Result<Uuid>;

    async fn field_history(&self, tenant_id: Uuid, profile_id: Uuid, name: &str) -> Result<Vec<FieldHistoryEntry>>;

    async fn upsert_asset(&self, tenant_id: Uuid, profile_id: Uuid, asset: Asset) -> Result<()>;
    /// Walks `Asset::lineage` transitively from `asset_id`.
    async fn asset_lineage(&self, tenant_id: Uuid, profile_id: Uuid, asset_id: Uuid) -> Result<Vec<Asset>>;

    /// Given a scenario's `collects_fields` requirement set, returns the
    /// subset not present as an `Active` field on the profile — used by
    /// gap-fill planning (§4.5).
    async fn missing_fields(&self, tenant_id: Uuid, profile_id: Uuid, required: &[String]) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct InMemoryInterlocutorRepository {
    profiles: RwLock<HashMap<Uuid, InterlocutorProfile>>,
}

impl InMemoryInterlocutorRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl InterlocutorRepository for InMemoryInterlocutorRepository {
    async fn get_profile(&self, tenant_id: Uuid, profile_id: Uuid) -> Result<Option<InterlocutorProfile>> {
        Ok(self
            .profiles
            .read()
            .get(&profile_id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn save_profile(&self, profile: InterlocutorProfile) -> Result<()> {
        self.profiles.write().insert(profile.id, profile);
        Ok(())
    }

    async fn update_field(
        &self,
        tenant_id: Uuid,
        profile_id: Uuid,
        name: &str,
        value: serde_json::Value,
        value_type: &str,
        source: VariableSource,
        confidence: f64,
    ) -> Result<Uuid> {
        let mut profiles = self.profiles.write();
        let profile = profiles
            .get_mut(&profile_id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or_else(|| loom_domain::Error::NotFound(format!("profile {profile_id}")))?;
        Ok(profile.set_field(name, value, value_type, source, confidence))
    }

    async fn field_history(&self, tenant_id: Uuid, profile_id: Uuid, name: &str) -> Result<Vec<FieldHistoryEntry>> {
        Ok(self
            .get_profile(tenant_id, profile_id)
            .await?
            .and_then(|p| p.fields.get(name).map(|e| e.history.clone()))
            .unwrap_or_default())
    }

    async fn upsert_asset(&self, tenant_id: Uuid, profile_id: Uuid, asset: Asset) -> Result<()> {
        let mut profiles = self.profiles.write();
        let profile = profiles
            .get_mut(&profile_id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or_else(|| loom_domain::Error::NotFound(format!("profile {profile_id}")))?;
        if let Some(existing) = profile.assets.iter_mut().find(|a| a.id == asset.id) {
            *existing = asset;
        } else {
            profile.assets.push(asset);
        }
        Ok(())
    }

    async fn asset_lineage(&self, tenant_id: Uuid, profile_id: Uuid, asset_id: Uuid) -> Result<Vec<Asset>> {
        let profile = match self.get_profile(tenant_id, profile_id).await? {
            Some(p) => p,
            None => return Ok(vec![]),
        };
        let mut out = Vec::new();
        let mut stack = vec![asset_id];
        let mut seen = std::collections::HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(asset) = profile.assets.iter().find(|a| a.id == id) {
                stack.extend(asset.lineage.iter().copied());
                out.push(asset.clone());
            }
        }
        Ok(out)
    }

    async fn missing_fields(&self, tenant_id: Uuid, profile_id: Uuid, required: &[String]) -> Result<Vec<String>> {
        let profile = self.get_profile(tenant_id, profile_id).await?;
        Ok(match profile {
            Some(p) => required
                .iter()
                .filter(|name| p.active_field(name).is_none())
                .cloned()
                .collect(),
            None => required.to_vec(),
        })
    }
}
