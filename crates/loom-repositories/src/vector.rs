use std::collections::HashMap;

use loom_domain::Result;
use parking_lot::RwLock;
use uuid::Uuid;

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub tenant_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
pub struct VectorSearchFilter {
    pub agent_id: Option<Uuid>,
    pub entity_type: Option<String>,
}

/// A generic embedding index keyed by `(entity_type, entity_id)` with a
/// per-tenant filter (§6 persisted state layout) — distinct from
/// `MemoryRepository`'s episode-scoped vector search, this backs
/// embeddings over rules, entities, or any other embedded entity.
#[async_trait::async_trait]
pub trait VectorRepository: Send + Sync {
    async fn create_collection(&self, name: &str) -> Result<()>;
    async fn drop_collection(&self, name: &str) -> Result<()>;

    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<()>;

    async fn search(
        &self,
        collection: &str,
        tenant_id: Uuid,
        query: &[f32],
        limit: usize,
        filter: VectorSearchFilter,
    ) -> Result<Vec<(VectorRecord, f32)>>;

    async fn delete(&self, collection: &str, tenant_id: Uuid, filter: VectorSearchFilter) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryVectorRepository {
    collections: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl InMemoryVectorRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl VectorRepository for InMemoryVectorRepository {
    async fn create_collection(&self, name: &str) -> Result<()> {
        self.collections.write().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections.write().remove(name);
        Ok(())
    }

    async fn upsert(&self, collection: &str, record: VectorRecord) -> Result<()> {
        let mut collections = self.collections.write();
        let records = collections.entry(collection.to_string()).or_default();
        if let Some(existing) = records
            .iter_mut()
            .find(|r| r.entity_type == record.entity_type && r.entity_id == record.entity_id)
        {
            *existing = record;
        } else {
            records.push(record);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        tenant_id: Uuid,
        query: &[f32],
        limit: usize,
        filter: VectorSearchFilter,
    ) -> Result<Vec<(VectorRecord, f32)>> {
        let collections = self.collections.read();
        let mut scored: Vec<(VectorRecord, f32)> = collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|r| r.tenant_id == tenant_id)
            .filter(|r| filter.agent_id.map(|a| r.agent_id == Some(a)).unwrap_or(true))
            .filter(|r| filter.entity_type.as_ref().map(|t| &r.entity_type == t).unwrap_or(true))
            .map(|r| (r.clone(), cosine(&r.embedding, query)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn delete(&self, collection: &str, tenant_id: Uuid, filter: VectorSearchFilter) -> Result<usize> {
        let mut collections = self.collections.write();
        let Some(records) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|r| {
            !(r.tenant_id == tenant_id
                && filter.agent_id.map(|a| r.agent_id == Some(a)).unwrap_or(true)
                && filter.entity_type.as_ref().map(|t| &r.entity_type == t).unwrap_or(true))
        });
        Ok(before - records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_is_tenant_scoped_and_ranked() {
        let repo = InMemoryVectorRepository::new();
        repo.create_collection("rules").await.unwrap();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        repo.upsert(
            "rules",
            VectorRecord {
                tenant_id: tenant_a,
                agent_id: None,
                entity_type: "rule".into(),
                entity_id: Uuid::new_v4(),
                embedding: vec![1.0, 0.0],
            },
        )
        .await
        .unwrap();
        repo.upsert(
            "rules",
            VectorRecord {
                tenant_id: tenant_b,
                agent_id: None,
                entity_type: "rule".into(),
                entity_id: Uuid::new_v4(),
                embedding: vec![1.0, 0.0],
            },
        )
        .await
        .unwrap();

        let results = repo
            .search("rules", tenant_a, &[1.0, 0.0], 10, VectorSearchFilter::default())
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_matching_filter_only() {
        let repo = InMemoryVectorRepository::new();
        repo.create_collection("c").await.unwrap();
        let tenant = Uuid::new_v4();
        repo.upsert(
            "c",
            VectorRecord {
                tenant_id: tenant,
                agent_id: None,
                entity_type: "entity".into(),
                entity_id: Uuid::new_v4(),
                embedding: vec![1.0],
            },
        )
        .await
        .unwrap();
        repo.upsert(
            "c",
            VectorRecord {
                tenant_id: tenant,
                agent_id: None,
                entity_type: "rule".into(),
                entity_id: Uuid::new_v4(),
                embedding: vec![1.0],
            },
        )
        .await
        .unwrap();

        let removed = repo
            .delete(
                "c",
                tenant,
                VectorSearchFilter { agent_id: None, entity_type: Some("entity".into()) },
            )
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
