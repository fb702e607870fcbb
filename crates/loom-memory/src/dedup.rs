//! Four-stage entity deduplication and bi-temporal relationship rewrite
//! (§4.6). Grounded on `ruche/memory/ingestion/entity_extractor.py`'s
//! `EntityDeduplicator` and `update_relationship_temporal`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use loom_domain::memory::{Entity, Relationship};
use loom_domain::trace::TraceEvent;
use loom_domain::Result;
use loom_repositories::MemoryRepository;
use uuid::Uuid;

pub struct EntityDeduplicator {
    memory_repo: Arc<dyn MemoryRepository>,
    fuzzy_threshold: f64,
    embedding_threshold: f64,
}

impl EntityDeduplicator {
    pub fn new(memory_repo: Arc<dyn MemoryRepository>, fuzzy_threshold: f64, embedding_threshold: f64) -> Self {
        Self { memory_repo, fuzzy_threshold, embedding_threshold }
    }

    /// Runs the four stages in order against every existing entity of
    /// `candidate.entity_type` in `candidate.tenant_id`, stopping at the
    /// first stage that produces a match.
    pub async fn find_duplicate(&self, candidate: &Entity) -> Result<Option<Entity>> {
        let existing: Vec<Entity> = self
            .memory_repo
            .list_entities(candidate.tenant_id)
            .await?
            .into_iter()
            .filter(|e| e.entity_type == candidate.entity_type)
            .collect();

        if existing.is_empty() {
            return Ok(None);
        }

        if let Some(m) = self.exact_match(candidate, &existing) {
            TraceEvent::EntityDeduped { stage: "exact".into(), entity_id: m.id.to_string(), entity_name: m.name.clone() }.emit();
            return Ok(Some(m));
        }
        if let Some(m) = self.fuzzy_match(candidate, &existing) {
            TraceEvent::EntityDeduped { stage: "fuzzy".into(), entity_id: m.id.to_string(), entity_name: m.name.clone() }.emit();
            return Ok(Some(m));
        }
        if let Some(m) = self.embedding_match(candidate, &existing) {
            TraceEvent::EntityDeduped { stage: "embedding".into(), entity_id: m.id.to_string(), entity_name: m.name.clone() }.emit();
            return Ok(Some(m));
        }
        if let Some(m) = self.rule_based_match(candidate, &existing) {
            TraceEvent::EntityDeduped { stage: "rule_based".into(), entity_id: m.id.to_string(), entity_name: m.name.clone() }.emit();
            return Ok(Some(m));
        }
        Ok(None)
    }

    fn exact_match(&self, candidate: &Entity, existing: &[Entity]) -> Option<Entity> {
        let normalized = Entity::normalized_name(&candidate.name);
        existing.iter().find(|e| Entity::normalized_name(&e.name) == normalized).cloned()
    }

    fn fuzzy_match(&self, candidate: &Entity, existing: &[Entity]) -> Option<Entity> {
        let normalized = Entity::normalized_name(&candidate.name);
        existing
            .iter()
            .find(|e| strsim::normalized_levenshtein(&normalized, &Entity::normalized_name(&e.name)) >= self.fuzzy_threshold)
            .cloned()
    }

    fn embedding_match(&self, candidate: &Entity, existing: &[Entity]) -> Option<Entity> {
        let candidate_embedding = candidate.attributes.get("__embedding")?.as_array()?;
        let candidate_vec: Vec<f32> = candidate_embedding.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect();

        existing
            .iter()
            .filter_map(|e| {
                let emb = e.attributes.get("__embedding")?.as_array()?;
                let vec: Vec<f32> = emb.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect();
                Some((e, cosine(&candidate_vec, &vec)))
            })
            .find(|(_, sim)| *sim >= self.embedding_threshold as f32)
            .map(|(e, _)| e.clone())
    }

    fn rule_based_match(&self, candidate: &Entity, existing: &[Entity]) -> Option<Entity> {
        match candidate.entity_type.as_str() {
            "person" => {
                let email = candidate.attributes.get("email");
                let phone = candidate.attributes.get("phone");
                existing
                    .iter()
                    .find(|e| {
                        (email.is_some() && email == e.attributes.get("email"))
                            || (phone.is_some() && phone == e.attributes.get("phone"))
                    })
                    .cloned()
            }
            "order" => {
                let order_id = candidate.attributes.get("order_id")?;
                existing.iter().find(|e| e.attributes.get("order_id") == Some(order_id)).cloned()
            }
            _ => None,
        }
    }

    /// Unions attribute maps (new wins on conflicts), keeps the existing
    /// entity's `id` and `valid_from`. Not persisted — the caller saves
    /// the result.
    pub fn merge(&self, existing: &Entity, new: &Entity) -> Entity {
        let mut attributes: HashMap<String, serde_json::Value> = existing.attributes.clone();
        attributes.extend(new.attributes.clone());
        Entity {
            id: existing.id,
            tenant_id: existing.tenant_id,
            name: existing.name.clone(),
            entity_type: existing.entity_type.clone(),
            attributes,
            confidence: new.confidence.max(existing.confidence),
            valid_from: existing.valid_from,
            valid_to: None,
        }
    }
}

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

/// Bi-temporally rewrites relationships of `(from_entity_id,
/// relation_type)`: every currently-active row is stamped `valid_to =
/// now`, and one new row is inserted `valid_from = now, valid_to =
/// None`. Unlike a filtered lookup by `to_entity_id`, every active
/// relationship of this type from this entity is invalidated, even ones
/// pointing elsewhere — the original's explicit choice (a customer's
/// single active "has_issue" moves to a new issue, it doesn't fork).
pub async fn rewrite_relationship(
    memory_repo: &Arc<dyn MemoryRepository>,
    tenant_id: Uuid,
    from_entity_id: Uuid,
    to_entity_id: Uuid,
    relation_type: &str,
    attributes: HashMap<String, serde_json::Value>,
    confidence: f64,
) -> Result<Relationship> {
    let now = Utc::now();
    for rel in memory_repo.active_relationships_for(tenant_id, from_entity_id).await? {
        if rel.from_entity_id == from_entity_id && rel.relation_type == relation_type && rel.is_active() {
            let mut superseded = rel.clone();
            superseded.valid_to = Some(now);
            memory_repo.save_relationship(superseded).await?;
            TraceEvent::RelationshipSuperseded { from_entity_id: from_entity_id.to_string(), relation_type: relation_type.to_string() }.emit();
        }
    }

    let new_rel = Relationship {
        id: Uuid::new_v4(),
        tenant_id,
        from_entity_id,
        to_entity_id,
        relation_type: relation_type.to_string(),
        attributes,
        confidence,
        valid_from: now,
        valid_to: None,
    };
    memory_repo.save_relationship(new_rel.clone()).await?;
    Ok(new_rel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_repositories::InMemoryMemoryRepository;

    fn entity(tenant: Uuid, name: &str, entity_type: &str, attrs: Vec<(&str, serde_json::Value)>) -> Entity {
        Entity {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            attributes: attrs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            confidence: 0.9,
            valid_from: Utc::now(),
            valid_to: None,
        }
    }

    #[tokio::test]
    async fn exact_match_wins_over_fuzzy() {
        let repo: Arc<dyn MemoryRepository> = Arc::new(InMemoryMemoryRepository::new());
        let tenant = Uuid::new_v4();
        let existing = entity(tenant, "John Smith", "person", vec![]);
        repo.save_entity(existing.clone()).await.unwrap();

        let dedup = EntityDeduplicator::new(repo, 0.90, 0.88);
        let candidate = entity(tenant, "john, smith", "person", vec![]);
        let found = dedup.find_duplicate(&candidate).await.unwrap();
        assert_eq!(found.unwrap().id, existing.id);
    }

    #[tokio::test]
    async fn fuzzy_match_above_threshold() {
        let repo: Arc<dyn MemoryRepository> = Arc::new(InMemoryMemoryRepository::new());
        let tenant = Uuid::new_v4();
        let existing = entity(tenant, "Jonathan Smith", "person", vec![]);
        repo.save_entity(existing.clone()).await.unwrap();

        let dedup = EntityDeduplicator::new(repo, 0.80, 0.88);
        let candidate = entity(tenant, "Jonathon Smith", "person", vec![]);
        let found = dedup.find_duplicate(&candidate).await.unwrap();
        assert_eq!(found.unwrap().id, existing.id);
    }

    #[tokio::test]
    async fn rule_based_match_on_email() {
        let repo: Arc<dyn MemoryRepository> = Arc::new(InMemoryMemoryRepository::new());
        let tenant = Uuid::new_v4();
        let existing = entity(tenant, "J Smith", "person", vec![("email", serde_json::json!("j@x.com"))]);
        repo.save_entity(existing.clone()).await.unwrap();

        let dedup = EntityDeduplicator::new(repo, 0.99, 0.99);
        let candidate = entity(tenant, "Totally Different Name", "person", vec![("email", serde_json::json!("j@x.com"))]);
        let found = dedup.find_duplicate(&candidate).await.unwrap();
        assert_eq!(found.unwrap().id, existing.id);
    }

    #[tokio::test]
    async fn no_match_returns_none() {
        let repo: Arc<dyn MemoryRepository> = Arc::new(InMemoryMemoryRepository::new());
        let tenant = Uuid::new_v4();
        repo.save_entity(entity(tenant, "Alice", "person", vec![])).await.unwrap();

        let dedup = EntityDeduplicator::new(repo, 0.90, 0.88);
        let candidate = entity(tenant, "Zachary Totally Unrelated", "person", vec![]);
        let found = dedup.find_duplicate(&candidate).await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn merge_unions_attributes_new_wins_conflicts() {
        let repo: Arc<dyn MemoryRepository> = Arc::new(InMemoryMemoryRepository::new());
        let dedup = EntityDeduplicator::new(repo, 0.9, 0.88);
        let tenant = Uuid::new_v4();
        let existing = entity(tenant, "A", "person", vec![("status", serde_json::json!("old")), ("email", serde_json::json!("a@x.com"))]);
        let new = entity(tenant, "A", "person", vec![("status", serde_json::json!("new"))]);

        let merged = dedup.merge(&existing, &new);
        assert_eq!(merged.id, existing.id);
        assert_eq!(merged.attributes.get("status"), Some(&serde_json::json!("new")));
        assert_eq!(merged.attributes.get("email"), Some(&serde_json::json!("a@x.com")));
    }

    #[tokio::test]
    async fn rewrite_relationship_supersedes_all_active_of_same_type() {
        let repo: Arc<dyn MemoryRepository> = Arc::new(InMemoryMemoryRepository::new());
        let tenant = Uuid::new_v4();
        let from = Uuid::new_v4();
        let old_to = Uuid::new_v4();
        let new_to = Uuid::new_v4();

        let first = rewrite_relationship(&repo, tenant, from, old_to, "has_issue", HashMap::new(), 0.9).await.unwrap();
        let second = rewrite_relationship(&repo, tenant, from, new_to, "has_issue", HashMap::new(), 0.9).await.unwrap();

        let active = repo.active_relationships_for(tenant, from).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert_ne!(first.id, second.id);
    }
}
