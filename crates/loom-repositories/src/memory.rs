use std::collections::{HashMap, HashSet, VecDeque};

use loom_domain::memory::{Entity, Episode, Relationship};
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

/// Episodes/entities/relationships CRUD, vector and text search over
/// episodes, bounded-depth graph traversal, bulk delete by group (§6,
/// §4.6).
#[async_trait::async_trait]
pub trait MemoryRepository: Send + Sync {
    async fn save_episode(&self, episode: Episode) -> Result<()>;
    async fn get_episode(&self, id: Uuid) -> Result<Option<Episode>>;
    async fn list_episodes_by_group(&self, group_id: &str) -> Result<Vec<Episode>>;

    /// Top-`limit` episodes in `group_id` by cosine similarity to `query`.
    async fn vector_search_episodes(&self, group_id: &str, query: &[f32], limit: usize) -> Result<Vec<Episode>>;
    /// Substring match over `Episode::content`, case-insensitive.
    async fn text_search_episodes(&self, group_id: &str, query: &str, limit: usize) -> Result<Vec<Episode>>;

    async fn save_entity(&self, entity: Entity) -> Result<()>;
    async fn get_entity(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Entity>>;
    async fn find_entities_by_normalized_name(&self, tenant_id: Uuid, normalized_name: &str) -> Result<Vec<Entity>>;
    async fn list_entities(&self, tenant_id: Uuid) -> Result<Vec<Entity>>;

    async fn save_relationship(&self, relationship: Relationship) -> Result<()>;
    async fn active_relationships_for(&self, tenant_id: Uuid, entity_id: Uuid) -> Result<Vec<Relationship>>;

    /// BFS outward from `entity_id` over `is_active()` relationships, up
    /// to `max_depth` hops.
    async fn traverse(&self, tenant_id: Uuid, entity_id: Uuid, max_depth: usize) -> Result<Vec<Entity>>;

    /// Deletes every episode in `group_id` — used when a session/tenant
    /// is purged.
    async fn delete_group(&self, group_id: &str) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryMemoryRepository {
    episodes: RwLock<HashMap<Uuid, Episode>>,
    entities: RwLock<HashMap<Uuid, Entity>>,
    relationships: RwLock<HashMap<Uuid, Relationship>>,
}

impl InMemoryMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MemoryRepository for InMemoryMemoryRepository {
    async fn save_episode(&self, episode: Episode) -> Result<()> {
        self.episodes.write().insert(episode.id, episode);
        Ok(())
    }

    async fn get_episode(&self, id: Uuid) -> Result<Option<Episode>> {
        Ok(self.episodes.read().get(&id).cloned())
    }

    async fn list_episodes_by_group(&self, group_id: &str) -> Result<Vec<Episode>> {
        Ok(self
            .episodes
            .read()
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn vector_search_episodes(&self, group_id: &str, query: &[f32], limit: usize) -> Result<Vec<Episode>> {
        let mut scored: Vec<(f32, Episode)> = self
            .episodes
            .read()
            .values()
            .filter(|e| e.group_id == group_id)
            .filter_map(|e| e.embedding.as_ref().map(|emb| (cosine(emb, query), e.clone())))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, e)| e).collect())
    }

    async fn text_search_episodes(&self, group_id: &str, query: &str, limit: usize) -> Result<Vec<Episode>> {
        let needle = query.to_lowercase();
        let mut matches: Vec<Episode> = self
            .episodes
            .read()
            .values()
            .filter(|e| e.group_id == group_id && e.content.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        matches.sort_by_key(|e| std::cmp::Reverse(e.occurred_at));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn save_entity(&self, entity: Entity) -> Result<()> {
        self.entities.write().insert(entity.id, entity);
        Ok(())
    }

    async fn get_entity(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Entity>> {
        Ok(self
            .entities
            .read()
            .get(&id)
            .filter(|e| e.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_entities_by_normalized_name(&self, tenant_id: Uuid, normalized_name: &str) -> Result<Vec<Entity>> {
        Ok(self
            .entities
            .read()
            .values()
            .filter(|e| e.tenant_id == tenant_id && Entity::normalized_name(&e.name) == normalized_name)
            .cloned()
            .collect())
    }

    async fn list_entities(&self, tenant_id: Uuid) -> Result<Vec<Entity>> {
        Ok(self
            .entities
            .read()
            .values()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn save_relationship(&self, relationship: Relationship) -> Result<()> {
        self.relationships.write().insert(relationship.id, relationship);
        Ok(())
    }

    async fn active_relationships_for(&self, tenant_id: Uuid, entity_id: Uuid) -> Result<Vec<Relationship>> {
        Ok(self
            .relationships
            .read()
            .values()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.is_active()
                    && (r.from_entity_id == entity_id || r.to_entity_id == entity_id)
            })
            .cloned()
            .collect())
    }

    async fn traverse(&self, tenant_id: Uuid, entity_id: Uuid, max_depth: usize) -> Result<Vec<Entity>> {
        let mut visited = HashSet::new();
        visited.insert(entity_id);
        let mut queue = VecDeque::new();
        queue.push_back((entity_id, 0usize));
        let mut out = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for rel in self.active_relationships_for(tenant_id, current).await? {
                let neighbor = if rel.from_entity_id == current { rel.to_entity_id } else { rel.from_entity_id };
                if visited.insert(neighbor) {
                    if let Some(e) = self.get_entity(tenant_id, neighbor).await? {
                        out.push(e);
                    }
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }
        Ok(out)
    }

    async fn delete_group(&self, group_id: &str) -> Result<usize> {
        let mut episodes = self.episodes.write();
        let before = episodes.len();
        episodes.retain(|_, e| e.group_id != group_id);
        Ok(before - episodes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn episode(group_id: &str, content: &str, embedding: Option<Vec<f32>>) -> Episode {
        Episode {
            id: Uuid::new_v4(),
            group_id: group_id.to_string(),
            content: content.to_string(),
            content_type: loom_domain::memory::EpisodeContentType::Message,
            source: loom_domain::memory::EpisodeSource::User,
            occurred_at: Utc::now(),
            recorded_at: Utc::now(),
            embedding,
            entity_ids: vec![],
            source_metadata: None,
        }
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine_similarity() {
        let repo = InMemoryMemoryRepository::new();
        repo.save_episode(episode("g1", "close", Some(vec![1.0, 0.0]))).await.unwrap();
        repo.save_episode(episode("g1", "far", Some(vec![0.0, 1.0]))).await.unwrap();

        let results = repo.vector_search_episodes("g1", &[1.0, 0.0], 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "close");
    }

    #[tokio::test]
    async fn traverse_respects_max_depth() {
        let repo = InMemoryMemoryRepository::new();
        let tenant = Uuid::new_v4();
        let mk_entity = |name: &str| Entity {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            name: name.to_string(),
            entity_type: "person".into(),
            attributes: HashMap::new(),
            confidence: 1.0,
            valid_from: Utc::now(),
            valid_to: None,
        };
        let a = mk_entity("a");
        let b = mk_entity("b");
        let c = mk_entity("c");
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        repo.save_entity(a).await.unwrap();
        repo.save_entity(b).await.unwrap();
        repo.save_entity(c).await.unwrap();

        let mk_rel = |from: Uuid, to: Uuid| Relationship {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            from_entity_id: from,
            to_entity_id: to,
            relation_type: "knows".into(),
            attributes: HashMap::new(),
            confidence: 1.0,
            valid_from: Utc::now(),
            valid_to: None,
        };
        repo.save_relationship(mk_rel(a_id, b_id)).await.unwrap();
        repo.save_relationship(mk_rel(b_id, c_id)).await.unwrap();

        let depth1 = repo.traverse(tenant, a_id, 1).await.unwrap();
        assert_eq!(depth1.len(), 1);
        assert_eq!(depth1[0].id, b_id);

        let depth2 = repo.traverse(tenant, a_id, 2).await.unwrap();
        assert_eq!(depth2.len(), 2);
    }

    #[tokio::test]
    async fn delete_group_removes_only_matching_episodes() {
        let repo = InMemoryMemoryRepository::new();
        repo.save_episode(episode("g1", "x", None)).await.unwrap();
        repo.save_episode(episode("g2", "y", None)).await.unwrap();

        let removed = repo.delete_group("g1").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.list_episodes_by_group("g2").await.unwrap().len(), 1);
    }
}
