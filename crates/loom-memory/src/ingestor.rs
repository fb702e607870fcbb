//! Per-turn episode creation, dual-provider embedding with fallback,
//! and fire-and-forget dispatch of entity extraction and summarization
//! (§4.6). Grounded on `ruche/memory/ingestion/ingestor.py`'s
//! `MemoryIngestor`, with the fire-and-forget dispatch modeled on the
//! teacher's `runtime::fire_auto_capture` pattern (spawn, log on error,
//! never block the caller).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use loom_domain::memory::{Episode, EpisodeContentType, EpisodeSource};
use loom_domain::Result;
use loom_providers::{EmbeddingsRequest, LlmProvider};
use loom_repositories::MemoryRepository;
use uuid::Uuid;

use crate::dedup::{rewrite_relationship, EntityDeduplicator};
use crate::extractor::EntityExtractor;
use crate::summarizer::ConversationSummarizer;

/// Embeds `text` with `primary`, falling back to `fallback` (if given)
/// when `primary` exceeds `timeout`. Returns `(embedding, provider_id)`.
/// Grounded on `_generate_embedding_with_fallback`.
pub async fn embed_with_fallback(
    primary: &Arc<dyn LlmProvider>,
    fallback: Option<&Arc<dyn LlmProvider>>,
    text: &str,
    timeout: Duration,
) -> Result<(Vec<f32>, String)> {
    let request = EmbeddingsRequest { input: vec![text.to_string()], model: None };
    match tokio::time::timeout(timeout, primary.embeddings(request.clone())).await {
        Ok(Ok(resp)) => Ok((resp.embeddings.into_iter().next().unwrap_or_default(), primary.provider_id().to_string())),
        Ok(Err(e)) => {
            if let Some(fallback) = fallback {
                tracing::warn!(provider = primary.provider_id(), error = %e, "embedding provider failed, using fallback");
                let resp = fallback.embeddings(request).await?;
                Ok((resp.embeddings.into_iter().next().unwrap_or_default(), fallback.provider_id().to_string()))
            } else {
                Err(e)
            }
        }
        Err(_) => {
            if let Some(fallback) = fallback {
                tracing::warn!(provider = primary.provider_id(), "embedding timed out, using fallback");
                let resp = fallback.embeddings(request).await?;
                Ok((resp.embeddings.into_iter().next().unwrap_or_default(), fallback.provider_id().to_string()))
            } else {
                Err(loom_domain::Error::Timeout(format!("embedding provider {} timed out", primary.provider_id())))
            }
        }
    }
}

pub struct MemoryIngestor {
    memory_repo: Arc<dyn MemoryRepository>,
    embedding_provider: Arc<dyn LlmProvider>,
    fallback_embedding_provider: Option<Arc<dyn LlmProvider>>,
    entity_extractor: Option<Arc<EntityExtractor>>,
    deduplicator: Option<Arc<EntityDeduplicator>>,
    summarizer: Option<Arc<ConversationSummarizer>>,
    embedding_enabled: bool,
    embedding_timeout: Duration,
}

impl MemoryIngestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        memory_repo: Arc<dyn MemoryRepository>,
        embedding_provider: Arc<dyn LlmProvider>,
        fallback_embedding_provider: Option<Arc<dyn LlmProvider>>,
        entity_extractor: Option<Arc<EntityExtractor>>,
        deduplicator: Option<Arc<EntityDeduplicator>>,
        summarizer: Option<Arc<ConversationSummarizer>>,
        embedding_enabled: bool,
        embedding_timeout: Duration,
    ) -> Self {
        Self {
            memory_repo,
            embedding_provider,
            fallback_embedding_provider,
            entity_extractor,
            deduplicator,
            summarizer,
            embedding_enabled,
            embedding_timeout,
        }
    }

    /// Ingests one turn as a `message` episode. Embedding failures
    /// degrade gracefully (episode is stored without an embedding);
    /// everything else propagates. Entity extraction and the
    /// summarization check are fired via `tokio::spawn` and do not
    /// block the caller.
    pub async fn ingest_turn(
        &self,
        tenant_id: Uuid,
        session_id: Uuid,
        user_message: &str,
        agent_response: &str,
        occurred_at: DateTime<Utc>,
        turn_number: u32,
    ) -> Result<Episode> {
        let group_id = Episode::group_id_for(tenant_id, session_id);
        let content = format!("User: {user_message}\nAgent: {agent_response}");

        let mut episode = Episode {
            id: Uuid::new_v4(),
            group_id: group_id.clone(),
            content,
            content_type: EpisodeContentType::Message,
            source: EpisodeSource::User,
            occurred_at,
            recorded_at: Utc::now(),
            embedding: None,
            entity_ids: vec![],
            source_metadata: Some(serde_json::json!({ "turn_number": turn_number })),
        };

        self.attach_embedding(&mut episode).await;
        self.memory_repo.save_episode(episode.clone()).await?;

        self.dispatch_background_tasks(episode.id, group_id);
        Ok(episode)
    }

    /// Ingests a system event (tool execution, scenario transition,
    /// error) as an `event` episode — not routed through entity
    /// extraction/summarization dispatch, matching `ingest_event`'s
    /// narrower scope in the original.
    pub async fn ingest_event(
        &self,
        group_id: &str,
        event_type: &str,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<Episode> {
        let mut source_metadata = serde_json::json!({ "event_type": event_type });
        if let (Some(map), Some(extra)) = (source_metadata.as_object_mut(), metadata.as_ref().and_then(|m| m.as_object())) {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }

        let mut episode = Episode {
            id: Uuid::new_v4(),
            group_id: group_id.to_string(),
            content: content.to_string(),
            content_type: EpisodeContentType::Event,
            source: EpisodeSource::System,
            occurred_at: Utc::now(),
            recorded_at: Utc::now(),
            embedding: None,
            entity_ids: vec![],
            source_metadata: Some(source_metadata),
        };

        self.attach_embedding(&mut episode).await;
        self.memory_repo.save_episode(episode.clone()).await?;
        Ok(episode)
    }

    async fn attach_embedding(&self, episode: &mut Episode) {
        if !self.embedding_enabled {
            return;
        }
        match embed_with_fallback(&self.embedding_provider, self.fallback_embedding_provider.as_ref(), &episode.content, self.embedding_timeout).await {
            Ok((embedding, _model)) => episode.embedding = Some(embedding),
            Err(e) => {
                tracing::warn!(episode_id = %episode.id, error = %e, "embedding generation failed, storing without embedding");
            }
        }
    }

    fn dispatch_background_tasks(&self, episode_id: Uuid, group_id: String) {
        if let (Some(extractor), Some(dedup)) = (self.entity_extractor.clone(), self.deduplicator.clone()) {
            let memory_repo = self.memory_repo.clone();
            let group_id_clone = group_id.clone();
            tokio::spawn(async move {
                if let Err(e) = run_entity_extraction(memory_repo, extractor, dedup, episode_id, &group_id_clone).await {
                    tracing::error!(episode_id = %episode_id, error = %e, "background entity extraction failed");
                }
            });
        }

        if let Some(summarizer) = self.summarizer.clone() {
            tokio::spawn(async move {
                if let Err(e) = summarizer.check_and_summarize_if_needed(&group_id).await {
                    tracing::error!(group_id = %group_id, error = %e, "background summarization check failed");
                }
            });
        }
    }
}

async fn run_entity_extraction(
    memory_repo: Arc<dyn MemoryRepository>,
    extractor: Arc<EntityExtractor>,
    dedup: Arc<EntityDeduplicator>,
    episode_id: Uuid,
    group_id: &str,
) -> Result<()> {
    let Some(episode) = memory_repo.get_episode(episode_id).await? else { return Ok(()) };
    let tenant_id = tenant_id_from_group(group_id)?;

    let result = extractor.extract(&episode).await?;

    let mut resolved: std::collections::HashMap<String, Uuid> = std::collections::HashMap::new();
    for extracted in &result.entities {
        let candidate = loom_domain::memory::Entity {
            id: Uuid::new_v4(),
            tenant_id,
            name: extracted.name.clone(),
            entity_type: extracted.entity_type.clone(),
            attributes: extracted.attributes.clone().into_iter().collect(),
            confidence: extracted.confidence,
            valid_from: Utc::now(),
            valid_to: None,
        };

        let entity = match dedup.find_duplicate(&candidate).await? {
            Some(existing) => dedup.merge(&existing, &candidate),
            None => candidate,
        };
        resolved.insert(extracted.name.clone(), entity.id);
        memory_repo.save_entity(entity).await?;
    }

    for rel in &result.relationships {
        let (Some(&from_id), Some(&to_id)) = (resolved.get(&rel.from_name), resolved.get(&rel.to_name)) else { continue };
        rewrite_relationship(&memory_repo, tenant_id, from_id, to_id, &rel.relation_type, rel.attributes.clone().into_iter().collect(), rel.confidence).await?;
    }

    Ok(())
}

fn tenant_id_from_group(group_id: &str) -> Result<Uuid> {
    group_id
        .split(':')
        .next()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| loom_domain::Error::Validation(format!("malformed group_id: {group_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_providers::MockProvider;
    use loom_repositories::InMemoryMemoryRepository;

    #[tokio::test]
    async fn ingest_turn_creates_message_episode_with_embedding() {
        let repo: Arc<dyn MemoryRepository> = Arc::new(InMemoryMemoryRepository::new());
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::new("embedder"));
        let ingestor = MemoryIngestor::new(repo.clone(), provider, None, None, None, None, true, Duration::from_millis(500));

        let tenant = Uuid::new_v4();
        let session = Uuid::new_v4();
        let episode = ingestor.ingest_turn(tenant, session, "hi", "hello!", Utc::now(), 1).await.unwrap();

        assert_eq!(episode.content, "User: hi\nAgent: hello!");
        assert!(episode.embedding.is_some());
        assert_eq!(episode.content_type, EpisodeContentType::Message);

        let stored = repo.get_episode(episode.id).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn ingest_event_does_not_dispatch_background_tasks() {
        let repo: Arc<dyn MemoryRepository> = Arc::new(InMemoryMemoryRepository::new());
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::new("embedder"));
        let ingestor = MemoryIngestor::new(repo, provider, None, None, None, None, true, Duration::from_millis(500));

        let episode = ingestor.ingest_event("t:s", "tool_executed", "ran lookup_order", None).await.unwrap();
        assert_eq!(episode.content_type, EpisodeContentType::Event);
        assert_eq!(episode.source, EpisodeSource::System);
    }

    #[tokio::test]
    async fn tenant_id_from_group_parses_prefix() {
        let tenant = Uuid::new_v4();
        let parsed = tenant_id_from_group(&format!("{tenant}:{}", Uuid::new_v4())).unwrap();
        assert_eq!(parsed, tenant);
    }

    /// Two consecutive turns mention the same person under different
    /// capitalization/spacing ("John Smith" / "john  smith"). The second
    /// turn's extraction must dedup against the first rather than create
    /// a second `person` entity, and a relationship recorded on turn one
    /// must still resolve to that same entity id after turn two merges.
    #[tokio::test]
    async fn second_turn_deduplicates_entity_mentioned_with_different_casing() {
        use crate::dedup::EntityDeduplicator;
        use crate::extractor::EntityExtractor;
        use loom_domain::memory::{Episode, EpisodeContentType, EpisodeSource};

        let repo: Arc<dyn MemoryRepository> = Arc::new(InMemoryMemoryRepository::new());
        let tenant = Uuid::new_v4();
        let session = Uuid::new_v4();
        let group_id = Episode::group_id_for(tenant, session);

        let judge = MockProvider::new("entity-judge");
        judge.on(
            "John Smith called",
            r#"{"entities": [
                {"name": "John Smith", "type": "person", "attributes": {}, "confidence": 0.9},
                {"name": "order 42", "type": "order", "attributes": {}, "confidence": 0.9}
            ], "relationships": [
                {"from_name": "John Smith", "to_name": "order 42", "relation_type": "ordered", "attributes": {}, "confidence": 0.9}
            ]}"#,
        );
        judge.on(
            "john  smith said",
            r#"{"entities": [
                {"name": "john  smith", "type": "person", "attributes": {"phone": "555-0100"}, "confidence": 0.9}
            ], "relationships": []}"#,
        );
        let judge: Arc<dyn LlmProvider> = Arc::new(judge);

        let extractor = Arc::new(EntityExtractor::new(judge, 0.5));
        let dedup = Arc::new(EntityDeduplicator::new(repo.clone(), 0.9, 0.88));

        let episode_one = Episode {
            id: Uuid::new_v4(),
            group_id: group_id.clone(),
            content: "User: John Smith called about order 42\nAgent: noted.".into(),
            content_type: EpisodeContentType::Message,
            source: EpisodeSource::User,
            occurred_at: Utc::now(),
            recorded_at: Utc::now(),
            embedding: None,
            entity_ids: vec![],
            source_metadata: None,
        };
        repo.save_episode(episode_one.clone()).await.unwrap();
        run_entity_extraction(repo.clone(), extractor.clone(), dedup.clone(), episode_one.id, &group_id).await.unwrap();

        let entities_after_first = repo.list_entities(tenant).await.unwrap();
        assert_eq!(entities_after_first.iter().filter(|e| e.entity_type == "person").count(), 1);
        let john = entities_after_first.iter().find(|e| e.entity_type == "person").unwrap().clone();

        let relationships = repo.active_relationships_for(tenant, john.id).await.unwrap();
        assert_eq!(relationships.len(), 1);
        let order_entity_id = relationships[0].to_entity_id;

        let episode_two = Episode {
            id: Uuid::new_v4(),
            group_id: group_id.clone(),
            content: "User: john  smith said his number changed\nAgent: updated.".into(),
            content_type: EpisodeContentType::Message,
            source: EpisodeSource::User,
            occurred_at: Utc::now(),
            recorded_at: Utc::now(),
            embedding: None,
            entity_ids: vec![],
            source_metadata: None,
        };
        repo.save_episode(episode_two.clone()).await.unwrap();
        run_entity_extraction(repo.clone(), extractor, dedup, episode_two.id, &group_id).await.unwrap();

        let entities_after_second = repo.list_entities(tenant).await.unwrap();
        let persons: Vec<_> = entities_after_second.iter().filter(|e| e.entity_type == "person").collect();
        assert_eq!(persons.len(), 1, "turn two must dedup, not duplicate, the person entity");
        assert_eq!(persons[0].id, john.id, "the merged entity keeps the original id");
        assert_eq!(persons[0].attributes.get("phone").and_then(|v| v.as_str()), Some("555-0100"), "turn two's attributes are merged in");

        let relationships_after_second = repo.active_relationships_for(tenant, john.id).await.unwrap();
        assert_eq!(relationships_after_second.len(), 1, "the order relationship from turn one is untouched");
        assert_eq!(relationships_after_second[0].to_entity_id, order_entity_id);
    }
}
