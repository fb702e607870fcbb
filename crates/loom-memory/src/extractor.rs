//! Entity/relationship extraction from an episode's content (§4.6), via
//! a single LLM call in JSON mode. Grounded on
//! `ruche/memory/ingestion/entity_extractor.py`'s `EntityExtractor`.

use std::sync::Arc;

use loom_domain::memory::Episode;
use loom_domain::message::{Message, MessageContent, Role};
use loom_domain::Result;
use loom_providers::{ChatRequest, LlmProvider};
use serde::Deserialize;

const SYSTEM_PROMPT: &str = "You are an entity extraction system for a knowledge graph.
Extract named entities from the following conversation turn.

Entity types to extract:
- person: People, customers, employees (must have name if known)
- order: Purchase orders, transactions
- product: Items, goods mentioned
- issue: Problems, complaints, damage
- concept: Abstract entities specific to domain (e.g., \"loyalty status\", \"account\")

For each entity, provide:
1. name: Exact text from conversation if possible
2. type: Choose from above types
3. attributes: Key-value pairs like {\"email\": \"...\"}
4. confidence: a number from 0.0 to 1.0

Extract relationships:
- from_name: Source entity name
- to_name: Target entity name
- relation_type: contains, ordered, has_issue, owns, related_to, etc.
- confidence: a number from 0.0 to 1.0

Return a single JSON object:
{\"entities\": [{\"name\": \"...\", \"type\": \"person\", \"attributes\": {}, \"confidence\": 0.9}],
 \"relationships\": [{\"from_name\": \"...\", \"to_name\": \"...\", \"relation_type\": \"ordered\", \"attributes\": {}, \"confidence\": 0.9}]}";

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedEntity {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_entity_type", rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedRelationship {
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub to_name: String,
    #[serde(default = "default_relation_type")]
    pub relation_type: String,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_entity_type() -> String {
    "concept".to_string()
}

fn default_relation_type() -> String {
    "related_to".to_string()
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityExtractionResult {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
}

pub struct EntityExtractor {
    judge: Arc<dyn LlmProvider>,
    min_confidence: f64,
}

impl EntityExtractor {
    pub fn new(judge: Arc<dyn LlmProvider>, min_confidence: f64) -> Self {
        Self { judge, min_confidence }
    }

    /// Extracts entities/relationships from `episode.content`, filtering
    /// out anything below `min_confidence`. Never fails the caller on a
    /// malformed judge reply — an unparseable response yields an empty
    /// result, same as the original's `_parse_llm_response` catch-all.
    pub async fn extract(&self, episode: &Episode) -> Result<EntityExtractionResult> {
        let response = self
            .judge
            .chat(ChatRequest {
                messages: vec![
                    Message { role: Role::System, content: MessageContent::Text(SYSTEM_PROMPT.to_string()) },
                    Message {
                        role: Role::User,
                        content: MessageContent::Text(format!("Extract entities and relationships from this text:\n\n{}", episode.content)),
                    },
                ],
                temperature: Some(0.0),
                json_mode: true,
                ..Default::default()
            })
            .await?;

        let result: EntityExtractionResult = serde_json::from_str(&response.content).unwrap_or_default();
        Ok(self.filter_by_confidence(result))
    }

    fn filter_by_confidence(&self, result: EntityExtractionResult) -> EntityExtractionResult {
        EntityExtractionResult {
            entities: result.entities.into_iter().filter(|e| e.confidence >= self.min_confidence).collect(),
            relationships: result.relationships.into_iter().filter(|r| r.confidence >= self.min_confidence).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loom_domain::memory::{EpisodeContentType, EpisodeSource};
    use loom_providers::MockProvider;
    use uuid::Uuid;

    fn episode(content: &str) -> Episode {
        Episode {
            id: Uuid::new_v4(),
            group_id: "t:s".into(),
            content: content.into(),
            content_type: EpisodeContentType::Message,
            source: EpisodeSource::User,
            occurred_at: Utc::now(),
            recorded_at: Utc::now(),
            embedding: None,
            entity_ids: vec![],
            source_metadata: None,
        }
    }

    #[tokio::test]
    async fn filters_entities_below_min_confidence() {
        let provider = MockProvider::new("judge");
        provider.set_default_response(
            r#"{"entities": [
                {"name": "John", "type": "person", "attributes": {}, "confidence": 0.9},
                {"name": "maybe", "type": "concept", "attributes": {}, "confidence": 0.2}
            ], "relationships": []}"#,
        );
        let extractor = EntityExtractor::new(Arc::new(provider), 0.6);
        let result = extractor.extract(&episode("John called about his order")).await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].name, "John");
    }

    #[tokio::test]
    async fn malformed_response_yields_empty_result() {
        let provider = MockProvider::new("judge");
        provider.set_default_response("not json at all");
        let extractor = EntityExtractor::new(Arc::new(provider), 0.6);
        let result = extractor.extract(&episode("hello")).await.unwrap();
        assert!(result.entities.is_empty());
        assert!(result.relationships.is_empty());
    }
}
