//! Hierarchical conversation summarization (§4.6). Grounded on
//! `ruche/memory/ingestion/summarizer.py`'s `ConversationSummarizer`.

use std::sync::Arc;

use loom_domain::memory::{Episode, EpisodeContentType, EpisodeSource};
use loom_domain::message::{Message, MessageContent, Role};
use loom_domain::trace::TraceEvent;
use loom_domain::Result;
use loom_providers::{ChatRequest, LlmProvider};
use loom_repositories::MemoryRepository;

pub struct ConversationSummarizer {
    judge: Arc<dyn LlmProvider>,
    memory_repo: Arc<dyn MemoryRepository>,
    turns_per_summary: u32,
    summaries_per_meta: u32,
    enabled_at_turn_count: u32,
}

impl ConversationSummarizer {
    pub fn new(
        judge: Arc<dyn LlmProvider>,
        memory_repo: Arc<dyn MemoryRepository>,
        turns_per_summary: u32,
        summaries_per_meta: u32,
        enabled_at_turn_count: u32,
    ) -> Self {
        Self { judge, memory_repo, turns_per_summary, summaries_per_meta, enabled_at_turn_count }
    }

    /// Generates a window summary over `episodes`, timestamped at the
    /// last episode's `occurred_at`. Not persisted — the caller stores
    /// it.
    pub async fn summarize_window(&self, episodes: &[Episode], group_id: &str) -> Result<Episode> {
        let context = format_episodes(episodes);
        let response = self
            .judge
            .chat(ChatRequest {
                messages: vec![
                    Message {
                        role: Role::System,
                        content: MessageContent::Text(
                            "You are a concise summarizer of customer conversations. Extract the key \
                             information: what the customer wanted, what happened, and what was resolved. \
                             Be brief (1-2 paragraphs max)."
                                .to_string(),
                        ),
                    },
                    Message { role: Role::User, content: MessageContent::Text(format!("Summarize this conversation:\n\n{context}")) },
                ],
                temperature: Some(0.2),
                ..Default::default()
            })
            .await?;

        Ok(Episode {
            id: uuid::Uuid::new_v4(),
            group_id: group_id.to_string(),
            content: response.content,
            content_type: EpisodeContentType::Summary,
            source: EpisodeSource::System,
            occurred_at: episodes.last().map(|e| e.occurred_at).unwrap_or_else(chrono::Utc::now),
            recorded_at: chrono::Utc::now(),
            embedding: None,
            entity_ids: vec![],
            source_metadata: Some(serde_json::json!({
                "summary_type": "window",
                "episodes_covered": episodes.len(),
                "episode_ids": episodes.iter().map(|e| e.id.to_string()).collect::<Vec<_>>(),
            })),
        })
    }

    /// Combines `summaries` (window summaries) into a higher-level
    /// overview. Not persisted.
    pub async fn create_meta_summary(&self, summaries: &[Episode], group_id: &str) -> Result<Episode> {
        let context = format_episodes(summaries);
        let response = self
            .judge
            .chat(ChatRequest {
                messages: vec![
                    Message {
                        role: Role::System,
                        content: MessageContent::Text(
                            "You are summarizing previously generated conversation summaries into a \
                             high-level overview. Focus on major themes and outcomes."
                                .to_string(),
                        ),
                    },
                    Message { role: Role::User, content: MessageContent::Text(format!("Create a meta-summary from these summaries:\n\n{context}")) },
                ],
                temperature: Some(0.2),
                ..Default::default()
            })
            .await?;

        Ok(Episode {
            id: uuid::Uuid::new_v4(),
            group_id: group_id.to_string(),
            content: response.content,
            content_type: EpisodeContentType::MetaSummary,
            source: EpisodeSource::System,
            occurred_at: summaries.last().map(|e| e.occurred_at).unwrap_or_else(chrono::Utc::now),
            recorded_at: chrono::Utc::now(),
            embedding: None,
            entity_ids: vec![],
            source_metadata: Some(serde_json::json!({
                "summary_type": "meta",
                "summaries_covered": summaries.len(),
                "summary_ids": summaries.iter().map(|e| e.id.to_string()).collect::<Vec<_>>(),
            })),
        })
    }

    /// Counts message/event episodes in `group_id`; every
    /// `turns_per_summary`-th turn generates and persists a window
    /// summary, and every `summaries_per_meta`-th window summary (once
    /// `enabled_at_turn_count` is reached) additionally generates and
    /// persists a meta-summary. Returns whichever summary was created
    /// (meta takes precedence when both fire on the same turn), or
    /// `None` if no threshold was reached.
    pub async fn check_and_summarize_if_needed(&self, group_id: &str) -> Result<Option<Episode>> {
        let all_episodes = self.memory_repo.list_episodes_by_group(group_id).await?;
        let mut message_episodes: Vec<Episode> = all_episodes
            .iter()
            .filter(|e| matches!(e.content_type, EpisodeContentType::Message | EpisodeContentType::Event))
            .cloned()
            .collect();
        message_episodes.sort_by_key(|e| e.occurred_at);

        let turn_count = message_episodes.len() as u32;
        if turn_count == 0 || turn_count % self.turns_per_summary != 0 {
            return Ok(None);
        }

        let window_threshold = self.turns_per_summary as usize;
        let start = message_episodes.len().saturating_sub(window_threshold);
        let window_episodes = &message_episodes[start..];
        if window_episodes.len() < window_threshold {
            return Ok(None);
        }

        let summary = self.summarize_window(window_episodes, group_id).await?;
        self.memory_repo.save_episode(summary.clone()).await?;
        TraceEvent::SummaryGenerated { session_id: group_id.to_string(), kind: "window".into(), episode_count: window_episodes.len() }.emit();

        if turn_count >= self.enabled_at_turn_count {
            let mut summaries: Vec<Episode> = all_episodes
                .into_iter()
                .filter(|e| matches!(e.content_type, EpisodeContentType::Summary))
                .collect();
            summaries.push(summary.clone());
            summaries.sort_by_key(|e| e.occurred_at);

            if summaries.len() as u32 % self.summaries_per_meta == 0 {
                let meta_threshold = self.summaries_per_meta as usize;
                let meta_start = summaries.len().saturating_sub(meta_threshold);
                let meta_summaries = &summaries[meta_start..];
                if meta_summaries.len() == meta_threshold {
                    let meta = self.create_meta_summary(meta_summaries, group_id).await?;
                    self.memory_repo.save_episode(meta.clone()).await?;
                    TraceEvent::SummaryGenerated { session_id: group_id.to_string(), kind: "meta".into(), episode_count: meta_summaries.len() }.emit();
                    return Ok(Some(meta));
                }
            }
        }

        Ok(Some(summary))
    }
}

fn format_episodes(episodes: &[Episode]) -> String {
    episodes
        .iter()
        .map(|e| match e.source {
            EpisodeSource::User => format!("Customer: {}", e.content),
            EpisodeSource::Agent => format!("Agent: {}", e.content),
            EpisodeSource::System => format!("[System: {}]", e.content),
            EpisodeSource::External => format!("[External: {}]", e.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
