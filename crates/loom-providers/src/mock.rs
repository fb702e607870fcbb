use async_stream::stream;
use loom_domain::capability::{LlmCapabilities, ToolSupport};
use loom_domain::message::MessageContent;
use loom_domain::stream::{StreamEvent, Usage};
use loom_domain::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::traits::{BoxStream, ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};

/// Deterministic, network-free provider used by tests and `loom-cli`.
///
/// Responses are keyed by a substring match against the last user
/// message; unmatched input falls back to `default_response`. This
/// mirrors how the teacher repository's test suite avoids live provider
/// calls (e.g. `sa-gateway`'s unit tests never hit a real LLM).
pub struct MockProvider {
    id: String,
    capabilities: LlmCapabilities,
    canned: RwLock<HashMap<String, String>>,
    default_response: RwLock<String>,
}

impl MockProvider {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: LlmCapabilities {
                supports_tools: ToolSupport::Basic,
                supports_streaming: true,
                supports_json_mode: true,
                context_window_tokens: Some(128_000),
                max_output_tokens: Some(4_096),
            },
            canned: RwLock::new(HashMap::new()),
            default_response: RwLock::new("OK".to_string()),
        }
    }

    /// Register a canned response returned whenever the last user
    /// message contains `trigger`.
    pub fn on(&self, trigger: impl Into<String>, response: impl Into<String>) {
        self.canned.write().insert(trigger.into(), response.into());
    }

    pub fn set_default_response(&self, response: impl Into<String>) {
        *self.default_response.write() = response.into();
    }

    fn resolve_response(&self, request: &ChatRequest) -> String {
        let last_user_text = request
            .messages
            .iter()
            .rev()
            .find_map(|m| m.content.text().map(|t| t.to_string()))
            .unwrap_or_default();

        let canned = self.canned.read();
        for (trigger, response) in canned.iter() {
            if last_user_text.contains(trigger.as_str()) {
                return response.clone();
            }
        }
        self.default_response.read().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let content = self.resolve_response(&request);
        Ok(ChatResponse {
            content,
            tool_calls: vec![],
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 10,
                total_tokens: 20,
            }),
            model: request.model.unwrap_or_else(|| "mock-1".to_string()),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let content = self.resolve_response(&request);
        let s = stream! {
            for word in content.split_whitespace() {
                yield Ok(StreamEvent::Token { text: format!("{word} ") });
            }
            yield Ok(StreamEvent::Done {
                usage: Some(Usage { prompt_tokens: 10, completion_tokens: 10, total_tokens: 20 }),
                finish_reason: Some("stop".to_string()),
            });
        };
        Ok(Box::pin(s))
    }

    async fn embeddings(&self, request: EmbeddingsRequest) -> Result<EmbeddingsResponse> {
        // Deterministic, content-derived pseudo-embedding: stable across
        // runs so retrieval/dedup tests get reproducible similarity
        // scores without a real embedding model.
        let embeddings = request
            .input
            .iter()
            .map(|text| deterministic_embedding(text, 16))
            .collect();
        Ok(EmbeddingsResponse { embeddings })
    }

    fn capabilities(&self) -> &LlmCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

/// Hashes `text` into a fixed-length unit vector. Two inputs sharing
/// more trigram content land closer in cosine space than unrelated
/// inputs, which is enough for dedup/retrieval tests without shipping a
/// real embedding model.
pub fn deterministic_embedding(text: &str, dims: usize) -> Vec<f32> {
    let normalized: String = text.to_lowercase();
    let mut vec = vec![0f32; dims];
    if normalized.len() < 3 {
        vec[0] = 1.0;
        return vec;
    }
    let bytes = normalized.as_bytes();
    for window in bytes.windows(3) {
        let mut h: u64 = 1469598103934665603;
        for b in window {
            h ^= *b as u64;
            h = h.wrapping_mul(1099511628211);
        }
        let idx = (h as usize) % dims;
        vec[idx] += 1.0;
    }
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
    vec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chat_returns_canned_response_on_trigger() {
        let p = MockProvider::new("mock");
        p.on("hello", "hi there!");
        let req = ChatRequest {
            messages: vec![loom_domain::message::Message::user("hello world")],
            ..Default::default()
        };
        let resp = p.chat(req).await.unwrap();
        assert_eq!(resp.content, "hi there!");
    }

    #[tokio::test]
    async fn chat_falls_back_to_default_response() {
        let p = MockProvider::new("mock");
        let req = ChatRequest {
            messages: vec![loom_domain::message::Message::user("anything")],
            ..Default::default()
        };
        let resp = p.chat(req).await.unwrap();
        assert_eq!(resp.content, "OK");
    }

    #[test]
    fn deterministic_embedding_is_stable_across_calls() {
        let a = deterministic_embedding("John Smith", 16);
        let b = deterministic_embedding("John Smith", 16);
        assert_eq!(a, b);
    }

    #[test]
    fn similar_strings_score_higher_cosine_than_unrelated() {
        let a = deterministic_embedding("john smith called about his order", 32);
        let b = deterministic_embedding("john smith asked about his order status", 32);
        let c = deterministic_embedding("completely unrelated weather forecast today", 32);

        let cos = |x: &[f32], y: &[f32]| -> f32 { x.iter().zip(y).map(|(p, q)| p * q).sum() };
        assert!(cos(&a, &b) > cos(&a, &c));
    }
}
