use loom_domain::capability::LlmCapabilities;
use loom_domain::message::{Message, ToolDefinition};
use loom_domain::stream::{StreamEvent, Usage};
use loom_domain::Result;
use serde::{Deserialize, Serialize};

pub type BoxStream<'a, T> = std::pin::Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub json_mode: bool,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<loom_domain::message::ToolCall>,
    pub usage: Option<Usage>,
    pub model: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsRequest {
    pub input: Vec<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingsResponse {
    pub embeddings: Vec<Vec<f32>>,
}

/// Abstract generation capability (§1, §6: "The core uses abstract
/// generation and embedding capabilities"). Concrete network-backed
/// implementations (OpenAI/Anthropic/Bedrock-style adapters) are an
/// external collaborator and not built here — see `MockProvider` for
/// the deterministic reference implementation used by tests and the
/// `loom-cli` demo.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    async fn chat_stream(&self, request: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    async fn embeddings(&self, request: EmbeddingsRequest) -> Result<EmbeddingsResponse>;

    fn capabilities(&self) -> &LlmCapabilities;

    fn provider_id(&self) -> &str;
}
