pub mod mock;
pub mod traits;

pub use mock::MockProvider;
pub use traits::{BoxStream, ChatRequest, ChatResponse, EmbeddingsRequest, EmbeddingsResponse, LlmProvider};
