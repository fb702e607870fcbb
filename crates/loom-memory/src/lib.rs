//! Episodic memory ingestion (§4.6): per-turn episode creation with
//! dual-provider embedding fallback, async entity extraction and
//! four-stage deduplication, bi-temporal relationship rewrite, and
//! hierarchical window/meta summarization.

pub mod dedup;
pub mod extractor;
pub mod ingestor;
pub mod summarizer;

pub use dedup::{rewrite_relationship, EntityDeduplicator};
pub use extractor::{EntityExtractionResult, EntityExtractor, ExtractedEntity, ExtractedRelationship};
pub use ingestor::{embed_with_fallback, MemoryIngestor};
pub use summarizer::ConversationSummarizer;
